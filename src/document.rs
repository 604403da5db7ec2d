//! Loaded documents and the page windows cut from them.
//!
//! A [`Document`] is immutable once loaded: the pipeline only ever borrows
//! its pages to build [`Window`]s, and windows own clones of the pages they
//! cover so each extraction call can run without touching shared state.

use crate::error::RulesError;
use crate::pipeline::chunk::{chunk, WindowSpan};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use std::fmt;
use std::ops::RangeInclusive;

/// One page of a document as handed to the extraction service.
#[derive(Clone)]
pub enum Page {
    /// A rasterised page, base64-encoded and ready for a vision model.
    Image(ImageData),
    /// Plain text for the page (text-layer PDFs, pre-OCR'd input, tests).
    Text(String),
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Page::Image(img) => write!(f, "Image({}, {} bytes b64)", img.mime_type, img.data.len()),
            Page::Text(t) => write!(f, "Text({} chars)", t.chars().count()),
        }
    }
}

/// Supplies the ordered pages of one document.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages, without loading them.
    async fn page_count(&self) -> Result<usize, RulesError>;

    /// Every page, in document order.
    async fn load_pages(&self) -> Result<Vec<Page>, RulesError>;
}

/// Pages already held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticPages(pub Vec<Page>);

impl StaticPages {
    /// One text page per item.
    pub fn from_text<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(pages.into_iter().map(|p| Page::Text(p.into())).collect())
    }
}

#[async_trait]
impl PageSource for StaticPages {
    async fn page_count(&self) -> Result<usize, RulesError> {
        Ok(self.0.len())
    }

    async fn load_pages(&self) -> Result<Vec<Page>, RulesError> {
        Ok(self.0.clone())
    }
}

/// An ordered, 1-indexed sequence of pages plus the identifier used to name
/// windows and the output key.
#[derive(Debug, Clone)]
pub struct Document {
    id: String,
    pages: Vec<Page>,
}

impl Document {
    pub fn new(id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            id: id.into(),
            pages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page `n` (1-indexed).
    pub fn page(&self, n: usize) -> Option<&Page> {
        n.checked_sub(1).and_then(|i| self.pages.get(i))
    }

    /// Cut the document into overlapping windows.
    ///
    /// Fails with [`RulesError::Configuration`] when `overlap >= window_size`.
    pub fn windows(&self, window_size: usize, overlap: usize) -> Result<Vec<Window>, RulesError> {
        let spans = chunk(self.page_count(), window_size, overlap)?;
        Ok(spans.into_iter().map(|span| self.window(span)).collect())
    }

    fn window(&self, span: WindowSpan) -> Window {
        Window {
            index: span.index,
            start_page: span.start_page,
            end_page: span.end_page,
            label: window_label(&self.id, span.index),
            pages: self.pages[span.start_page - 1..span.end_page].to_vec(),
        }
    }
}

/// Identifier recorded as `source_chunk` on every rule a window yields.
pub fn window_label(document_id: &str, index: usize) -> String {
    format!("{document_id}_chunk_{index}")
}

/// A contiguous slice of pages submitted as one extraction unit.
#[derive(Debug, Clone)]
pub struct Window {
    /// 1-based position in the window sequence.
    pub index: usize,
    /// First page covered (1-indexed, inclusive).
    pub start_page: usize,
    /// Last page covered (1-indexed, inclusive).
    pub end_page: usize,
    pub label: String,
    pub pages: Vec<Page>,
}

impl Window {
    pub fn page_range(&self) -> RangeInclusive<usize> {
        self.start_page..=self.end_page
    }

    pub fn contains_page(&self, page: usize) -> bool {
        self.page_range().contains(&page)
    }

    /// Pages paired with their absolute page numbers.
    pub fn numbered_pages(&self) -> impl Iterator<Item = (usize, &Page)> {
        self.page_range().zip(self.pages.iter())
    }
}
