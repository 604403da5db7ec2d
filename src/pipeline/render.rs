//! PDF page source: rasterise every page via pdfium and hand the images to
//! the pipeline as [`Page::Image`]s.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! Loading, rendering and PNG encoding all happen on a blocking-pool thread so
//! the Tokio workers never stall on CPU-heavy work.
//!
//! ## Why cap pixels, not DPI?
//!
//! Spec books mix letter pages with E-size drawing sheets. `max_rendered_pixels`
//! caps the longest edge regardless of physical size, keeping memory bounded
//! and matching the size vision models actually resolve (around 1,024–2,048 px).

use crate::config::PipelineConfig;
use crate::document::{Page, PageSource};
use crate::error::RulesError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::input::{resolve_input, ResolvedInput};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Document identifier for a PDF path: the file name minus its last
/// extension, so `specbook.v2.pdf` becomes `specbook.v2`.
pub fn document_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// A PDF on disk (or downloaded) whose pages are rendered on demand.
pub struct PdfPageSource {
    input: ResolvedInput,
    password: Option<String>,
    max_rendered_pixels: u32,
}

impl PdfPageSource {
    /// Resolve `input` (local path or HTTP(S) URL) and check it is a PDF.
    pub async fn open(input: &str, config: &PipelineConfig) -> Result<Self, RulesError> {
        let input = resolve_input(input, config.download_timeout_secs).await?;
        Ok(Self {
            input,
            password: config.password.clone(),
            max_rendered_pixels: config.max_rendered_pixels,
        })
    }

    pub fn path(&self) -> &Path {
        self.input.path()
    }

    /// File stem of the PDF, used as the document identifier.
    pub fn document_id(&self) -> String {
        document_id_for(self.path())
    }

    fn job(&self) -> (PathBuf, Option<String>, u32) {
        (
            self.path().to_path_buf(),
            self.password.clone(),
            self.max_rendered_pixels,
        )
    }
}

#[async_trait]
impl PageSource for PdfPageSource {
    async fn page_count(&self) -> Result<usize, RulesError> {
        let (path, password, _) = self.job();
        tokio::task::spawn_blocking(move || page_count_blocking(&path, password.as_deref()))
            .await
            .map_err(|e| RulesError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn load_pages(&self) -> Result<Vec<Page>, RulesError> {
        let (path, password, max_pixels) = self.job();
        tokio::task::spawn_blocking(move || {
            render_pages_blocking(&path, password.as_deref(), max_pixels)
        })
        .await
        .map_err(|e| RulesError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, RulesError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.to_ascii_lowercase().contains("password") {
            RulesError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            RulesError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn page_count_blocking(pdf_path: &Path, password: Option<&str>) -> Result<usize, RulesError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;
    Ok(document.pages().len() as usize)
}

/// Render and encode every page, in order.
fn render_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    max_pixels: u32,
) -> Result<Vec<Page>, RulesError> {
    let pdfium = Pdfium::default();
    let document = open_document(&pdfium, pdf_path, password)?;

    let pages = document.pages();
    info!("PDF loaded: {} pages", pages.len());

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(pages.len() as usize);
    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            RulesError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        let data = encode_page(&image).map_err(|e| RulesError::RasterisationFailed {
            page: page_num,
            detail: format!("Image encoding failed: {}", e),
        })?;
        results.push(Page::Image(data));
    }

    Ok(results)
}
