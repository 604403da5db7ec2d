//! Window planning: split `1..=N` into overlapping page windows.
//!
//! Consecutive windows share exactly `overlap` pages so that a rule spanning a
//! window boundary is seen whole by at least one extraction call. The plan is
//! a pure function of `(N, W, O)`; the aggregator relies on this to make
//! window order, and therefore output order, deterministic.

use crate::error::RulesError;

/// Page bounds of one planned window (1-indexed, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WindowSpan {
    pub index: usize,
    pub start_page: usize,
    pub end_page: usize,
}

impl WindowSpan {
    pub fn page_count(&self) -> usize {
        self.end_page + 1 - self.start_page
    }
}

/// Plan windows of `window_size` pages over a `page_count`-page document,
/// advancing by `window_size - overlap` each step.
///
/// The last window always ends at `page_count` and planning stops there, so
/// `page_count <= window_size` yields a single window. An empty document
/// yields no windows.
pub fn chunk(
    page_count: usize,
    window_size: usize,
    overlap: usize,
) -> Result<Vec<WindowSpan>, RulesError> {
    if window_size == 0 {
        return Err(RulesError::Configuration(
            "window size must be at least 1".into(),
        ));
    }
    if overlap >= window_size {
        return Err(RulesError::Configuration(format!(
            "overlap ({overlap}) must be smaller than window size ({window_size})"
        )));
    }

    let stride = window_size - overlap;
    let mut spans = Vec::with_capacity(page_count.div_ceil(stride));
    let mut start = 1;

    while start <= page_count {
        let end = (start + window_size - 1).min(page_count);
        spans.push(WindowSpan {
            index: spans.len() + 1,
            start_page: start,
            end_page: end,
        });
        if end == page_count {
            break;
        }
        start += stride;
    }

    Ok(spans)
}
