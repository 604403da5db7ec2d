//! Error types for the specbook-rules library.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! * [`RulesError`] — **Fatal**: the run cannot produce a trustworthy result
//!   (invalid window sizing, too many windows failed, output could not be
//!   written, input PDF unreadable). Returned as `Err(RulesError)` from the
//!   top-level entry points.
//!
//! * [`ServiceError`] — **Per window**: one extraction call failed. Transient
//!   failures are retried; permanent ones are recorded immediately. Either way
//!   the window ends up in `PipelineResult::failed_windows`, not in an `Err`.
//!
//! * [`ParseError`] / [`ValidationError`] — **Per response / per rule**: a
//!   model answer without usable JSON, or a rule object missing a field. These
//!   are downgraded to warnings on the result and never abort a run alone.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the specbook-rules library.
#[derive(Debug, Error)]
pub enum RulesError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Window/overlap sizing or another option is invalid. Raised before any
    /// extraction call is made.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// The document has no pages, so there is nothing to window.
    #[error("Document '{document}' has no pages")]
    EmptyDocument { document: String },

    /// The share of failed windows reached the configured abort threshold.
    #[error(
        "Extraction aborted: {failed}/{total} windows failed (threshold {threshold:.2}).\n\
First error: {first_error}"
    )]
    PipelineAborted {
        failed: usize,
        total: usize,
        threshold: f64,
        first_error: String,
    },

    /// The assembled rules document could not be handed to the sink.
    #[error("Failed to write rules output '{key}': {detail}")]
    SinkWrite { key: String, detail: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none (or a wrong one) was provided.
    #[error("PDF '{path}' is encrypted; provide the correct password")]
    PasswordRequired { path: PathBuf },

    /// A page could not be rendered or encoded.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single extraction call.
///
/// Returned by [`crate::pipeline::extract::ExtractionClient::extract`]. The
/// orchestrator decides whether to retry based on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Rate limit, timeout or server-side failure. Worth retrying.
    #[error("transient service error: {0}")]
    Transient(String),

    /// Authentication failure or malformed request. Retrying cannot help.
    #[error("permanent service error: {0}")]
    Permanent(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

/// Final failure recorded for a window once the retry policy gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum WindowError {
    /// Transient errors on every attempt.
    #[error("window {window}: extraction failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        window: usize,
        attempts: u32,
        detail: String,
    },

    /// A permanent error; no retry was made.
    #[error("window {window}: extraction failed permanently: {detail}")]
    Permanent { window: usize, detail: String },
}

impl WindowError {
    pub fn window(&self) -> usize {
        match self {
            WindowError::RetriesExhausted { window, .. } | WindowError::Permanent { window, .. } => {
                *window
            }
        }
    }
}

/// A model response that held no usable structured data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response is empty")]
    EmptyResponse,

    #[error("no JSON object or array found in response")]
    NoStructuredData,

    #[error("JSON has no rule list (expected an object with \"rules\", an array, or a rule object)")]
    UnexpectedShape,
}

/// A single candidate rule that was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("rule #{position} is not a JSON object")]
    NotAnObject { position: usize },

    #[error("rule #{position} is missing required field '{field}'")]
    MissingField { position: usize, field: &'static str },

    #[error("rule #{position} has an invalid '{field}': {detail}")]
    InvalidField {
        position: usize,
        field: &'static str,
        detail: String,
    },

    #[error("rule #{position} has an empty trade")]
    EmptyTrade { position: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_aborted_display() {
        let e = RulesError::PipelineAborted {
            failed: 4,
            total: 4,
            threshold: 1.0,
            first_error: "permanent service error: 401".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("4/4"), "got: {msg}");
        assert!(msg.contains("401"), "got: {msg}");
    }

    #[test]
    fn sink_write_display() {
        let e = RulesError::SinkWrite {
            key: "outputs/spec_rules.json".into(),
            detail: "disk full".into(),
        };
        assert!(e.to_string().contains("outputs/spec_rules.json"));
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn service_error_transience() {
        assert!(ServiceError::Transient("429".into()).is_transient());
        assert!(!ServiceError::Permanent("401".into()).is_transient());
    }

    #[test]
    fn window_error_reports_window() {
        let e = WindowError::RetriesExhausted {
            window: 3,
            attempts: 3,
            detail: "timeout".into(),
        };
        assert_eq!(e.window(), 3);
        assert!(e.to_string().contains("after 3 attempts"));
        let e = WindowError::Permanent {
            window: 2,
            detail: "bad key".into(),
        };
        assert_eq!(e.window(), 2);
    }

    #[test]
    fn validation_error_names_field() {
        let e = ValidationError::MissingField {
            position: 2,
            field: "description",
        };
        assert_eq!(e.to_string(), "rule #2 is missing required field 'description'");
    }
}
