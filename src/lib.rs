//! # specbook-rules
//!
//! Extract per-trade construction rules from multi-page spec-book documents
//! using Vision Language Models.
//!
//! ## Why windows?
//!
//! A spec book is hundreds of pages; a single model call cannot read it and a
//! page-at-a-time call loses requirements that run across a page break. The
//! document is cut into overlapping page windows, each window is extracted
//! independently, and the per-window answers are validated, grouped by trade
//! and deduplicated into one document where every rule points back at the
//! pages it came from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / pages
//!  │
//!  ├─ 1. Load      PageSource (pdfium render + base64 PNG, or in-memory text)
//!  ├─ 2. Chunk     overlapping windows, e.g. 12 pages → [1-5] [5-9] [9-12]
//!  ├─ 3. Extract   bounded-concurrency calls with retry and an abort threshold
//!  ├─ 4. Validate  locate JSON in each answer, check every rule, clip pages
//!  ├─ 5. Aggregate group by trade, merge overlap duplicates
//!  └─ 6. Assemble  { "<trade>": [rule, …] } → sink
//! ```
//!
//! A run ends as a full success, a partial success (some windows failed;
//! see [`PipelineResult::failed_windows`] and [`PipelineResult::warnings`]),
//! or a typed [`RulesError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use specbook_rules::{extract_pdf_rules_to_dir, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let config = PipelineConfig::default();
//!     let written = extract_pdf_rules_to_dir("spec-book.pdf", "build", &config).await?;
//!     eprintln!("{} rules → {}", written.result.stats.rule_count, written.key);
//!     for warning in &written.result.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Bring your own model or pages
//!
//! [`extract_rules`] takes any [`PageSource`] and any [`ExtractionClient`],
//! so the pipeline runs against text pages and a scripted client in tests:
//!
//! ```rust
//! use async_trait::async_trait;
//! use specbook_rules::{extract_rules, ExtractionClient, PipelineConfig, ServiceError, StaticPages, Window};
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl ExtractionClient for Canned {
//!     async fn extract(&self, w: &Window) -> Result<String, ServiceError> {
//!         Ok(format!(
//!             r#"{{"rules": [{{"trade": "roofer", "rule_id": "R-1", "description": "Flashing",
//!                 "requirements": ["26 ga"], "source_pages": [{}]}}]}}"#,
//!             w.start_page
//!         ))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let pages = StaticPages::from_text((1..=12).map(|i| format!("page {i}")));
//! let result = extract_rules("spec", &pages, &Canned, &PipelineConfig::default()).await.unwrap();
//! assert_eq!(result.stats.window_count, 3);
//! assert_eq!(result.groups.get("roofer").unwrap().len(), 1);
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `specbook-rules` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! specbook-rules = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use document::{Document, Page, PageSource, StaticPages, Window};
pub use error::{ParseError, RulesError, ServiceError, ValidationError, WindowError};
pub use output::{normalize_trade, PipelineResult, Rule, RunStats, TradeGroup, TradeGroups};
pub use pipeline::aggregate::{aggregate, Aggregated};
pub use pipeline::assemble::{
    assemble, output_key, FileSink, MemorySink, OutputRule, RuleSink, RulesDocument,
};
pub use pipeline::chunk::{chunk, WindowSpan};
pub use pipeline::extract::{ExtractionClient, LlmExtractionClient};
pub use pipeline::orchestrate::{ExtractionPolicy, RawResponse};
pub use pipeline::render::PdfPageSource;
pub use pipeline::validate::{validate, ValidatedWindow};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use run::{
    extract_pdf_rules, extract_pdf_rules_to_dir, extract_rules, extract_rules_to_sink, inspect,
    plan, DocumentPlan, WrittenRules,
};
