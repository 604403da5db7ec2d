//! Top-level entry points.
//!
//! [`extract_rules`] is the core: any [`PageSource`], any
//! [`ExtractionClient`]. The `*_pdf_*` helpers wire in the pdfium page source
//! and the LLM-backed client for the common "PDF in, JSON file out" case.

use crate::config::PipelineConfig;
use crate::document::{Document, PageSource};
use crate::error::RulesError;
use crate::output::{PipelineResult, RunStats};
use crate::pipeline::aggregate::{aggregate, Aggregated};
use crate::pipeline::assemble::{assemble, output_key, FileSink, RuleSink};
use crate::pipeline::chunk::{chunk, WindowSpan};
use crate::pipeline::extract::{ExtractionClient, LlmExtractionClient};
use crate::pipeline::orchestrate;
use crate::pipeline::render::PdfPageSource;
use crate::pipeline::validate::validate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Extract, validate and aggregate the rules of one document.
///
/// # Returns
/// `Ok(PipelineResult)` when the run completed, even if some windows failed
/// (check `result.failed_windows` and `result.warnings`).
///
/// # Errors
/// Returns `Err(RulesError)` only for fatal errors:
/// - Invalid configuration (before any page is loaded)
/// - The page source failed or the document has no pages
/// - The share of failed windows reached `failure_threshold`
pub async fn extract_rules(
    document_id: &str,
    source: &dyn PageSource,
    client: &dyn ExtractionClient,
    config: &PipelineConfig,
) -> Result<PipelineResult, RulesError> {
    let total_start = Instant::now();
    config.validate()?;
    info!("Starting rule extraction: {}", document_id);

    // ── Step 1: Load pages ───────────────────────────────────────────────
    let pages = source.load_pages().await?;
    if pages.is_empty() {
        return Err(RulesError::EmptyDocument {
            document: document_id.to_string(),
        });
    }
    let document = Document::new(document_id, pages);
    let total_pages = document.page_count();

    // ── Step 2: Plan windows ─────────────────────────────────────────────
    let windows = document.windows(config.window_size, config.overlap)?;
    info!(
        "{} pages → {} windows of up to {} pages (overlap {})",
        total_pages,
        windows.len(),
        config.window_size,
        config.overlap
    );

    // ── Step 3: Extract concurrently ─────────────────────────────────────
    let extract_start = Instant::now();
    let responses = orchestrate::run(
        &windows,
        client,
        &config.extraction_policy(),
        config.progress_callback.as_ref(),
    )
    .await?;
    let extraction_duration_ms = extract_start.elapsed().as_millis() as u64;

    // ── Step 4: Validate each window, in window order ────────────────────
    let mut warnings = Vec::new();
    let mut failed_windows = BTreeSet::new();
    let mut batches = Vec::with_capacity(windows.len());
    let mut validated_rules = 0;
    let mut rejected_rules = 0;

    for (window, response) in windows.iter().zip(&responses) {
        if response.payload.is_err() {
            failed_windows.insert(window.index);
        }
        let checked = validate(window, response);
        validated_rules += checked.rules.len();
        rejected_rules += checked.rejected;
        warnings.extend(checked.warnings);
        batches.push((checked.window_index, checked.rules));
    }

    // ── Step 5: Group and deduplicate ────────────────────────────────────
    let Aggregated {
        groups,
        duplicates_merged,
    } = aggregate(batches);

    let stats = RunStats {
        total_pages,
        window_count: windows.len(),
        failed_windows: failed_windows.len(),
        validated_rules,
        rejected_rules,
        duplicates_merged,
        rule_count: groups.rule_count(),
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {} rules in {} trades, {}/{} windows failed, {} warnings, {}ms",
        stats.rule_count,
        groups.trade_count(),
        stats.failed_windows,
        stats.window_count,
        warnings.len(),
        stats.total_duration_ms
    );

    Ok(PipelineResult {
        document_id: document_id.to_string(),
        groups,
        failed_windows,
        warnings,
        stats,
    })
}

/// Where [`extract_rules_to_sink`] wrote the document, plus the run result.
#[derive(Debug, Clone)]
pub struct WrittenRules {
    pub key: String,
    pub bytes: usize,
    pub result: PipelineResult,
}

/// [`extract_rules`], then assemble the JSON document and write it to `sink`
/// under `{config.output_prefix}/{document_id}_rules.json`.
///
/// A sink failure is fatal ([`RulesError::SinkWrite`]) even though the
/// extraction itself succeeded.
pub async fn extract_rules_to_sink(
    document_id: &str,
    source: &dyn PageSource,
    client: &dyn ExtractionClient,
    sink: &dyn RuleSink,
    config: &PipelineConfig,
) -> Result<WrittenRules, RulesError> {
    let result = extract_rules(document_id, source, client, config).await?;
    let body = assemble(&result.groups).to_json()?;
    let key = output_key(&config.output_prefix, document_id);

    sink.write(&key, &body).await?;
    info!("Rules written to {}", key);

    Ok(WrittenRules {
        key,
        bytes: body.len(),
        result,
    })
}

/// Extract rules from a PDF (local path or URL) with the LLM provider
/// resolved from `config` or the environment.
pub async fn extract_pdf_rules(
    input: &str,
    config: &PipelineConfig,
) -> Result<PipelineResult, RulesError> {
    config.validate()?;
    let client = LlmExtractionClient::from_config(config)?;
    let source = PdfPageSource::open(input, config).await?;
    extract_rules(&source.document_id(), &source, &client, config).await
}

/// [`extract_pdf_rules`] and write the document below `output_dir`.
pub async fn extract_pdf_rules_to_dir(
    input: &str,
    output_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<WrittenRules, RulesError> {
    config.validate()?;
    let client = LlmExtractionClient::from_config(config)?;
    let source = PdfPageSource::open(input, config).await?;
    let sink = FileSink::new(output_dir.as_ref());
    extract_rules_to_sink(&source.document_id(), &source, &client, &sink, config).await
}

/// Page count and window plan, without loading pages or calling a model.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentPlan {
    pub document_id: String,
    pub page_count: usize,
    pub windows: Vec<WindowSpan>,
}

/// Plan the windows for `source` under `config`.
pub async fn plan(
    document_id: &str,
    source: &dyn PageSource,
    config: &PipelineConfig,
) -> Result<DocumentPlan, RulesError> {
    config.validate()?;
    let page_count = source.page_count().await?;
    if page_count == 0 {
        return Err(RulesError::EmptyDocument {
            document: document_id.to_string(),
        });
    }
    let windows = chunk(page_count, config.window_size, config.overlap)?;
    debug!("Planned {} windows for {}", windows.len(), document_id);
    Ok(DocumentPlan {
        document_id: document_id.to_string(),
        page_count,
        windows,
    })
}

/// Inspect a PDF: page count and window plan.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(input: &str, config: &PipelineConfig) -> Result<DocumentPlan, RulesError> {
    let source = PdfPageSource::open(input, config).await?;
    plan(&source.document_id(), &source, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{StaticPages, Window};
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractionClient for CountingClient {
        async fn extract(&self, window: &Window) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                r#"{{"rules": [{{"trade": "tiler", "description": "Window {} rule",
                   "requirements": [], "source_pages": [{}]}}]}}"#,
                window.index, window.start_page
            ))
        }
    }

    fn client() -> CountingClient {
        CountingClient {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_call() {
        let config = PipelineConfig {
            window_size: 3,
            overlap: 3,
            ..Default::default()
        };
        let c = client();
        let err = extract_rules("d", &StaticPages::from_text(["a"]), &c, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, RulesError::Configuration(_)));
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_document_is_fatal() {
        let err = extract_rules("blank", &StaticPages::default(), &client(), &PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RulesError::EmptyDocument { ref document } if document == "blank"));
    }

    #[tokio::test]
    async fn single_page_document_is_one_window() {
        let c = client();
        let result = extract_rules("one", &StaticPages::from_text(["only page"]), &c, &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.stats.window_count, 1);
        assert_eq!(result.stats.total_pages, 1);
        assert_eq!(result.groups.get("tiler").unwrap()[0].source_window, "one_chunk_1");
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn plan_matches_window_layout() {
        let pages = StaticPages::from_text((1..=12).map(|i| format!("p{i}")));
        let plan = plan("book", &pages, &PipelineConfig::default()).await.unwrap();
        assert_eq!(plan.page_count, 12);
        let ranges: Vec<(usize, usize)> =
            plan.windows.iter().map(|w| (w.start_page, w.end_page)).collect();
        assert_eq!(ranges, vec![(1, 5), (5, 9), (9, 12)]);
    }
}
