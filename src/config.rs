//! Configuration types for rule extraction.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Window sizing, retry policy and the abort
//! threshold are plain data here so tests can inject any failure tolerance
//! without touching orchestration code.

use crate::error::RulesError;
use crate::pipeline::assemble::DEFAULT_OUTPUT_PREFIX;
use crate::pipeline::orchestrate::ExtractionPolicy;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_TRADES;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Configuration for a rule-extraction run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use specbook_rules::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .window_size(6)
///     .overlap(2)
///     .concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.window_size, 6);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Pages per extraction window. Default: 5.
    ///
    /// Larger windows give the model more context per call but raise the
    /// per-call token bill and the chance of truncated output.
    pub window_size: usize,

    /// Pages shared by consecutive windows. Default: 1. Must be `< window_size`.
    ///
    /// Overlap lets a rule that starts at the bottom of one window and ends at
    /// the top of the next be read whole; the aggregator removes the repeats.
    pub overlap: usize,

    /// Maximum extraction calls in flight at once. Default: 4.
    pub concurrency: usize,

    /// Total attempts per window for transient failures. Default: 3.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound on a single retry delay in milliseconds. Default: 8000.
    pub max_backoff_ms: u64,

    /// Fraction of failed windows at which the run is aborted, in `(0, 1]`.
    /// Default: 1.0 (abort only when every window failed).
    pub failure_threshold: f64,

    /// Re-request a window whose answer contains no JSON at all, as if the
    /// call had failed transiently. Default: false.
    pub retry_unparseable: bool,

    /// Trades the model is asked to extract rules for.
    pub trades: Vec<String>,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per window. Default: 8192.
    ///
    /// A dense five-page window can list dozens of rules; a low limit cuts
    /// the JSON off mid-array and the whole window is lost to parsing.
    pub max_tokens: usize,

    /// Per-call deadline for the LLM in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Maximum rendered image dimension in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Prefix (directory) under which `{document}_rules.json` is written.
    /// Default: "outputs".
    pub output_prefix: String,

    /// Optional per-window progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            overlap: 1,
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            failure_threshold: 1.0,
            retry_unparseable: false,
            trades: DEFAULT_TRADES.iter().map(|t| t.to_string()).collect(),
            system_prompt: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout_secs: 120,
            max_rendered_pixels: 2000,
            password: None,
            download_timeout_secs: 120,
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("window_size", &self.window_size)
            .field("overlap", &self.overlap)
            .field("concurrency", &self.concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .field("failure_threshold", &self.failure_threshold)
            .field("retry_unparseable", &self.retry_unparseable)
            .field("trades", &self.trades)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("output_prefix", &self.output_prefix)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExtractionProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The retry/concurrency/abort knobs the orchestrator needs.
    pub fn extraction_policy(&self) -> ExtractionPolicy {
        ExtractionPolicy {
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            retry_backoff_ms: self.retry_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            failure_threshold: self.failure_threshold,
            retry_unparseable: self.retry_unparseable,
        }
    }

    /// Check every constraint the builder enforces.
    ///
    /// Called again by the pipeline entry points so configs assembled by hand
    /// (struct literal + `..Default::default()`) fail fast too.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.window_size == 0 {
            return Err(RulesError::Configuration(
                "window size must be at least 1".into(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(RulesError::Configuration(format!(
                "overlap ({}) must be smaller than window size ({})",
                self.overlap, self.window_size
            )));
        }
        if self.concurrency == 0 {
            return Err(RulesError::Configuration("concurrency must be ≥ 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(RulesError::Configuration("max attempts must be ≥ 1".into()));
        }
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(RulesError::Configuration(format!(
                "failure threshold must be in (0, 1], got {}",
                self.failure_threshold
            )));
        }
        if self.trades.iter().all(|t| t.trim().is_empty()) {
            return Err(RulesError::Configuration(
                "at least one trade must be configured".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn window_size(mut self, pages: usize) -> Self {
        self.config.window_size = pages;
        self
    }

    pub fn overlap(mut self, pages: usize) -> Self {
        self.config.overlap = pages;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn failure_threshold(mut self, fraction: f64) -> Self {
        self.config.failure_threshold = fraction;
        self
    }

    pub fn retry_unparseable(mut self, v: bool) -> Self {
        self.config.retry_unparseable = v;
        self
    }

    pub fn trades<I, S>(mut self, trades: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.trades = trades.into_iter().map(Into::into).collect();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.output_prefix = prefix.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, RulesError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
