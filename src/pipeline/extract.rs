//! The extraction capability: one window in, raw model text out.
//!
//! The orchestrator only ever sees [`ExtractionClient`], so tests can script
//! transient failures, permanent failures and malformed payloads without a
//! network. [`LlmExtractionClient`] is the production implementation over any
//! `edgequake-llm` provider.
//!
//! ## Message Layout
//!
//! 1. **System message** — the extraction prompt (or the caller's override)
//! 2. **User message** — allowed trades and the window's absolute page range,
//!    followed by the text pages (each under a `--- Page N ---` header), with
//!    the rendered page images attached in page order

use crate::config::PipelineConfig;
use crate::document::{Page, Window};
use crate::error::{RulesError, ServiceError};
use crate::prompts::{page_header, window_instructions, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Turns a window into raw model output.
///
/// Implementations must be callable concurrently for different windows and
/// must not share mutable state between calls.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    async fn extract(&self, window: &Window) -> Result<String, ServiceError>;
}

#[async_trait]
impl<T: ExtractionClient + ?Sized> ExtractionClient for Arc<T> {
    async fn extract(&self, window: &Window) -> Result<String, ServiceError> {
        (**self).extract(window).await
    }
}

/// [`ExtractionClient`] backed by a vision-capable LLM provider.
pub struct LlmExtractionClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    trades: Vec<String>,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
}

impl LlmExtractionClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            trades: config.trades.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]) and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, RulesError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn build_messages(&self, window: &Window) -> Vec<ChatMessage> {
        let (text, images) = window_content(&self.trades, window);
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(text.as_str(), images),
        ]
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionClient for LlmExtractionClient {
    async fn extract(&self, window: &Window) -> Result<String, ServiceError> {
        let start = Instant::now();
        let messages = self.build_messages(window);
        let options = self.build_options();

        let response =
            match tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
                .await
            {
                Err(_) => {
                    return Err(ServiceError::Transient(format!(
                        "LLM call timed out after {}s",
                        self.timeout.as_secs()
                    )))
                }
                Ok(Err(e)) => return Err(classify_provider_error(&e.to_string())),
                Ok(Ok(response)) => response,
            };

        debug!(
            "Window {}: {} input tokens, {} output tokens, {:?}",
            window.index,
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Split a window into the user-message text and the images to attach.
fn window_content(trades: &[String], window: &Window) -> (String, Vec<ImageData>) {
    let mut text = window_instructions(trades, window.start_page, window.end_page);
    let mut images = Vec::new();

    for (page_num, page) in window.numbered_pages() {
        match page {
            Page::Text(body) => {
                text.push_str("\n\n");
                text.push_str(&page_header(page_num));
                text.push('\n');
                text.push_str(body);
            }
            Page::Image(img) => images.push(img.clone()),
        }
    }

    (text, images)
}

static RE_TRANSIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(429|500|502|503|504)\b|rate.?limit|too many requests|timed? ?out|overloaded|unavailable|connection|temporar",
    )
    .unwrap()
});

static RE_PERMANENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(400|401|403|404)\b|unauthori[sz]ed|forbidden|authentication|invalid.?api.?key|api key not valid|permission denied|bad request|invalid.?request|content.?filter|model not found|not supported",
    )
    .unwrap()
});

/// Map a provider error message to the retry class.
///
/// Transient markers win over permanent ones, and anything unrecognised is
/// treated as transient: the retry bound keeps a wrong guess cheap.
pub fn classify_provider_error(message: &str) -> ServiceError {
    if RE_TRANSIENT.is_match(message) {
        ServiceError::Transient(message.to_string())
    } else if RE_PERMANENT.is_match(message) {
        ServiceError::Permanent(message.to_string())
    } else {
        ServiceError::Transient(message.to_string())
    }
}

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, RulesError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        RulesError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider` — used as-is
/// 2. `config.provider_name` (+ `config.model`)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. Gemini when `GEMINI_API_KEY` is set
/// 5. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, RulesError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config
            .model
            .as_deref()
            .unwrap_or_else(|| default_model_for(name));
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL);
        return create_provider("gemini", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| RulesError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {e}"
            ),
        })?;

    Ok(llm_provider)
}

/// Model used when Gemini is chosen without naming one.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Vision-capable default model for a provider chosen by name.
pub fn default_model_for(provider_name: &str) -> &'static str {
    match provider_name.to_ascii_lowercase().as_str() {
        "gemini" | "google" | "vertex" => DEFAULT_GEMINI_MODEL,
        "anthropic" | "claude" => "claude-sonnet-4-20250514",
        "ollama" | "lmstudio" => "llava",
        _ => "gpt-4.1-nano",
    }
}
