//! Bounded fan-out of extraction calls with per-window retry and failure
//! isolation.
//!
//! ## Retry Strategy
//!
//! Transient errors (429, 5xx, timeouts) are frequent under concurrent load.
//! Each window retries up to `max_attempts` times with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`, capped at `max_backoff_ms`): with
//! 500 ms base and 3 attempts the waits are 500 ms → 1 s. Permanent errors
//! (auth, malformed request) are recorded on the first occurrence.
//!
//! ## Join and abort
//!
//! Outcomes are written to one slot per window, so nothing is shared between
//! in-flight calls. The function returns only after every window has an
//! outcome, unless the share of failed windows reaches `failure_threshold`,
//! in which case the stream is dropped (cancelling the calls still in
//! flight) and the run fails with [`RulesError::PipelineAborted`].

use crate::document::Window;
use crate::error::{RulesError, ServiceError, WindowError};
use crate::pipeline::extract::ExtractionClient;
use crate::pipeline::validate::locate_structured;
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Concurrency, retry and abort knobs for [`run`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionPolicy {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub failure_threshold: f64,
    pub retry_unparseable: bool,
}

impl Default for ExtractionPolicy {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            failure_threshold: 1.0,
            retry_unparseable: false,
        }
    }
}

impl ExtractionPolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Whether `failed` out of `total` windows reaches the abort threshold.
    pub fn should_abort(&self, failed: usize, total: usize) -> bool {
        failed > 0 && total > 0 && failed as f64 / total as f64 >= self.failure_threshold
    }
}

/// Extraction outcome for one window.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub window_index: usize,
    /// Model text, or the failure recorded once the retry policy gave up.
    pub payload: Result<String, WindowError>,
    /// Calls made for this window.
    pub attempts: u32,
}

/// Extract every window with at most `policy.concurrency` calls in flight.
///
/// Returns one [`RawResponse`] per window, ordered by window index regardless
/// of completion order.
pub async fn run(
    windows: &[Window],
    client: &dyn ExtractionClient,
    policy: &ExtractionPolicy,
    progress: Option<&ProgressCallback>,
) -> Result<Vec<RawResponse>, RulesError> {
    let total = windows.len();
    if let Some(cb) = progress {
        cb.on_run_start(total);
    }
    info!(
        "Extracting {} windows (concurrency {}, {} attempts max)",
        total, policy.concurrency, policy.max_attempts
    );

    let mut slots: Vec<Option<RawResponse>> = (0..total).map(|_| None).collect();
    let mut failed = 0usize;
    let mut first_error: Option<String> = None;

    let mut outcomes = stream::iter(windows.iter().enumerate().map(|(slot, window)| async move {
        let response = extract_window(window, client, policy, progress, total).await;
        (slot, response)
    }))
    .buffer_unordered(policy.concurrency.max(1));

    while let Some((slot, response)) = outcomes.next().await {
        if let Err(ref e) = response.payload {
            failed += 1;
            first_error.get_or_insert_with(|| e.to_string());
            if policy.should_abort(failed, total) {
                warn!(
                    "Aborting: {}/{} windows failed (threshold {:.2})",
                    failed, total, policy.failure_threshold
                );
                return Err(RulesError::PipelineAborted {
                    failed,
                    total,
                    threshold: policy.failure_threshold,
                    first_error: first_error.unwrap_or_default(),
                });
            }
        }
        slots[slot] = Some(response);
    }

    let responses: Vec<RawResponse> = slots.into_iter().flatten().collect();
    if let Some(cb) = progress {
        cb.on_run_complete(total, total - failed);
    }
    info!("Extraction joined: {}/{} windows succeeded", total - failed, total);
    Ok(responses)
}

/// Drive one window through the retry policy. Never fails: the final error
/// is recorded in the returned payload.
async fn extract_window(
    window: &Window,
    client: &dyn ExtractionClient,
    policy: &ExtractionPolicy,
    progress: Option<&ProgressCallback>,
    total: usize,
) -> RawResponse {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    let error = loop {
        attempt += 1;
        if attempt == 1 {
            if let Some(cb) = progress {
                cb.on_window_start(window.index, total);
            }
        }

        let result = match client.extract(window).await {
            Ok(payload)
                if policy.retry_unparseable
                    && attempt < max_attempts
                    && locate_structured(&payload).is_err() =>
            {
                Err(ServiceError::Transient("response contained no JSON".into()))
            }
            other => other,
        };

        match result {
            Ok(payload) => {
                debug!(
                    "Window {} (pages {}-{}): {} bytes after {} attempt(s)",
                    window.index,
                    window.start_page,
                    window.end_page,
                    payload.len(),
                    attempt
                );
                if let Some(cb) = progress {
                    cb.on_window_complete(window.index, total, payload.len());
                }
                return RawResponse {
                    window_index: window.index,
                    payload: Ok(payload),
                    attempts: attempt,
                };
            }
            Err(ServiceError::Transient(detail)) if attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Window {}: attempt {}/{} failed: {}; retrying in {:?}",
                    window.index, attempt, max_attempts, detail, delay
                );
                if let Some(cb) = progress {
                    cb.on_window_retry(window.index, attempt, &detail);
                }
                sleep(delay).await;
            }
            Err(ServiceError::Transient(detail)) => {
                break WindowError::RetriesExhausted {
                    window: window.index,
                    attempts: attempt,
                    detail,
                };
            }
            Err(ServiceError::Permanent(detail)) => {
                break WindowError::Permanent {
                    window: window.index,
                    detail,
                };
            }
        }
    };

    warn!("{}", error);
    if let Some(cb) = progress {
        cb.on_window_error(window.index, total, &error.to_string());
    }
    RawResponse {
        window_index: window.index,
        payload: Err(error),
        attempts: attempt,
    }
}
