//! Progress-callback trait for per-window extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through the windows.
//!
//! # Example
//!
//! ```rust
//! use specbook_rules::{ExtractionProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_window_complete(&self, window: usize, total: usize, payload_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("window {window}/{total} done ({payload_len} bytes)");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each window.
///
/// Windows are processed concurrently, so every method except
/// `on_run_start`/`on_run_complete` may be called from several tasks at once.
/// All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before the first extraction call.
    fn on_run_start(&self, total_windows: usize) {
        let _ = total_windows;
    }

    /// Called once per window, before its first call is sent (1-based
    /// `window`). Later attempts are reported through `on_window_retry`.
    fn on_window_start(&self, window: usize, total_windows: usize) {
        let _ = (window, total_windows);
    }

    /// Called when a transient failure is about to be retried.
    fn on_window_retry(&self, window: usize, attempt: u32, error: &str) {
        let _ = (window, attempt, error);
    }

    /// Called when a window's extraction returned a payload.
    fn on_window_complete(&self, window: usize, total_windows: usize, payload_len: usize) {
        let _ = (window, total_windows, payload_len);
    }

    /// Called when a window is given up on.
    fn on_window_error(&self, window: usize, total_windows: usize, error: &str) {
        let _ = (window, total_windows, error);
    }

    /// Called once after every window has been attempted (not on abort).
    fn on_run_complete(&self, total_windows: usize, success_count: usize) {
        let _ = (total_windows, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        retries: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_window_start(&self, _window: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_window_retry(&self, _window: usize, _attempt: u32, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn on_window_complete(&self, _window: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_window_error(&self, _window: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3);
        cb.on_window_start(1, 3);
        cb.on_window_retry(1, 1, "429");
        cb.on_window_complete(1, 3, 42);
        cb.on_window_error(2, 3, "401");
        cb.on_run_complete(3, 2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_window_start(1, 2);
        tracker.on_window_retry(1, 1, "timeout");
        tracker.on_window_complete(1, 2, 100);
        tracker.on_window_start(2, 2);
        tracker.on_window_error(2, 2, "bad request");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.retries.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
