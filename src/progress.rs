//! Progress-callback trait for per-document convert events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::BotConfigBuilder::progress_callback`] to receive events as
//! the pipeline renders each HTML document. The CLI uses it to drive a
//! terminal progress bar; a chat front end could use it to post "3/10 done"
//! status messages.
//!
//! # Example
//!
//! ```rust
//! use html2pdf_bot::{BotConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, name: &str, index: usize, total: usize, pdf_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{index}/{total} {name} → {pdf_len} bytes");
//!     }
//! }
//!
//! let config = BotConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { completed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the pipeline while a convert batch is running.
///
/// Renders may run concurrently (see [`crate::config::BotConfig::concurrency`]),
/// so the per-document methods can be called from several tasks at once.
/// All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once before any document is rendered.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called just before a document is handed to the renderer.
    ///
    /// `index` is 1-based in filename order.
    fn on_document_start(&self, name: &str, index: usize, total: usize) {
        let _ = (name, index, total);
    }

    /// Called when a document rendered successfully.
    fn on_document_complete(&self, name: &str, index: usize, total: usize, pdf_len: usize) {
        let _ = (name, index, total, pdf_len);
    }

    /// Called when a document failed to render.
    fn on_document_error(&self, name: &str, index: usize, total: usize, error: &str) {
        let _ = (name, index, total, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BotConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        batch_total: AtomicUsize,
        batch_success: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total: usize) {
            self.batch_total.store(total, Ordering::SeqCst);
        }

        fn on_document_start(&self, _name: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _name: &str, _index: usize, _total: usize, _len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _name: &str, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.batch_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start("a.html", 1, 2);
        cb.on_document_complete("a.html", 1, 2, 1024);
        cb.on_document_error("b.html", 2, 2, "boom");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_batch_start(3);
        tracker.on_document_start("a.html", 1, 3);
        tracker.on_document_complete("a.html", 1, 3, 10);
        tracker.on_document_start("b.html", 2, 3);
        tracker.on_document_error("b.html", 2, 3, "renderer exited with status 1");
        tracker.on_batch_complete(3, 1);

        assert_eq!(tracker.batch_total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.batch_success.load(Ordering::SeqCst), 1);
    }
}
