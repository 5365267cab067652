//! Progress-callback trait for per-document batch events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::batch::BatchCoordinator::with_progress`] to receive events as the
//! batch moves through its documents.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a log, or a terminal progress bar without the
//! library knowing how the host application communicates. The trait is
//! `Send + Sync` because documents are processed concurrently.
//!
//! # Example
//!
//! ```rust
//! use report_authors::{BatchProgressCallback, DocumentTask, ExtractionOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, task: &DocumentTask, outcome: &ExtractionOutcome) {
//!         let done = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}: {} -> {}", task.pdf_filename(), outcome.state().label());
//!     }
//! }
//!
//! let cb: Arc<dyn BatchProgressCallback> = Arc::new(CountingCallback {
//!     finished: AtomicUsize::new(0),
//! });
//! # let _ = cb;
//! ```

use crate::output::{BatchSummary, DocumentTask, ExtractionOutcome};
use std::sync::Arc;

/// Called by the batch coordinator as documents are processed.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_document_start` may be called concurrently for different documents.
/// `on_document_complete` is called from the single consumer that writes the
/// output sink, once per document, right after its outcome is persisted.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after resume filtering and the `max_files` cap.
    ///
    /// # Arguments
    /// * `total_documents`: documents that will get an outcome this run
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document leaves `Pending`.
    fn on_document_start(&self, task: &DocumentTask) {
        let _ = task;
    }

    /// Called after a document's terminal outcome is recorded.
    fn on_document_complete(&self, task: &DocumentTask, outcome: &ExtractionOutcome) {
        let _ = (task, outcome);
    }

    /// Called once after every document has an outcome.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
