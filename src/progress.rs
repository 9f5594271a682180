//! Progress-callback trait for per-document ingestion events.
//!
//! Pass an [`Arc<dyn IngestProgressCallback>`] in
//! [`crate::ingest::IngestOptions::progress`] to hear about each document as
//! it is submitted and completed. The CLI drives an `indicatif` bar from it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_ingest::IngestProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl IngestProgressCallback for Counter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, source_id: &str, records: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{source_id}: {records} records");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Called by [`crate::ingest::ingest_many`] as documents move through the
/// service.
///
/// Documents run concurrently, so methods may be called from several tasks
/// at once; protect shared state accordingly. All methods default to no-ops.
///
/// `index` is the 0-based position of the document in the batch.
pub trait IngestProgressCallback: Send + Sync {
    /// Called once before any document is submitted.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called right after the service accepted a document.
    fn on_document_submitted(&self, index: usize, total: usize, source_id: &str) {
        let _ = (index, total, source_id);
    }

    /// Called when a document's result has been fetched.
    ///
    /// `records` is the number of records that decoded.
    fn on_document_complete(&self, index: usize, total: usize, source_id: &str, records: usize) {
        let _ = (index, total, source_id, records);
    }

    /// Called when a document failed at any step.
    fn on_document_error(&self, index: usize, total: usize, source_id: &str, error: &str) {
        let _ = (index, total, source_id, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let _ = (total, success_count);
    }
}

/// Does nothing.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        submitted: AtomicUsize,
        completed: AtomicUsize,
        errors: AtomicUsize,
        successes: AtomicUsize,
    }

    impl IngestProgressCallback for Tracking {
        fn on_document_submitted(&self, _index: usize, _total: usize, _source_id: &str) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _i: usize, _t: usize, _s: &str, _records: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_error(&self, _i: usize, _t: usize, _s: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.successes.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_submitted(0, 2, "a.pdf");
        cb.on_document_complete(0, 2, "a.pdf", 12);
        cb.on_document_error(1, 2, "b.pdf", "timeout");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_through_arc() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_document_submitted(0, 2, "a.pdf");
        cb.on_document_complete(0, 2, "a.pdf", 3);
        cb.on_document_error(1, 2, "b.pdf", "HTTP 500");
        cb.on_batch_complete(2, 1);

        assert_eq!(tracker.submitted.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.successes.load(Ordering::SeqCst), 1);
    }
}
