//! Shared pipeline counters and the statistics they snapshot into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Statistics returned from one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
    pub symbols_extracted: u64,
    pub chunks_created: u64,
    pub embeddings_generated: u64,
    pub embeddings_failed: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
    /// Per-file and per-stage failure messages, in no particular order.
    pub error_messages: Vec<String>,
}

impl IndexStats {
    /// Fold another run's statistics into this one.
    ///
    /// Counters sum, error messages concatenate, durations add up (callers
    /// aggregating runs over several roots want total wall-clock spent).
    pub fn merge(&mut self, other: &IndexStats) {
        self.files_indexed += other.files_indexed;
        self.files_skipped += other.files_skipped;
        self.files_failed += other.files_failed;
        self.symbols_extracted += other.symbols_extracted;
        self.chunks_created += other.chunks_created;
        self.embeddings_generated += other.embeddings_generated;
        self.embeddings_failed += other.embeddings_failed;
        self.duration += other.duration;
        self.error_messages.extend(other.error_messages.iter().cloned());
    }
}

impl std::fmt::Display for IndexStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "indexed {} files ({} skipped, {} failed), {} symbols, {} chunks, \
             {} embeddings ({} failed) in {:.2?}",
            self.files_indexed,
            self.files_skipped,
            self.files_failed,
            self.symbols_extracted,
            self.chunks_created,
            self.embeddings_generated,
            self.embeddings_failed,
            self.duration
        )
    }
}

/// Lock-free counters shared across pipeline tasks. Only the error-message
/// list takes a mutex; writes to it are rare.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub files_indexed: AtomicU64,
    pub files_skipped: AtomicU64,
    pub files_failed: AtomicU64,
    pub symbols_extracted: AtomicU64,
    pub chunks_created: AtomicU64,
    pub embeddings_generated: AtomicU64,
    pub embeddings_failed: AtomicU64,
    errors: Mutex<Vec<String>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure message. Poisoning is impossible here short of a
    /// panic while pushing a String, so a poisoned lock just drops the
    /// message rather than spreading the panic.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "Indexing error recorded");
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message);
        }
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot into user-facing statistics.
    pub fn snapshot(&self, duration: Duration) -> IndexStats {
        IndexStats {
            files_indexed: self.files_indexed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            symbols_extracted: self.symbols_extracted.load(Ordering::Relaxed),
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            embeddings_failed: self.embeddings_failed.load(Ordering::Relaxed),
            duration,
            error_messages: self.errors.lock().map(|e| e.clone()).unwrap_or_default(),
        }
    }
}
