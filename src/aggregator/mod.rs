//! Canonical report holder.
//!
//! Merging is lock-free for readers: every merge builds a brand-new report,
//! so a reader holding a snapshot can never observe a mutation. Only the
//! installation of the new aggregate takes a brief exclusive section.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::report::Report;

/// Owns the canonical aggregate [`Report`] for this process.
pub struct Aggregator {
    current: RwLock<Arc<Report>>,
    merge_lock: Mutex<()>,
}

impl Aggregator {
    /// Creates an aggregator holding an empty report.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Report::new())),
            merge_lock: Mutex::new(()),
        }
    }

    /// Returns the current aggregate snapshot.
    ///
    /// The returned reference stays valid and unchanged across any number
    /// of concurrent [`submit`](Self::submit) calls.
    pub fn snapshot(&self) -> Arc<Report> {
        self.current.read().clone()
    }

    /// Folds one partial report into the aggregate and publishes the
    /// result.
    ///
    /// Writers are serialized by the merge lock; the merge itself runs off
    /// the reader path, and only the final swap write-locks `current`.
    pub fn submit(&self, incoming: &Report) {
        let _writer = self.merge_lock.lock();

        let base = self.snapshot();
        let merged = Arc::new(base.merge(incoming));

        debug!(
            endpoints = merged.endpoint.len(),
            processes = merged.process.len(),
            containers = merged.container.len(),
            hosts = merged.host.len(),
            addresses = merged.addresses.len(),
            "merged partial report",
        );

        *self.current.write() = merged;
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
