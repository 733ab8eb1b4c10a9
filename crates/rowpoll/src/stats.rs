//! Source statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time source statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStats {
    /// Total polls performed
    pub polls: u64,
    /// Polls whose query could not be resolved
    pub resolution_failures: u64,
    /// Polls that failed in the database
    pub database_failures: u64,
    /// Messages emitted
    pub messages: u64,
    /// Polls that produced no rows
    pub empty_polls: u64,
    /// Average messages per poll
    pub avg_messages_per_poll: f64,
}

/// Atomic source statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicSourceStats {
    pub polls: AtomicU64,
    pub resolution_failures: AtomicU64,
    pub database_failures: AtomicU64,
    pub messages: AtomicU64,
    pub empty_polls: AtomicU64,
}

impl AtomicSourceStats {
    /// Record a poll
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query that failed to resolve
    pub fn record_resolution_failure(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a database failure surfaced by a fetch handle
    pub fn record_database_failure(&self) {
        self.database_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the messages produced by one poll
    pub fn record_messages(&self, count: u64) {
        self.messages.fetch_add(count, Ordering::Relaxed);
        if count == 0 {
            self.empty_polls.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> SourceStats {
        let messages = self.messages.load(Ordering::Relaxed);
        let polls = self.polls.load(Ordering::Relaxed);
        let avg = if polls > 0 {
            messages as f64 / polls as f64
        } else {
            0.0
        };

        SourceStats {
            polls,
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            database_failures: self.database_failures.load(Ordering::Relaxed),
            messages,
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            avg_messages_per_poll: avg,
        }
    }
}
