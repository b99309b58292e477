//! Relay counters shared between the listener, the queue and broker callbacks.

// Rust guideline compliant 2025-01

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters describing what the relay has done so far.
///
/// Shared as `Arc<RelayStats>`; every component increments its own
/// counters and nobody resets them.
#[derive(Debug, Default)]
pub struct RelayStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
    frames_rejected: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Entries accepted into the outbound queue.
    pub enqueued: u64,
    /// Entries discarded by a bounded queue's overflow policy.
    pub dropped: u64,
    /// Entries handed to the broker client.
    pub published: u64,
    /// Publishes the broker confirmed.
    pub acknowledged: u64,
    /// Publishes the broker reported as failed.
    pub failed: u64,
    /// Socket frames that did not parse into an entry.
    pub frames_rejected: u64,
}

impl RelayStats {
    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
        }
    }
}
