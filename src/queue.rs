//! Outbound queue: the single serialization point in front of the broker.
//!
//! Any number of producers call [`PublishSink::enqueue`]; one on-demand
//! [`WorkerThread`] drains the queue in FIFO order and is the only thread
//! that ever touches the [`BrokerClient`].
//!
//! ```text
//! listener ──┐
//!            ├─► enqueue ─► VecDeque<PublishEntry> ─► drain thread ─► BrokerClient::publish
//! producer ──┘   (mutex)         wake() ──────────────────▲
//! ```
//!
//! Entries leave the queue before their publish is attempted and are never
//! put back; publish failures only show up through the completion callback
//! (logged and counted in [`RelayStats`]).
//!
//! Shutdown drains to empty: every entry whose `enqueue` returned before
//! [`OutboundQueue::shutdown`] was called reaches the broker client.

// Rust guideline compliant 2025-01

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::broker::BrokerClient;
use crate::message::PublishEntry;
use crate::stats::RelayStats;
use crate::worker::{Waker, WorkerThread};

/// Publish-submission capability shared by every producer.
pub trait PublishSink: Send + Sync {
    /// Queue `payload` for publishing on `topic`. Never blocks on delivery.
    fn enqueue(&self, topic: String, payload: Bytes);

    /// Queue an already-built entry.
    fn submit(&self, entry: PublishEntry) {
        let (topic, payload) = entry.into_parts();
        self.enqueue(topic, payload);
    }
}

/// What a bounded queue does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending entry to admit the new one.
    #[default]
    DropOldest,
    /// Discard the incoming entry.
    DropNewest,
}

/// Capacity limit of the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueCapacity {
    /// Grow without limit; producers are never pushed back.
    #[default]
    Unbounded,
    /// Hold at most `limit` entries, applying `policy` on overflow.
    Bounded {
        /// Maximum pending entries (treated as at least 1).
        limit: usize,
        /// Overflow behaviour.
        policy: OverflowPolicy,
    },
}

/// Pending entries plus the bookkeeping shared with every handle.
#[derive(Debug)]
struct Pending {
    entries: Mutex<VecDeque<PublishEntry>>,
    capacity: QueueCapacity,
    stats: Arc<RelayStats>,
}

impl Pending {
    fn lock(&self) -> MutexGuard<'_, VecDeque<PublishEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, entry: PublishEntry) {
        let mut entries = self.lock();
        if let QueueCapacity::Bounded { limit, policy } = self.capacity {
            if entries.len() >= limit.max(1) {
                self.stats.record_dropped();
                match policy {
                    OverflowPolicy::DropOldest => {
                        if let Some(evicted) = entries.pop_front() {
                            log::warn!("[queue] full, dropping oldest entry on {}", evicted.topic());
                        }
                    }
                    OverflowPolicy::DropNewest => {
                        log::warn!("[queue] full, dropping new entry on {}", entry.topic());
                        return;
                    }
                }
            }
        }
        entries.push_back(entry);
        self.stats.record_enqueued();
    }

    fn pop(&self) -> Option<PublishEntry> {
        self.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Cloneable submitter for an [`OutboundQueue`].
#[derive(Debug, Clone)]
pub struct QueueHandle {
    pending: Arc<Pending>,
    waker: Waker,
}

impl PublishSink for QueueHandle {
    fn enqueue(&self, topic: String, payload: Bytes) {
        self.pending.push(PublishEntry::new(topic, payload));
        self.waker.wake();
    }
}

/// FIFO publish queue drained by its own on-demand worker thread.
#[derive(Debug)]
pub struct OutboundQueue {
    pending: Arc<Pending>,
    worker: WorkerThread,
}

impl OutboundQueue {
    /// Start an unbounded queue that publishes through `broker`.
    pub fn start(broker: Box<dyn BrokerClient>, stats: Arc<RelayStats>) -> Result<Self> {
        Self::with_capacity(broker, QueueCapacity::Unbounded, stats)
    }

    /// Start a queue with an explicit capacity policy.
    pub fn with_capacity(
        mut broker: Box<dyn BrokerClient>,
        capacity: QueueCapacity,
        stats: Arc<RelayStats>,
    ) -> Result<Self> {
        let pending = Arc::new(Pending {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            stats,
        });

        let drain_pending = Arc::clone(&pending);
        let mut worker = WorkerThread::on_demand("relay-drain", move || {
            drain(&drain_pending, broker.as_mut());
        });
        worker.start()?;
        log::info!("[queue] outbound queue started ({capacity:?})");

        Ok(Self { pending, worker })
    }

    /// Submitter that can be cloned into producer threads.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            pending: Arc::clone(&self.pending),
            waker: self.worker.waker(),
        }
    }

    /// Entries waiting for the drain thread.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting for the drain thread.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain everything already queued, then stop the drain thread.
    pub fn shutdown(mut self) {
        self.worker.stop();
        log::info!("[queue] outbound queue stopped");
    }
}

impl PublishSink for OutboundQueue {
    fn enqueue(&self, topic: String, payload: Bytes) {
        self.pending.push(PublishEntry::new(topic, payload));
        self.worker.wake();
    }
}

/// Drain body: publish head entries until the queue is empty.
fn drain(pending: &Pending, broker: &mut dyn BrokerClient) {
    while let Some(entry) = pending.pop() {
        let (topic, payload) = entry.into_parts();
        log::debug!("[queue] publishing {} bytes on {topic}", payload.len());
        pending.stats.record_published();

        let stats = Arc::clone(&pending.stats);
        let acked_topic = topic.clone();
        broker.publish(
            &topic,
            payload,
            Box::new(move |outcome| match outcome {
                Ok(()) => {
                    stats.record_acknowledged();
                    log::info!("[queue] publish complete on topic {acked_topic}");
                }
                Err(e) => {
                    stats.record_failed();
                    log::warn!("[queue] publish failed on topic {acked_topic}: {e}");
                }
            }),
        );
    }
}
