//! Topic relay - forwards JSON messages from a local Unix socket to a broker.
//!
//! Local processes connect to a Unix domain socket and write frames like
//! `{"topic":"t","data":{...}}`. The relay turns each frame into a
//! [`PublishEntry`], queues it, and a single drain thread publishes queued
//! entries through a [`BrokerClient`] in FIFO order.
//!
//! # Architecture
//!
//! ```text
//! clients ─► IngestionListener ─┐
//!                               ├─► OutboundQueue ─► drain thread ─► BrokerClient
//!            MessageProducer ───┘
//! ```
//!
//! - **IngestionListener** - accepts one client at a time on a continuous worker
//! - **OutboundQueue** - unbounded (or bounded) FIFO drained by an on-demand worker
//! - **MessageProducer** - periodic publisher on the same queue
//! - **BrokerClient** - non-blocking publish capability with completion callbacks
//!
//! # Modules
//!
//! - [`worker`] - named background thread with continuous and on-demand modes
//! - [`queue`] - outbound queue and the [`PublishSink`] capability
//! - [`listener`] - Unix socket ingestion
//! - [`message`] - frame codec
//! - [`broker`] - broker clients
//! - [`config`] - configuration loading

// Rust guideline compliant 2025-01

pub mod broker;
pub mod client;
pub mod config;
pub mod constants;
pub mod listener;
pub mod message;
pub mod producer;
pub mod queue;
pub mod stats;
pub mod worker;

// Re-export commonly used types
pub use broker::{BrokerClient, HttpBroker, LogBroker, PublishCallback, PublishError};
pub use client::RelayClient;
pub use config::RelayConfig;
pub use listener::IngestionListener;
pub use message::{FrameError, PublishEntry};
pub use producer::{MessageProducer, ProducerSettings};
pub use queue::{OutboundQueue, OverflowPolicy, PublishSink, QueueCapacity, QueueHandle};
pub use stats::{RelayStats, StatsSnapshot};
pub use worker::{StopToken, Waker, WorkerMode, WorkerThread};
