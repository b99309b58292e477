//! Periodic publisher that runs alongside the socket listener.
//!
//! Enqueues a fixed message (or the output of a script) on one topic at a
//! fixed interval. It feeds the same [`PublishSink`] as the listener, so its
//! entries interleave with client frames in enqueue order.

// Rust guideline compliant 2025-01

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::queue::PublishSink;
use crate::worker::{StopToken, WorkerThread};

/// What the producer publishes, and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Topic every message goes to.
    pub topic: String,
    /// Literal payload, or the path of a script whose output is the payload.
    pub message: String,
    /// Number of ticks; 0 runs until stopped.
    pub count: u32,
    /// Delay between ticks.
    pub interval: Duration,
}

/// Handle to a running producer thread.
#[derive(Debug)]
pub struct MessageProducer {
    worker: WorkerThread,
}

impl MessageProducer {
    /// Start publishing on a dedicated thread.
    pub fn start(settings: ProducerSettings, sink: Arc<dyn PublishSink>) -> Result<Self> {
        log::info!(
            "[producer] publishing to {} every {:?} ({})",
            settings.topic,
            settings.interval,
            if settings.count == 0 {
                "until stopped".to_string()
            } else {
                format!("{} times", settings.count)
            }
        );

        let mut worker = WorkerThread::continuous("relay-producer", move |stop| {
            produce(&settings, sink.as_ref(), &stop);
        });
        worker.start()?;
        Ok(Self { worker })
    }

    /// Stop the producer, interrupting any pending interval wait.
    pub fn stop(mut self) {
        self.worker.stop();
    }
}

fn produce(settings: &ProducerSettings, sink: &dyn PublishSink, stop: &StopToken) {
    let mut tick: u32 = 0;
    while !stop.is_stopped() && (settings.count == 0 || tick < settings.count) {
        tick = tick.saturating_add(1);

        match resolve_payload(&settings.message) {
            Ok(Some(payload)) => {
                log::debug!("[producer] tick {tick}: {} bytes", payload.len());
                sink.enqueue(settings.topic.clone(), payload.into());
            }
            Ok(None) => log::debug!("[producer] tick {tick}: empty message, skipped"),
            Err(e) => log::warn!("[producer] tick {tick} skipped: {e:#}"),
        }

        if settings.count != 0 && tick >= settings.count {
            break;
        }
        if stop.sleep(settings.interval) {
            break;
        }
    }
    log::info!("[producer] finished after {tick} tick(s)");
}

/// Payload for one tick. `None` when there is nothing to publish.
///
/// A message naming an existing file is run with `sh -c` and its trimmed
/// stdout becomes the payload.
pub fn resolve_payload(message: &str) -> Result<Option<String>> {
    if message.is_empty() {
        return Ok(None);
    }
    if !Path::new(message).is_file() {
        return Ok(Some(message.to_string()));
    }

    let output = Command::new("sh")
        .arg("-c")
        .arg(message)
        .output()
        .with_context(|| format!("run message script: {message}"))?;
    if !output.status.success() {
        bail!("message script {message} exited with {}", output.status);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(Some(stdout).filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{mpsc, Mutex};
    use std::time::Instant;

    struct ChannelSink(Mutex<mpsc::Sender<(String, Bytes)>>);

    impl PublishSink for ChannelSink {
        fn enqueue(&self, topic: String, payload: Bytes) {
            let _ = self.0.lock().unwrap().send((topic, payload));
        }
    }

    fn settings(message: &str, count: u32, interval: Duration) -> ProducerSettings {
        ProducerSettings {
            topic: "test/topic".to_string(),
            message: message.to_string(),
            count,
            interval,
        }
    }

    fn write_script(dir: &Path, body: &str) -> String {
        let path = dir.join("message.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_publishes_count_times_then_finishes() {
        let (tx, rx) = mpsc::channel();
        let producer = MessageProducer::start(
            settings("Hello world!", 3, Duration::from_millis(10)),
            Arc::new(ChannelSink(Mutex::new(tx))),
        )
        .unwrap();

        for _ in 0..3 {
            let (topic, payload) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(topic, "test/topic");
            assert_eq!(&payload[..], b"Hello world!");
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        producer.stop();
    }

    #[test]
    fn test_stop_interrupts_interval_wait() {
        let (tx, rx) = mpsc::channel();
        let producer = MessageProducer::start(
            settings("tick", 0, Duration::from_secs(60)),
            Arc::new(ChannelSink(Mutex::new(tx))),
        )
        .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let started = Instant::now();
        producer.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_empty_message_publishes_nothing() {
        let (tx, rx) = mpsc::channel();
        let producer = MessageProducer::start(
            settings("", 3, Duration::from_millis(5)),
            Arc::new(ChannelSink(Mutex::new(tx))),
        )
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        producer.stop();
    }

    #[test]
    fn test_literal_message_is_published_as_is() {
        assert_eq!(resolve_payload("plain text").unwrap().as_deref(), Some("plain text"));
        assert_eq!(resolve_payload("").unwrap(), None);
    }

    #[test]
    fn test_script_output_becomes_payload() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = write_script(tmp.path(), r#"echo '{"temp":21}'"#);

        assert_eq!(
            resolve_payload(&script).unwrap().as_deref(),
            Some(r#"{"temp":21}"#)
        );
    }

    #[test]
    fn test_failing_script_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let script = write_script(tmp.path(), "exit 3");

        assert!(resolve_payload(&script).is_err());
    }
}
