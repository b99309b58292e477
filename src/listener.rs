//! Unix domain socket listener feeding the outbound queue.
//!
//! Binds a [`UnixListener`] and runs a blocking accept loop on a continuous
//! [`WorkerThread`]. Clients are served one at a time: while a connection is
//! open, nobody else is accepted.
//!
//! Per connection the listener reads [`FRAME_CHUNK_SIZE`]-byte chunks and
//! parses each one on its own (see [`crate::message`]). Valid frames go to
//! the [`PublishSink`]; invalid ones are dropped without closing the
//! connection. A chunk containing `quit` closes the connection after it has
//! been processed. The listener never writes to its clients.
//!
//! # Shutdown
//!
//! `accept()` and `read()` block with no timeout. Stopping the worker shuts
//! down the active connection's socket (unblocking `read`) and connects to
//! the listener's own path (unblocking `accept`), then the socket file is
//! removed.

// Rust guideline compliant 2025-01

use std::io::{ErrorKind, Read};
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{bail, Context, Result};

use crate::constants::{ACCEPT_RETRY_DELAY, FRAME_CHUNK_SIZE, LISTEN_BACKLOG, MAX_SOCKET_PATH};
use crate::message::{contains_quit, parse_frame};
use crate::queue::PublishSink;
use crate::stats::RelayStats;
use crate::worker::{StopToken, WorkerThread};

/// Clone of the connection currently being served, so stop can shut it down.
type ActiveConnection = Arc<Mutex<Option<UnixStream>>>;

/// Local socket endpoint that turns client frames into queued publishes.
#[derive(Debug)]
pub struct IngestionListener {
    socket_path: PathBuf,
    worker: WorkerThread,
}

impl IngestionListener {
    /// Bind `socket_path` and start accepting clients.
    ///
    /// Removes a stale socket file at the path, creates the parent
    /// directory if needed, and listens with a backlog of
    /// [`LISTEN_BACKLOG`].
    ///
    /// # Errors
    ///
    /// Returns an error if the path is too long or the socket cannot be bound.
    pub fn bind(
        socket_path: impl Into<PathBuf>,
        sink: Arc<dyn PublishSink>,
        stats: Arc<RelayStats>,
    ) -> Result<Self> {
        let socket_path = socket_path.into();
        validate_socket_path(&socket_path)?;

        if let Some(parent) = socket_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create socket dir: {}", parent.display()))?;
            }
        }

        match std::fs::remove_file(&socket_path) {
            Ok(()) => log::debug!("[listener] removed stale socket {}", socket_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("remove stale socket: {}", socket_path.display())
                })
            }
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("bind relay socket: {}", socket_path.display()))?;
        set_backlog(&listener, LISTEN_BACKLOG)?;

        log::info!("[listener] listening on {}", socket_path.display());

        let active: ActiveConnection = Arc::default();
        let loop_active = Arc::clone(&active);
        let wake_path = socket_path.clone();
        let mut worker = WorkerThread::continuous("relay-listener", move |stop| {
            accept_loop(&listener, sink.as_ref(), &stats, &loop_active, &stop);
        })
        .with_interrupt(move || interrupt(&active, &wake_path));
        worker.start()?;

        Ok(Self {
            socket_path,
            worker,
        })
    }

    /// Path of the bound socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting, close the active client and remove the socket file.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.worker.is_running() {
            return;
        }
        self.worker.stop();
        let _ = std::fs::remove_file(&self.socket_path);
        log::info!("[listener] stopped, removed {}", self.socket_path.display());
    }
}

impl Drop for IngestionListener {
    fn drop(&mut self) {
        self.close();
    }
}

fn validate_socket_path(socket_path: &Path) -> Result<()> {
    let path_len = socket_path.as_os_str().len();
    if path_len >= MAX_SOCKET_PATH {
        bail!(
            "Socket path too long ({path_len} bytes, max {}): {}",
            MAX_SOCKET_PATH - 1,
            socket_path.display()
        );
    }
    Ok(())
}

/// Re-issue `listen(2)` to apply our backlog; std binds with its own default.
fn set_backlog(listener: &UnixListener, backlog: i32) -> Result<()> {
    // SAFETY: the fd is a bound socket owned by `listener` for the whole call.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("listen on relay socket");
    }
    Ok(())
}

fn interrupt(active: &ActiveConnection, socket_path: &Path) {
    let current = active.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(stream) = current {
        let _ = stream.shutdown(Shutdown::Both);
    }
    // Unblocks a pending accept(); the loop sees the stop flag and exits.
    let _ = UnixStream::connect(socket_path);
}

/// Accept loop - runs on the listener's worker thread.
fn accept_loop(
    listener: &UnixListener,
    sink: &dyn PublishSink,
    stats: &RelayStats,
    active: &ActiveConnection,
    stop: &StopToken,
) {
    while !stop.is_stopped() {
        let stream = match listener.accept() {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                if stop.is_stopped() {
                    break;
                }
                log::error!("[listener] accept error: {e}");
                thread::sleep(ACCEPT_RETRY_DELAY);
                continue;
            }
        };
        if stop.is_stopped() {
            break;
        }

        log::info!("[listener] client connected");
        serve_connection(stream, sink, stats, active, stop);
        log::info!("[listener] client disconnected");
    }
    log::debug!("[listener] accept loop exiting");
}

/// Read frames from one client until it disconnects, errors or sends `quit`.
fn serve_connection(
    mut stream: UnixStream,
    sink: &dyn PublishSink,
    stats: &RelayStats,
    active: &ActiveConnection,
    stop: &StopToken,
) {
    match stream.try_clone() {
        Ok(clone) => *active.lock().unwrap_or_else(PoisonError::into_inner) = Some(clone),
        Err(e) => log::warn!("[listener] cannot track connection for shutdown: {e}"),
    }

    let mut buf = [0u8; FRAME_CHUNK_SIZE];
    while !stop.is_stopped() {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[listener] read error: {e}");
                break;
            }
        };
        let frame = &buf[..n];

        match parse_frame(frame) {
            Ok(entry) => {
                log::debug!("[listener] frame for topic {}", entry.topic());
                sink.submit(entry);
            }
            Err(e) => {
                stats.record_frame_rejected();
                log::debug!("[listener] dropping frame: {e}");
            }
        }

        if contains_quit(frame) {
            log::info!("[listener] quit received, closing connection");
            break;
        }
    }

    active.lock().unwrap_or_else(PoisonError::into_inner).take();
    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RelayClient;
    use crate::message::PublishEntry;
    use bytes::Bytes;
    use serde_json::json;
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(2);

    /// Sink that forwards every entry to a channel.
    struct ChannelSink(Mutex<mpsc::Sender<PublishEntry>>);

    impl PublishSink for ChannelSink {
        fn enqueue(&self, topic: String, payload: Bytes) {
            let _ = self.0.lock().unwrap().send(PublishEntry::new(topic, payload));
        }
    }

    fn start_listener(path: &Path) -> (IngestionListener, mpsc::Receiver<PublishEntry>, Arc<RelayStats>) {
        let (tx, rx) = mpsc::channel();
        let stats = Arc::new(RelayStats::default());
        let listener = IngestionListener::bind(
            path,
            Arc::new(ChannelSink(Mutex::new(tx))),
            Arc::clone(&stats),
        )
        .unwrap();
        (listener, rx, stats)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_frame_becomes_publish_entry() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (_listener, rx, _stats) = start_listener(&sock_path);

        let mut client = RelayClient::connect(&sock_path).unwrap();
        client
            .send("test/topic_relay", &json!({"position": 1, "powerstate": "on"}))
            .unwrap();

        let entry = rx.recv_timeout(TIMEOUT).expect("Timed out waiting for entry");
        assert_eq!(entry.topic(), "test/topic_relay");
        assert_eq!(&entry.payload()[..], br#"{"position":1,"powerstate":"on"}"#);
    }

    #[test]
    fn test_frames_on_one_connection_keep_order() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (_listener, rx, _stats) = start_listener(&sock_path);

        let mut client = RelayClient::connect(&sock_path).unwrap();
        for i in 0..20 {
            client.send(&format!("seq/{i}"), &json!(i)).unwrap();
        }

        for i in 0..20 {
            let entry = rx.recv_timeout(TIMEOUT).expect("Timed out");
            assert_eq!(entry.topic(), format!("seq/{i}"));
            assert_eq!(&entry.payload()[..], i.to_string().as_bytes());
        }
    }

    #[test]
    fn test_malformed_frame_is_dropped_and_connection_stays_open() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (_listener, rx, stats) = start_listener(&sock_path);

        let mut stream = UnixStream::connect(&sock_path).unwrap();
        stream.write_all(br#"{"topic":"t","data":"#).unwrap();
        assert!(wait_until(|| stats.snapshot().frames_rejected == 1));
        assert!(rx.try_recv().is_err());

        stream.write_all(br#"{"topic":"t","data":{"a":1}}"#).unwrap();
        let entry = rx.recv_timeout(TIMEOUT).expect("connection should still be open");
        assert_eq!(&entry.payload()[..], br#"{"a":1}"#);
    }

    #[test]
    fn test_quit_after_message_closes_connection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (_listener, rx, _stats) = start_listener(&sock_path);

        let mut client = RelayClient::connect(&sock_path).unwrap();
        client.send("t", &json!({"a": 1})).unwrap();
        client.quit().unwrap();

        let entry = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(entry, PublishEntry::new("t", &br#"{"a":1}"#[..]));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // The server side hangs up.
        let mut stream = client.into_stream();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_next_client_is_served_after_quit() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (_listener, rx, _stats) = start_listener(&sock_path);

        let mut first = RelayClient::connect(&sock_path).unwrap();
        first.quit().unwrap();

        let mut second = RelayClient::connect(&sock_path).unwrap();
        second.send("second", &json!(true)).unwrap();

        let entry = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(entry.topic(), "second");
    }

    #[test]
    fn test_stale_socket_file_is_replaced() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        std::fs::write(&sock_path, b"stale").unwrap();

        let (_listener, rx, _stats) = start_listener(&sock_path);

        let mut client = RelayClient::connect(&sock_path).unwrap();
        client.send("t", &json!(1)).unwrap();
        assert!(rx.recv_timeout(TIMEOUT).is_ok());
    }

    #[test]
    fn test_rebind_over_previous_listener_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");

        // A leftover socket file from a listener that died without cleanup.
        let stale = UnixListener::bind(&sock_path).unwrap();
        drop(stale);
        assert!(sock_path.exists());

        let (_listener, _rx, _stats) = start_listener(&sock_path);
        assert!(UnixStream::connect(&sock_path).is_ok());
    }

    #[test]
    fn test_shutdown_with_connected_idle_client() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("relay.sock");
        let (listener, _rx, _stats) = start_listener(&sock_path);

        let _client = UnixStream::connect(&sock_path).unwrap();
        thread::sleep(Duration::from_millis(20));

        listener.shutdown();
        assert!(!sock_path.exists());
    }

    #[test]
    fn test_shutdown_while_waiting_for_accept() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock_path = tmp.path().join("nested/dir/relay.sock");
        let (listener, _rx, _stats) = start_listener(&sock_path);
        assert_eq!(listener.socket_path(), sock_path.as_path());

        listener.shutdown();
        assert!(!sock_path.exists());
    }

    #[test]
    fn test_socket_path_length_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let long_name = "a".repeat(200);
        let sock_path = tmp.path().join(long_name).join("relay.sock");

        let (tx, _rx) = mpsc::channel();
        let result = IngestionListener::bind(
            sock_path,
            Arc::new(ChannelSink(Mutex::new(tx))),
            Arc::new(RelayStats::default()),
        );
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("too long"), "Error should mention path too long: {err_msg}");
    }
}
