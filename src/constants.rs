//! Relay-wide constants.
//!
//! Wire limits of the local socket protocol live next to the timing knobs
//! used by the worker threads so that the two stay easy to audit together.

// Rust guideline compliant 2025-01

use std::time::Duration;

// ============================================================================
// Local socket protocol
// ============================================================================

/// Well-known socket path local producers connect to.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/aws-iot-demo-agent-ipc-node";

/// Size of one frame read from a client connection.
///
/// Every read is parsed on its own, so a JSON message longer than this
/// never parses.
pub const FRAME_CHUNK_SIZE: usize = 100;

/// Pending-connection backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 5;

/// Any frame containing these bytes closes the client connection.
pub const QUIT_TOKEN: &[u8] = b"quit";

/// Maximum Unix socket path length (macOS `sun_path` is 104 bytes, Linux 108).
pub const MAX_SOCKET_PATH: usize = 104;

// ============================================================================
// Producer defaults
// ============================================================================

/// Topic the main-loop producer publishes on when none is configured.
pub const DEFAULT_TOPIC: &str = "test/topic";

/// Message the main-loop producer publishes when none is configured.
pub const DEFAULT_MESSAGE: &str = "Hello world!";

/// Number of main-loop publishes when none is configured.
pub const DEFAULT_MESSAGE_COUNT: u32 = 10;

/// Seconds between main-loop publishes when none is configured.
pub const DEFAULT_PUB_INTERVAL_SECS: u64 = 1;

// ============================================================================
// Timeouts & polling
// ============================================================================

/// Delay before retrying after a failed `accept()`.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// HTTP request timeout for the bridge broker client.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the binary checks the signal flag while idling.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// User-Agent header sent by the HTTP bridge client.
pub fn user_agent() -> String {
    format!("topic-relay/{}", env!("CARGO_PKG_VERSION"))
}
