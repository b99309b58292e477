//! Blocking client for the relay's ingestion socket.
//!
//! Used by the `send` subcommand and by tests. Each frame is padded to one
//! read chunk so the listener sees exactly one frame per read.

// Rust guideline compliant 2025-01

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::message::{encode_frame, quit_frame};

/// Connection to a running [`IngestionListener`](crate::listener::IngestionListener).
#[derive(Debug)]
pub struct RelayClient {
    stream: UnixStream,
}

impl RelayClient {
    /// Connect to the listener at `socket_path`.
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        let socket_path = socket_path.as_ref();
        let stream = UnixStream::connect(socket_path)
            .with_context(|| format!("connect to relay socket: {}", socket_path.display()))?;
        Ok(Self { stream })
    }

    /// Send one `{"topic", "data"}` frame.
    pub fn send(&mut self, topic: &str, data: &Value) -> Result<()> {
        let frame = encode_frame(topic, data).context("encode frame")?;
        self.stream.write_all(&frame).context("write frame")?;
        Ok(())
    }

    /// Ask the listener to close this connection.
    pub fn quit(&mut self) -> Result<()> {
        self.stream.write_all(&quit_frame()).context("write quit frame")?;
        Ok(())
    }

    /// Give up the wrapper and return the raw stream.
    pub fn into_stream(self) -> UnixStream {
        self.stream
    }
}
