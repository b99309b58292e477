//! Socket frame codec and the [`PublishEntry`] it produces.
//!
//! Clients write UTF-8 JSON objects of the form
//!
//! ```text
//! {"topic":"test/topic_relay","data":{"position":1,"powerstate":"on"}}
//! ```
//!
//! The listener reads the socket in [`FRAME_CHUNK_SIZE`] chunks and hands
//! each chunk to [`parse_frame`]. Only `topic` (string) and `data` (any JSON
//! value) are interpreted; `data` is re-serialized to compact JSON, in the
//! client's member order, and becomes the payload. Bytes after the first
//! complete JSON value in a chunk are ignored, which is what lets
//! [`encode_frame`] pad frames with spaces.

// Rust guideline compliant 2025-01

use bytes::Bytes;
use serde_json::Value;

use crate::constants::{FRAME_CHUNK_SIZE, QUIT_TOKEN};

/// A topic/payload pair waiting for outbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEntry {
    topic: String,
    payload: Bytes,
}

impl PublishEntry {
    /// Create an entry from a topic and payload.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Broker topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Split into owned topic and payload.
    pub fn into_parts(self) -> (String, Bytes) {
        (self.topic, self.payload)
    }
}

/// Reasons a frame does not become a [`PublishEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame held no JSON value at all.
    Empty,
    /// The frame is not valid JSON.
    Malformed(String),
    /// The first JSON value is not an object.
    NotAnObject,
    /// `topic` is absent or not a string.
    MissingTopic,
    /// `data` is absent.
    MissingData,
    /// An encoded frame would not fit in one chunk.
    TooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::Malformed(msg) => write!(f, "malformed JSON: {msg}"),
            Self::NotAnObject => write!(f, "frame is not a JSON object"),
            Self::MissingTopic => write!(f, "missing string field 'topic'"),
            Self::MissingData => write!(f, "missing field 'data'"),
            Self::TooLarge(len) => write!(
                f,
                "frame is {len} bytes, limit is {FRAME_CHUNK_SIZE}"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parse one socket frame into a [`PublishEntry`].
pub fn parse_frame(frame: &[u8]) -> Result<PublishEntry, FrameError> {
    let mut values = serde_json::Deserializer::from_slice(frame).into_iter::<Value>();
    let value = match values.next() {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(FrameError::Malformed(e.to_string())),
        None => return Err(FrameError::Empty),
    };

    let Value::Object(mut fields) = value else {
        return Err(FrameError::NotAnObject);
    };

    let topic = match fields.remove("topic") {
        Some(Value::String(topic)) => topic,
        _ => return Err(FrameError::MissingTopic),
    };
    let data = fields.remove("data").ok_or(FrameError::MissingData)?;
    let payload = serde_json::to_vec(&data).map_err(|e| FrameError::Malformed(e.to_string()))?;

    Ok(PublishEntry::new(topic, payload))
}

/// Whether the raw frame carries the connection-closing token.
///
/// This is a plain substring match over the bytes, so a topic or payload
/// that happens to contain `quit` closes the connection too.
pub fn contains_quit(frame: &[u8]) -> bool {
    frame
        .windows(QUIT_TOKEN.len())
        .any(|window| window == QUIT_TOKEN)
}

/// Encode a client frame, padded with spaces to exactly one chunk.
///
/// Padding keeps consecutive frames from sharing a read on the listener.
pub fn encode_frame(topic: &str, data: &Value) -> Result<Vec<u8>, FrameError> {
    let mut frame = serde_json::to_vec(&serde_json::json!({ "topic": topic, "data": data }))
        .map_err(|e| FrameError::Malformed(e.to_string()))?;
    if frame.len() > FRAME_CHUNK_SIZE {
        return Err(FrameError::TooLarge(frame.len()));
    }
    frame.resize(FRAME_CHUNK_SIZE, b' ');
    Ok(frame)
}

/// A padded frame that only carries the quit token.
pub fn quit_frame() -> Vec<u8> {
    let mut frame = QUIT_TOKEN.to_vec();
    frame.resize(FRAME_CHUNK_SIZE, b' ');
    frame
}
