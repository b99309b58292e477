//! HTTP bridge broker client.
//!
//! Publishes by POSTing the payload to `{base_url}/topics/{topic}?qos=1`,
//! the shape of common MQTT-over-HTTPS publish endpoints. Each `/`-separated
//! topic level becomes one percent-encoded path segment. Requests run on a
//! dedicated delivery thread so [`BrokerClient::publish`] only has to push
//! onto a channel; the delivery thread invokes each completion callback once
//! the response (or transport error) is in.

// Rust guideline compliant 2025-01

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use reqwest::blocking::Client;
use reqwest::Url;

use super::{BrokerClient, PublishCallback, PublishError};
use crate::constants::{user_agent, HTTP_REQUEST_TIMEOUT};

struct DeliveryRequest {
    topic: String,
    payload: Bytes,
    on_complete: PublishCallback,
}

/// Broker client backed by an HTTP publish endpoint.
pub struct HttpBroker {
    base_url: Url,
    /// `None` once shutdown has begun.
    request_tx: Option<mpsc::Sender<DeliveryRequest>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HttpBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBroker")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpBroker {
    /// Create the client and start its delivery thread.
    ///
    /// # Errors
    ///
    /// Fails if `base_url` is not an absolute URL that can carry a path.
    pub fn new(base_url: impl Into<String>, client_id: impl Into<String>) -> Result<Self> {
        let raw_url = base_url.into();
        let base_url = Url::parse(raw_url.trim_end_matches('/'))
            .with_context(|| format!("invalid broker URL: {raw_url}"))?;
        if base_url.cannot_be_a_base() {
            bail!("broker URL cannot carry a path: {raw_url}");
        }
        let client_id = client_id.into();
        let (request_tx, request_rx) = mpsc::channel();

        let loop_url = base_url.clone();
        let thread_handle = thread::Builder::new()
            .name("relay-http".to_string())
            .spawn(move || Self::delivery_loop(&loop_url, &client_id, &request_rx))
            .context("spawn HTTP delivery thread")?;

        log::info!("[broker] HTTP bridge at {base_url}");

        Ok(Self {
            base_url,
            request_tx: Some(request_tx),
            thread_handle: Some(thread_handle),
        })
    }

    /// Delivery loop - runs on the dedicated thread until the sender is dropped.
    fn delivery_loop(base_url: &Url, client_id: &str, request_rx: &mpsc::Receiver<DeliveryRequest>) {
        let client = match Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .user_agent(user_agent())
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                log::error!("[broker] failed to create HTTP client: {e}");
                for request in request_rx {
                    (request.on_complete)(Err(PublishError::new(
                        None,
                        format!("HTTP client unavailable: {e}"),
                    )));
                }
                return;
            }
        };

        for request in request_rx {
            let outcome = Self::deliver(&client, base_url, client_id, &request.topic, request.payload);
            (request.on_complete)(outcome);
        }
        log::debug!("[broker] HTTP delivery thread exiting");
    }

    fn deliver(
        client: &Client,
        base_url: &Url,
        client_id: &str,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), PublishError> {
        let url = topic_url(base_url, topic)?;
        match client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Client-Id", client_id)
            .body(payload.to_vec())
            .send()
        {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                let status = response.status();
                Err(PublishError::new(
                    Some(i32::from(status.as_u16())),
                    format!("broker returned {status}"),
                ))
            }
            Err(e) => Err(PublishError::new(None, e.to_string())),
        }
    }
}

/// `{base_url}/topics/{level}/{level}...?qos=1` with every level percent-encoded.
fn topic_url(base_url: &Url, topic: &str) -> Result<Url, PublishError> {
    let mut url = base_url.clone();
    url.path_segments_mut()
        .map_err(|()| PublishError::new(None, format!("broker URL cannot carry a path: {base_url}")))?
        .pop_if_empty()
        .push("topics")
        .extend(topic.split('/'));
    url.query_pairs_mut().append_pair("qos", "1");
    Ok(url)
}

impl BrokerClient for HttpBroker {
    fn publish(&mut self, topic: &str, payload: Bytes, on_complete: PublishCallback) {
        let request = DeliveryRequest {
            topic: topic.to_string(),
            payload,
            on_complete,
        };
        let Some(tx) = &self.request_tx else {
            (request.on_complete)(Err(PublishError::new(None, "HTTP broker is shut down")));
            return;
        };
        if let Err(mpsc::SendError(request)) = tx.send(request) {
            (request.on_complete)(Err(PublishError::new(None, "HTTP delivery thread exited")));
        }
    }
}

impl Drop for HttpBroker {
    fn drop(&mut self) {
        // Closing the channel lets the delivery thread finish queued requests and exit.
        self.request_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
