//! Relay configuration.
//!
//! Loaded in layers: built-in defaults, then the JSON config file, then
//! `RELAY_*` environment variables. The binary applies command-line flags
//! last.

// Rust guideline compliant 2025-01

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::constants::{
    DEFAULT_MESSAGE, DEFAULT_MESSAGE_COUNT, DEFAULT_PUB_INTERVAL_SECS, DEFAULT_SOCKET_PATH,
    DEFAULT_TOPIC, MAX_SOCKET_PATH,
};
use crate::queue::{OverflowPolicy, QueueCapacity};

/// Configuration for the relay.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Path of the ingestion socket.
    pub socket_path: PathBuf,
    /// Identity presented to the broker.
    pub client_id: String,
    /// Topic the main-loop producer publishes on.
    pub topic: String,
    /// Message the producer publishes. A path to an existing file is run
    /// as a script and its output published instead.
    pub message: String,
    /// Number of producer publishes; 0 publishes until shutdown.
    pub count: u32,
    /// Seconds between producer publishes.
    pub pub_interval_secs: u64,
    /// Base URL of an HTTP publish bridge. Without one, publishes are only logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
    /// Upper bound on queued entries. Unbounded when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    /// What a full queue gives up.
    pub overflow_policy: OverflowPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            client_id: format!("relay-{}", uuid::Uuid::new_v4()),
            topic: DEFAULT_TOPIC.to_string(),
            message: DEFAULT_MESSAGE.to_string(),
            count: DEFAULT_MESSAGE_COUNT,
            pub_interval_secs: DEFAULT_PUB_INTERVAL_SECS,
            broker_url: None,
            queue_capacity: None,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Location of the config file.
    ///
    /// `RELAY_CONFIG` if set, otherwise `topic-relay/config.json` under the
    /// platform config directory.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RELAY_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("topic-relay")
            .join("config.json"))
    }

    /// Load from the default config file, with environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path` without environment overrides. A missing file
    /// yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[config] no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parse config file: {}", path.display()))
    }

    /// Apply `RELAY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply `RELAY_*` overrides using `lookup` to read variables.
    ///
    /// Numeric values that do not parse are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket_path) = lookup("RELAY_SOCKET_PATH") {
            self.socket_path = PathBuf::from(socket_path);
        }

        if let Some(client_id) = lookup("RELAY_CLIENT_ID") {
            self.client_id = client_id;
        }

        if let Some(topic) = lookup("RELAY_TOPIC") {
            self.topic = topic;
        }

        if let Some(message) = lookup("RELAY_MESSAGE") {
            self.message = message;
        }

        if let Some(count) = lookup("RELAY_COUNT") {
            if let Ok(count) = count.parse::<u32>() {
                self.count = count;
            }
        }

        if let Some(interval) = lookup("RELAY_PUB_INTERVAL") {
            if let Ok(interval) = interval.parse::<u64>() {
                self.pub_interval_secs = interval;
            }
        }

        if let Some(broker_url) = lookup("RELAY_BROKER_URL") {
            self.broker_url = Some(broker_url).filter(|url| !url.is_empty());
        }

        if let Some(capacity) = lookup("RELAY_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.queue_capacity = Some(capacity);
            }
        }
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let path_len = self.socket_path.as_os_str().len();
        if path_len >= MAX_SOCKET_PATH {
            bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCKET_PATH - 1,
                self.socket_path.display()
            );
        }
        if self.topic.is_empty() {
            bail!("Topic must not be empty");
        }
        Ok(())
    }

    /// Queue sizing derived from `queue_capacity` and `overflow_policy`.
    pub fn queue_capacity(&self) -> QueueCapacity {
        match self.queue_capacity {
            Some(limit) => QueueCapacity::Bounded {
                limit,
                policy: self.overflow_policy,
            },
            None => QueueCapacity::Unbounded,
        }
    }

    /// Producer interval. Zero falls back to the default.
    pub fn pub_interval(&self) -> Duration {
        let secs = if self.pub_interval_secs == 0 {
            DEFAULT_PUB_INTERVAL_SECS
        } else {
            self.pub_interval_secs
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/aws-iot-demo-agent-ipc-node"));
        assert_eq!(config.topic, "test/topic");
        assert_eq!(config.message, "Hello world!");
        assert_eq!(config.count, 10);
        assert_eq!(config.pub_interval(), Duration::from_secs(1));
        assert!(config.client_id.starts_with("relay-"));
        assert_eq!(config.queue_capacity(), QueueCapacity::Unbounded);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = RelayConfig::load_from(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(config.topic, "test/topic");
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(
            &path,
            r#"{"topic":"plant/line1","count":0,"queue_capacity":50,"overflow_policy":"drop_newest"}"#,
        )
        .unwrap();

        let config = RelayConfig::load_from(&path).unwrap();
        assert_eq!(config.topic, "plant/line1");
        assert_eq!(config.count, 0);
        assert_eq!(config.message, "Hello world!");
        assert_eq!(
            config.queue_capacity(),
            QueueCapacity::Bounded {
                limit: 50,
                policy: OverflowPolicy::DropNewest
            }
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let err = RelayConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RelayConfig::default();
        config.apply_overrides_from(lookup_from(&[
            ("RELAY_SOCKET_PATH", "/tmp/relay-test.sock"),
            ("RELAY_CLIENT_ID", "device-7"),
            ("RELAY_TOPIC", "sensors/temp"),
            ("RELAY_MESSAGE", "ping"),
            ("RELAY_COUNT", "3"),
            ("RELAY_PUB_INTERVAL", "5"),
            ("RELAY_BROKER_URL", "http://localhost:8080"),
            ("RELAY_QUEUE_CAPACITY", "100"),
        ]));

        assert_eq!(config.socket_path, PathBuf::from("/tmp/relay-test.sock"));
        assert_eq!(config.client_id, "device-7");
        assert_eq!(config.topic, "sensors/temp");
        assert_eq!(config.message, "ping");
        assert_eq!(config.count, 3);
        assert_eq!(config.pub_interval(), Duration::from_secs(5));
        assert_eq!(config.broker_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.queue_capacity, Some(100));
    }

    #[test]
    fn test_unparseable_numbers_are_ignored() {
        let mut config = RelayConfig::default();
        config.apply_overrides_from(lookup_from(&[
            ("RELAY_COUNT", "many"),
            ("RELAY_PUB_INTERVAL", "-1"),
            ("RELAY_QUEUE_CAPACITY", ""),
        ]));

        assert_eq!(config.count, 10);
        assert_eq!(config.pub_interval_secs, 1);
        assert_eq!(config.queue_capacity, None);
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let config = RelayConfig {
            pub_interval_secs: 0,
            ..RelayConfig::default()
        };
        assert_eq!(config.pub_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_long_socket_path() {
        let config = RelayConfig {
            socket_path: PathBuf::from(format!("/tmp/{}", "x".repeat(120))),
            ..RelayConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_validate_rejects_empty_topic() {
        let config = RelayConfig {
            topic: String::new(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_serialization_skips_unset_options() {
        let json = serde_json::to_string(&RelayConfig::default()).unwrap();
        assert!(!json.contains("broker_url"));
        assert!(!json.contains("queue_capacity"));
        assert!(json.contains("\"overflow_policy\":\"drop_oldest\""));
    }
}
