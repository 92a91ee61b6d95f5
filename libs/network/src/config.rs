//! Engine Configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! ack_timeout_ms = 500
//! max_retries = 2
//!
//! [queue]
//! max_depth = 256
//! full_policy = "Block"
//! ```

use crate::error::{NetworkError, Result};
use dispatch::QueueConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Network engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the engine's worker thread
    pub thread_name: String,
    /// Deadline for an acknowledgment before a send counts as timed out
    pub ack_timeout_ms: u64,
    /// Resends after the first attempt; 0 disables retry
    pub max_retries: u32,
    /// Period of the timeout scan on the engine thread
    pub process_interval_ms: u64,
    /// Receive-loop blocking timeout between exit-flag checks
    pub receive_poll_ms: u64,
    /// Upper bound on `send_and_wait`
    pub wait_timeout_ms: u64,
    /// Reply to every inbound frame with an acknowledgment
    pub send_acks: bool,
    /// Recently executed frames remembered for duplicate suppression (0 = off)
    pub dedupe_window: usize,
    /// Engine thread queue
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_name: "network".to_string(),
            ack_timeout_ms: crate::DEFAULT_ACK_TIMEOUT_MS,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            process_interval_ms: 100,
            receive_poll_ms: 50,
            wait_timeout_ms: 5_000,
            send_acks: true,
            dedupe_window: 0,
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML fragment and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| NetworkError::configuration(format!("invalid engine config: {e}"), None))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| NetworkError::configuration(format!("cannot encode engine config: {e}"), None))
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("process_interval_ms", self.process_interval_ms),
            ("receive_poll_ms", self.receive_poll_ms),
            ("wait_timeout_ms", self.wait_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(NetworkError::configuration(
                    format!("{field} must be greater than zero"),
                    Some(field),
                ));
            }
        }
        if self.thread_name.is_empty() {
            return Err(NetworkError::configuration(
                "thread_name must not be empty",
                Some("thread_name"),
            ));
        }
        if !self.wait_covers_delivery() {
            warn!(
                wait_timeout_ms = self.wait_timeout_ms,
                delivery_budget_ms = self.delivery_budget().as_millis() as u64,
                "wait_timeout is shorter than the retry chain; send_and_wait may time out before delivery resolves"
            );
        }
        Ok(())
    }

    /// Longest time a send can take to resolve with every retry used
    ///
    /// Each attempt waits out the ack deadline plus up to one scan period.
    pub fn delivery_budget(&self) -> Duration {
        let per_attempt = self.ack_timeout() + self.process_interval();
        per_attempt.saturating_mul(self.max_retries.saturating_add(1))
    }

    /// Whether `send_and_wait` outlasts the full retry chain
    pub fn wait_covers_delivery(&self) -> bool {
        self.wait_timeout() >= self.delivery_budget()
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_process_interval(mut self, interval: Duration) -> Self {
        self.process_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_receive_poll(mut self, poll: Duration) -> Self {
        self.receive_poll_ms = poll.as_millis() as u64;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_send_acks(mut self, send_acks: bool) -> Self {
        self.send_acks = send_acks;
        self
    }

    pub fn with_dedupe_window(mut self, window: usize) -> Self {
        self.dedupe_window = window;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::FullPolicy;

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.ack_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert!(config.send_acks);
        assert_eq!(config.thread_name, "network");
    }

    #[test]
    fn test_partial_toml_overrides_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            ack_timeout_ms = 250
            dedupe_window = 64

            [queue]
            max_depth = 16
            full_policy = "Fail"
            "#,
        )
        .unwrap();
        assert_eq!(config.ack_timeout_ms, 250);
        assert_eq!(config.dedupe_window, 64);
        assert_eq!(config.queue.max_depth, 16);
        assert_eq!(config.queue.full_policy, FullPolicy::Fail);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validation_names_field() {
        let err = EngineConfig::from_toml_str("process_interval_ms = 0").unwrap_err();
        match err {
            NetworkError::Configuration { field, .. } => {
                assert_eq!(field.as_deref(), Some("process_interval_ms"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_wait_is_flagged_but_accepted() {
        let config = EngineConfig::default()
            .with_ack_timeout(Duration::from_millis(200))
            .with_process_interval(Duration::from_millis(10))
            .with_max_retries(2)
            .with_wait_timeout(Duration::from_millis(300));
        assert_eq!(config.delivery_budget(), Duration::from_millis(630));
        assert!(!config.wait_covers_delivery());
        assert!(config.validate().is_ok());

        assert!(EngineConfig::default().wait_covers_delivery());
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = EngineConfig::default().with_max_retries(5);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap().max_retries, 5);
    }
}
