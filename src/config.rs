use crate::error::ServiceError;
use crate::radio::CoexistenceRadio;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// Listening-mode windows after a transfer episode
const LISTENING_TIMEOUT_AFTER_SEND_MS: u64 = 20_000;
const LISTENING_TIMEOUT_AFTER_RECEIVE_MS: u64 = 10_000;

const MAX_PENDING_DATAGRAMS: usize = 256;

/// Device-level configuration for the satellite session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether the device supports satellite communication at all.
    pub satellite_supported: bool,
    /// Short-range radios that must be disabled while satellite is enabled.
    pub coexistence_radios: Vec<CoexistenceRadio>,
    pub listening_timeout_after_send_ms: u64,
    pub listening_timeout_after_receive_ms: u64,
    /// Upper bound on datagrams waiting across both priority queues.
    pub max_pending_datagrams: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            satellite_supported: true,
            coexistence_radios: vec![
                CoexistenceRadio::Bluetooth,
                CoexistenceRadio::Wifi,
                CoexistenceRadio::Nfc,
                CoexistenceRadio::Uwb,
            ],
            listening_timeout_after_send_ms: LISTENING_TIMEOUT_AFTER_SEND_MS,
            listening_timeout_after_receive_ms: LISTENING_TIMEOUT_AFTER_RECEIVE_MS,
            max_pending_datagrams: MAX_PENDING_DATAGRAMS,
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ServiceError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Override both listening windows, used by test instrumentation.
    pub fn with_listening_timeouts(mut self, after_send: Duration, after_receive: Duration) -> Self {
        self.listening_timeout_after_send_ms = after_send.as_millis() as u64;
        self.listening_timeout_after_receive_ms = after_receive.as_millis() as u64;
        self
    }

    pub fn with_coexistence_radios(mut self, radios: &[CoexistenceRadio]) -> Self {
        self.coexistence_radios = radios.to_vec();
        self
    }

    pub fn listening_timeout_after_send(&self) -> Duration {
        Duration::from_millis(self.listening_timeout_after_send_ms)
    }

    pub fn listening_timeout_after_receive(&self) -> Duration {
        Duration::from_millis(self.listening_timeout_after_receive_ms)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.max_pending_datagrams == 0 {
            return Err(ServiceError::Config("max_pending_datagrams must be positive".into()));
        }
        if self.listening_timeout_after_send_ms == 0 || self.listening_timeout_after_receive_ms == 0 {
            return Err(ServiceError::Config("listening timeouts must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{"coexistence_radios":["Bluetooth"],"listening_timeout_after_send_ms":500}"#,
        )
        .unwrap();
        assert_eq!(config.coexistence_radios, vec![CoexistenceRadio::Bluetooth]);
        assert_eq!(config.listening_timeout_after_send(), Duration::from_millis(500));
        assert_eq!(
            config.listening_timeout_after_receive_ms,
            LISTENING_TIMEOUT_AFTER_RECEIVE_MS
        );
        assert!(config.satellite_supported);
    }

    #[test]
    fn test_zero_queue_limit_rejected() {
        let result = SessionConfig::from_json_str(r#"{"max_pending_datagrams":0}"#);
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(SessionConfig::from_json_str("{"), Err(ServiceError::Json(_))));
    }
}
