use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    pub reconnect: ReconnectConfig,

    // How long a dropped connection may stay disconnected before reconnecting
    pub disconnect_grace_ms: u64,

    // Deadlines for one negotiation attempt
    pub answer_timeout_ms: u64,
    pub readiness_timeout_ms: u64,

    // Viewer latency probe
    pub ping_interval_ms: u64,

    // Host side: whether viewer input is applied
    pub allow_control: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            disconnect_grace_ms: 5_000,
            answer_timeout_ms: 15_000,
            readiness_timeout_ms: 10_000,
            ping_interval_ms: 2_000,
            allow_control: true,
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reconnect.base_delay_ms == 0 {
            anyhow::bail!("reconnect.base_delay_ms must be > 0");
        }

        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            anyhow::bail!("reconnect.max_delay_ms must be >= reconnect.base_delay_ms");
        }

        if self.answer_timeout_ms == 0 || self.readiness_timeout_ms == 0 {
            anyhow::bail!("answer_timeout_ms and readiness_timeout_ms must be > 0");
        }

        if self.ping_interval_ms == 0 {
            anyhow::bail!("ping_interval_ms must be > 0");
        }

        Ok(())
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Relay connection settings shared by hosts and viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingClientConfig {
    /// Delay between relay reconnects. `max_attempts` bounds consecutive
    /// failures; the default never gives up.
    pub reconnect: ReconnectConfig,

    /// `host:heartbeat` period while registered, 0 disables
    pub heartbeat_interval_ms: u64,
}

impl Default for SignalingClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig {
                base_delay_ms: 2_000,
                max_delay_ms: 30_000,
                max_attempts: u32::MAX,
            },
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl SignalingClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reconnect.base_delay_ms == 0 || self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            anyhow::bail!("reconnect delays must be > 0 with max_delay_ms >= base_delay_ms");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NegotiationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.disconnect_grace(), Duration::from_secs(5));
        assert_eq!(config.answer_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: NegotiationConfig =
            serde_json::from_str(r#"{"reconnect": {"max_attempts": 2}, "allow_control": false}"#).unwrap();
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert!(!config.allow_control);
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let config = NegotiationConfig {
            reconnect: ReconnectConfig { base_delay_ms: 2_000, max_delay_ms: 1_000, max_attempts: 3 },
            ..NegotiationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_signaling_client_defaults() {
        let config = SignalingClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));

        let quiet = SignalingClientConfig { heartbeat_interval_ms: 0, ..SignalingClientConfig::default() };
        assert_eq!(quiet.heartbeat_interval(), None);
    }
}
