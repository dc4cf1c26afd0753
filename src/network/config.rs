//! Session Configuration

use serde::{Serialize, Deserialize};

use crate::TICK_DURATION_MS;

/// Configuration for a peer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of one simulation tick (ms).
    pub tick_duration_ms: f64,
    /// Round-trip samples kept for the half-trip average.
    pub rtt_window: usize,
    /// Samples the initiator collects before sending `Ack`
    /// (the first one is discarded).
    pub handshake_samples: usize,
    /// Re-send a probe that got no `SynAck` within this long (ms).
    pub probe_timeout_ms: f64,
    /// Give up the handshake after this many probes.
    pub max_probes: u32,
    /// Send a `Ping` on ticks that sent nothing else.
    pub heartbeat: bool,
    /// Samples kept per local player's input delay ring.
    pub input_ring_capacity: usize,
    /// Independent RNG streams shared in the `Syn`.
    pub seed_streams: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_duration_ms: TICK_DURATION_MS,
            rtt_window: 5,
            handshake_samples: 5,
            probe_timeout_ms: 2_000.0,
            max_probes: 20,
            heartbeat: true,
            input_ring_capacity: 32,
            seed_streams: 4,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_duration_ms > 0.0) || !self.tick_duration_ms.is_finite() {
            return Err(ConfigError::Invalid("tick_duration_ms must be positive"));
        }
        if self.rtt_window == 0 {
            return Err(ConfigError::Invalid("rtt_window must be at least 1"));
        }
        if self.handshake_samples < 2 {
            return Err(ConfigError::Invalid("handshake_samples must be at least 2"));
        }
        if self.max_probes < self.handshake_samples as u32 {
            return Err(ConfigError::Invalid("max_probes must cover handshake_samples"));
        }
        if !(self.probe_timeout_ms > 0.0) {
            return Err(ConfigError::Invalid("probe_timeout_ms must be positive"));
        }
        if self.input_ring_capacity == 0 {
            return Err(ConfigError::Invalid("input_ring_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Not valid JSON for this struct.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{ "heartbeat": false, "max_probes": 8 }"#).unwrap();
        assert!(!config.heartbeat);
        assert_eq!(config.max_probes, 8);
        assert_eq!(config.rtt_window, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SessionConfig::from_json(r#"{ "tick_duration_ms": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json(r#"{ "max_probes": 2 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SessionConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }
}
