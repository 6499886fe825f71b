//! Configuration types for the lumagen-stream crate
//!
//! [`EngineConfig`] gathers everything that controls one engine instance:
//! where the device lives, how reconnects back off, and the timers used
//! by the command side. Hosts usually load the [`ConnectionDescriptor`] from
//! their own config files and keep the rest at defaults.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use lumagen_protocol::{DEFAULT_MAX_FRAME_LEN, LABEL_SLOTS};

/// Default TCP port of the device's control interface
pub const DEFAULT_TCP_PORT: u16 = 4999;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 9600;

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Where and how to reach the device
///
/// ```rust
/// use lumagen_stream::ConnectionDescriptor;
///
/// let json = r#"{ "kind": "ip", "host": "192.168.1.40" }"#;
/// let descriptor: ConnectionDescriptor = serde_json::from_str(json).unwrap();
/// assert_eq!(descriptor, ConnectionDescriptor::ip("192.168.1.40"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionDescriptor {
    /// TCP, usually through the device's built-in serial-to-IP bridge
    Ip {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// Local RS-232 port, 8N1
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl ConnectionDescriptor {
    pub fn ip(host: impl Into<String>) -> Self {
        Self::Ip {
            host: host.into(),
            port: DEFAULT_TCP_PORT,
        }
    }

    pub fn serial(path: impl Into<String>) -> Self {
        Self::Serial {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Ip { host, port } => {
                if host.trim().is_empty() {
                    return Err(ConfigError::invalid("connection.host", "host must not be empty"));
                }
                if *port == 0 {
                    return Err(ConfigError::invalid("connection.port", "port must be non-zero"));
                }
            }
            Self::Serial { path, baud_rate } => {
                if path.trim().is_empty() {
                    return Err(ConfigError::invalid("connection.path", "path must not be empty"));
                }
                if *baud_rate == 0 {
                    return Err(ConfigError::invalid(
                        "connection.baud_rate",
                        "baud rate must be non-zero",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip { host, port } => write!(f, "{host}:{port}"),
            Self::Serial { path, baud_rate } => write!(f, "{path}@{baud_rate}"),
        }
    }
}

/// Reconnect backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    /// Default: 1 second
    pub initial_delay: Duration,

    /// Upper bound on any single delay
    /// Default: 60 seconds
    pub max_delay: Duration,

    /// Random spread applied on top of the exponential delay, as a fraction
    /// in `0.0..=1.0`
    /// Default: 0.25
    pub jitter: f64,

    /// A session must stay up longer than this for the backoff to reset
    /// Default: 30 seconds
    pub stability_threshold: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.25,
            stability_threshold: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::invalid(
                "reconnect.initial_delay",
                "must be greater than 0",
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::invalid(
                "reconnect.max_delay",
                "must not be less than initial_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid(
                "reconnect.jitter",
                format!("{} is outside 0.0..=1.0", self.jitter),
            ));
        }
        Ok(())
    }
}

/// Configuration for one engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Device endpoint
    pub connection: ConnectionDescriptor,

    /// Reconnect backoff policy
    pub reconnect: ReconnectConfig,

    /// Timeout for a single connect attempt
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Delay between a labels-changed notice (or a fresh connection) and
    /// the label re-fetch
    /// Default: 1 second
    pub label_refresh_delay: Duration,

    /// Number of input label slots fetched on refresh
    /// Default: 10
    pub label_slots: u8,

    /// How long optimistic power may go unconfirmed before a warning
    /// Default: 15 seconds
    pub power_confirm_timeout: Duration,

    /// How long a command waits for its acknowledgement before the waiter
    /// is dropped and can no longer claim an ack
    /// Default: 15 seconds
    pub ack_timeout: Duration,

    /// Pause between keys in a remote key sequence
    /// Default: 100 milliseconds
    pub inter_key_delay: Duration,

    /// Longest inbound frame accepted by the decoder
    /// Default: 512 bytes
    pub max_frame_len: usize,

    /// Capacity of the state change broadcast channel
    /// Default: 1000
    pub event_buffer_size: usize,
}

impl EngineConfig {
    pub fn new(connection: ConnectionDescriptor) -> Self {
        Self {
            connection,
            reconnect: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(10),
            label_refresh_delay: Duration::from_secs(1),
            label_slots: LABEL_SLOTS,
            power_confirm_timeout: Duration::from_secs(15),
            ack_timeout: Duration::from_secs(15),
            inter_key_delay: Duration::from_millis(100),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            event_buffer_size: 1000,
        }
    }

    /// Configuration with short timers, for tests against an in-memory device
    pub fn fast(connection: ConnectionDescriptor) -> Self {
        Self {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(20),
                max_delay: Duration::from_millis(200),
                jitter: 0.0,
                stability_threshold: Duration::from_millis(500),
            },
            connect_timeout: Duration::from_secs(1),
            label_refresh_delay: Duration::from_millis(50),
            power_confirm_timeout: Duration::from_millis(300),
            ack_timeout: Duration::from_millis(300),
            inter_key_delay: Duration::from_millis(10),
            ..Self::new(connection)
        }
    }

    /// Validate the configuration and return the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.reconnect.validate()?;

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::invalid("connect_timeout", "must be greater than 0"));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::invalid("ack_timeout", "must be greater than 0"));
        }
        if self.label_slots > LABEL_SLOTS {
            return Err(ConfigError::invalid(
                "label_slots",
                format!("{} exceeds the {} slots the device has", self.label_slots, LABEL_SLOTS),
            ));
        }
        if self.max_frame_len < 64 {
            return Err(ConfigError::invalid("max_frame_len", "must be at least 64 bytes"));
        }
        if self.event_buffer_size == 0 {
            return Err(ConfigError::invalid(
                "event_buffer_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    // Builder methods

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_label_refresh_delay(mut self, delay: Duration) -> Self {
        self.label_refresh_delay = delay;
        self
    }

    pub fn with_label_slots(mut self, slots: u8) -> Self {
        self.label_slots = slots;
        self
    }

    pub fn with_power_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.power_confirm_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_inter_key_delay(mut self, delay: Duration) -> Self {
        self.inter_key_delay = delay;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::new(ConnectionDescriptor::ip("10.0.0.5"));
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(config.reconnect.stability_threshold, Duration::from_secs(30));
        assert_eq!(config.label_refresh_delay, Duration::from_secs(1));
        assert_eq!(config.inter_key_delay, Duration::from_millis(100));
        tokio_test::assert_ok!(config.validate());
        tokio_test::assert_ok!(EngineConfig::fast(ConnectionDescriptor::ip("x")).validate());
    }

    #[test]
    fn test_config_validation() {
        let bad_jitter = EngineConfig::new(ConnectionDescriptor::ip("x")).with_reconnect(
            ReconnectConfig {
                jitter: 1.5,
                ..Default::default()
            },
        );
        assert!(matches!(
            bad_jitter.validate(),
            Err(ConfigError::Invalid { field: "reconnect.jitter", .. })
        ));

        let inverted = ReconnectConfig {
            initial_delay: Duration::from_secs(90),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let too_many_slots = EngineConfig::new(ConnectionDescriptor::ip("x")).with_label_slots(11);
        assert!(too_many_slots.validate().is_err());

        let empty_host = EngineConfig::new(ConnectionDescriptor::ip(" "));
        assert!(empty_host.validate().is_err());

        let no_ack_window = EngineConfig::new(ConnectionDescriptor::ip("x")).with_ack_timeout(Duration::ZERO);
        assert!(matches!(
            no_ack_window.validate(),
            Err(ConfigError::Invalid { field: "ack_timeout", .. })
        ));
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let serial: ConnectionDescriptor =
            serde_json::from_str(r#"{ "kind": "serial", "path": "/dev/ttyUSB0" }"#).unwrap();
        assert_eq!(
            serial,
            ConnectionDescriptor::Serial {
                path: "/dev/ttyUSB0".into(),
                baud_rate: 9600
            }
        );

        let ip: ConnectionDescriptor =
            serde_json::from_str(r#"{ "kind": "ip", "host": "lumagen.local", "port": 23 }"#)
                .unwrap();
        assert_eq!(ip.to_string(), "lumagen.local:23");
    }
}
