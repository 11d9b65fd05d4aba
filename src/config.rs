use log::warn;
use std::time::Duration;

use crate::reconnect::{BackoffStrategy, ReconnectConfig};

/// Development default; override through configuration in any real deployment.
pub const DEFAULT_SIGNALING_HOST: &str = "192.168.0.105";
pub const DEFAULT_SIGNALING_PORT: u16 = 8081;
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// How long a `start_call` issued while disconnected waits for the relay connection.
pub const DEFAULT_START_CALL_WAIT: Duration = Duration::from_secs(2);

/// Address of the relay (signaling) server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SIGNALING_HOST.to_string(),
            port: DEFAULT_SIGNALING_PORT,
        }
    }
}

impl SignalingConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Builds the config from free-text user input.
    ///
    /// Empty fields fall back to the defaults. An invalid port falls back to the default
    /// port and produces a warning, which is both logged and returned for display.
    pub fn from_input(host_text: &str, port_text: &str) -> (Self, Vec<String>) {
        let mut warnings = Vec::new();

        let host = match host_text.trim() {
            "" => {
                warnings.push(format!(
                    "Server address is empty, using default {DEFAULT_SIGNALING_HOST}"
                ));
                DEFAULT_SIGNALING_HOST.to_string()
            }
            host => host.to_string(),
        };

        let port = match port_text.trim() {
            "" => DEFAULT_SIGNALING_PORT,
            text => match text.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => {
                    warnings.push(format!(
                        "Invalid port '{text}', using default port {DEFAULT_SIGNALING_PORT}"
                    ));
                    DEFAULT_SIGNALING_PORT
                }
            },
        };

        for warning in &warnings {
            warn!(target: "Config", "{warning}");
        }

        (Self { host, port }, warnings)
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub signaling: SignalingConfig,
    pub ice_servers: Vec<String>,
    pub reconnect: ReconnectConfig,
    pub start_call_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling: SignalingConfig::default(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            reconnect: ReconnectConfig::default(),
            start_call_wait: DEFAULT_START_CALL_WAIT,
        }
    }
}

impl ClientConfig {
    pub fn with_signaling(mut self, signaling: SignalingConfig) -> Self {
        self.signaling = signaling;
        self
    }

    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.reconnect.strategy = strategy;
        self
    }
}
