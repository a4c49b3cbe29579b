//! Tunnel configuration: the four fields the directory hands out, plus the role.

use serde::{Deserialize, Serialize};

use crate::session::{Role, SessionCode};

/// Default relay ports, matching the public relay deployment.
pub const DEFAULT_UDP_PORT: u16 = 52000;
pub const DEFAULT_TCP_PORT: u16 = 52001;

/// Immutable-per-session tunnel configuration. Built from directory output
/// (create/join) or restored from the persisted session file on restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub role: Role,
    pub session_code: SessionCode,
    pub relay_host: String,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}
fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

impl TunnelConfig {
    /// Fail-fast startup check: every field the engine needs must be present.
    /// The session code and role are typed so only the relay host can be blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_host.trim().is_empty() {
            return Err(ConfigError::MissingRelayHost);
        }
        if self.udp_port == 0 || self.tcp_port == 0 {
            return Err(ConfigError::MissingPort);
        }
        Ok(())
    }
}

/// Missing or unusable tunnel parameters. Fatal at startup, never retried.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("relay host is empty")]
    MissingRelayHost,
    #[error("relay port is zero")]
    MissingPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TunnelConfig {
        TunnelConfig {
            role: Role::Client,
            session_code: SessionCode::new("A1B2C3").unwrap(),
            relay_host: "relay.example".into(),
            udp_port: DEFAULT_UDP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn blank_relay_host_rejected() {
        let mut cfg = sample();
        cfg.relay_host = "  ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingRelayHost));
    }

    #[test]
    fn zero_port_rejected() {
        let mut cfg = sample();
        cfg.udp_port = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::MissingPort));
    }

}
