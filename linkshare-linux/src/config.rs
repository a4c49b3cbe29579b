//! Persisted session and daemon settings.
//!
//! The active session is written to ~/.config/linkshare/session.toml so a
//! daemon restart can resume the tunnel without asking the directory again;
//! a deliberate stop clears it. Env overrides: LINKSHARE_DIRECTORY_URL,
//! LINKSHARE_UDP_PORT, LINKSHARE_TCP_PORT.

use std::io;
use std::path::{Path, PathBuf};

use linkshare_core::TunnelConfig;

const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:8000/api/";

/// Session-directory base URL.
pub fn directory_url() -> String {
    std::env::var("LINKSHARE_DIRECTORY_URL").unwrap_or_else(|_| DEFAULT_DIRECTORY_URL.to_string())
}

/// Relay port overrides, applied after the directory response.
pub fn apply_env_overrides(config: &mut TunnelConfig) {
    if let Some(port) = port_from_env("LINKSHARE_UDP_PORT") {
        config.udp_port = port;
    }
    if let Some(port) = port_from_env("LINKSHARE_TCP_PORT") {
        config.tcp_port = port;
    }
}

fn port_from_env(var: &str) -> Option<u16> {
    std::env::var(var).ok()?.parse().ok()
}

fn session_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from)?;
    Some(home.join(".config/linkshare/session.toml"))
}

/// Persist the running session for restart-resume.
pub fn save_session(config: &TunnelConfig) -> io::Result<()> {
    match session_path() {
        Some(path) => save_session_to(&path, config),
        None => Ok(()),
    }
}

/// Restore a previously persisted session, if any.
pub fn load_session() -> Option<TunnelConfig> {
    load_session_from(&session_path()?)
}

/// Forget the persisted session (deliberate stop).
pub fn clear_session() {
    if let Some(path) = session_path() {
        let _ = std::fs::remove_file(path);
    }
}

fn save_session_to(path: &Path, config: &TunnelConfig) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let doc = toml::to_string_pretty(config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, doc)
}

fn load_session_from(path: &Path) -> Option<TunnelConfig> {
    let doc = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&doc) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("ignoring unreadable session file {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkshare_core::{Role, SessionCode, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};

    #[test]
    fn session_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("linkshare-test-{}", std::process::id()));
        let path = dir.join("session.toml");
        let config = TunnelConfig {
            role: Role::Host,
            session_code: SessionCode::new("A1B2C3").unwrap(),
            relay_host: "relay.example".into(),
            udp_port: DEFAULT_UDP_PORT,
            tcp_port: DEFAULT_TCP_PORT,
        };

        save_session_to(&path, &config).unwrap();
        assert_eq!(load_session_from(&path), Some(config));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_or_garbage_session_is_none() {
        let dir = std::env::temp_dir();
        assert_eq!(load_session_from(&dir.join("linkshare-does-not-exist.toml")), None);

        let path = dir.join(format!("linkshare-garbage-{}.toml", std::process::id()));
        std::fs::write(&path, "not [valid").unwrap();
        assert_eq!(load_session_from(&path), None);
        std::fs::remove_file(&path).unwrap();
    }
}
