//! Session identity: endpoint role and the shareable session code.

use serde::{Deserialize, Serialize};

/// Which side of the tunnel this endpoint is. The host shares its own internet
/// uplink; the client routes all of its traffic through the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

impl Role {
    /// Role byte as it appears in every relay header: 1 = host, 0 = client.
    pub fn wire_byte(self) -> u8 {
        match self {
            Role::Host => 1,
            Role::Client => 0,
        }
    }

    pub fn from_wire(byte: u8) -> Option<Role> {
        match byte {
            1 => Some(Role::Host),
            0 => Some(Role::Client),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Client => "client",
        }
    }
}

/// Human-shareable code binding host and client to the same relay session.
/// The directory issues exactly six uppercase characters; we accept one to six
/// printable ASCII characters and uppercase them, since the framing layer must
/// not assume the full length (see `frame`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

/// Maximum session-code length carried in a relay header.
pub const MAX_CODE_LEN: usize = 6;

impl SessionCode {
    pub fn new(code: &str) -> Result<Self, SessionCodeError> {
        if code.is_empty() {
            return Err(SessionCodeError::Empty);
        }
        if code.len() > MAX_CODE_LEN {
            return Err(SessionCodeError::TooLong(code.len()));
        }
        if !code.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(SessionCodeError::NotPrintable);
        }
        Ok(SessionCode(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = SessionCodeError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        SessionCode::new(&s)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> String {
        code.0
    }
}

/// Invalid session code (empty, too long, or non-printable).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionCodeError {
    #[error("session code is empty")]
    Empty,
    #[error("session code longer than 6 characters ({0})")]
    TooLong(usize),
    #[error("session code contains non-printable characters")]
    NotPrintable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_wire_bytes() {
        assert_eq!(Role::Host.wire_byte(), 1);
        assert_eq!(Role::Client.wire_byte(), 0);
        assert_eq!(Role::from_wire(1), Some(Role::Host));
        assert_eq!(Role::from_wire(0), Some(Role::Client));
        assert_eq!(Role::from_wire(7), None);
    }

    #[test]
    fn code_uppercased() {
        let code = SessionCode::new("a1b2c3").unwrap();
        assert_eq!(code.as_str(), "A1B2C3");
    }

    #[test]
    fn code_accepts_short() {
        let code = SessionCode::new("AB").unwrap();
        assert_eq!(code.as_bytes(), b"AB");
    }

    #[test]
    fn code_rejects_bad_input() {
        assert_eq!(SessionCode::new(""), Err(SessionCodeError::Empty));
        assert_eq!(SessionCode::new("ABCDEFG"), Err(SessionCodeError::TooLong(7)));
        assert_eq!(SessionCode::new("AB CD"), Err(SessionCodeError::NotPrintable));
    }
}
