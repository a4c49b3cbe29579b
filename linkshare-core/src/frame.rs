//! Relay demultiplexing header: 6 session-code bytes + 1 role byte.
//!
//! Every UDP datagram to the relay carries this header; the TCP stream carries
//! it exactly once, at registration. The relay replies to control messages with
//! a single ACK byte, so anything shorter than a full header is control traffic.

use crate::session::{Role, SessionCode, MAX_CODE_LEN};

/// Fixed header length: session code (6) + role flag (1).
pub const HEADER_LEN: usize = MAX_CODE_LEN + 1;

/// Write the 7-byte header into `buf`. Codes shorter than six bytes are
/// zero-padded; the relay decodes the code field leniently, and padding keeps
/// stale buffer contents off the wire.
pub fn encode_header(buf: &mut [u8; HEADER_LEN], code: &SessionCode, role: Role) {
    let bytes = code.as_bytes();
    let n = bytes.len().min(MAX_CODE_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf[n..MAX_CODE_LEN].fill(0);
    buf[MAX_CODE_LEN] = role.wire_byte();
}

/// Registration message: the code bytes as-is (not padded) plus the role byte.
/// Sent once when a transport connects, and again by the keepalive worker after
/// every UDP reconnect.
pub fn registration_frame(code: &SessionCode, role: Role) -> Vec<u8> {
    let bytes = code.as_bytes();
    let n = bytes.len().min(MAX_CODE_LEN);
    let mut out = Vec::with_capacity(n + 1);
    out.extend_from_slice(&bytes[..n]);
    out.push(role.wire_byte());
    out
}

/// Heartbeat probe: a bare header, nothing else.
pub fn heartbeat_frame(code: &SessionCode, role: Role) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    encode_header(&mut buf, code, role);
    buf
}

/// Wrap one tunneled IP packet for the UDP path.
pub fn data_frame(code: &SessionCode, role: Role, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEADER_LEN + payload.len()];
    let mut header = [0u8; HEADER_LEN];
    encode_header(&mut header, code, role);
    out[..HEADER_LEN].copy_from_slice(&header);
    out[HEADER_LEN..].copy_from_slice(payload);
    out
}

/// A datagram received from the relay.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// Shorter than a header: registration/heartbeat ACK or other control
    /// traffic. Never forwarded to the virtual interface.
    Control,
    /// Full frame: header stripped, remainder is a tunneled IP packet.
    Payload(&'a [u8]),
}

/// Classify a relay datagram per the decode rule.
pub fn classify(datagram: &[u8]) -> Inbound<'_> {
    if datagram.len() < HEADER_LEN {
        Inbound::Control
    } else {
        Inbound::Payload(&datagram[HEADER_LEN..])
    }
}
