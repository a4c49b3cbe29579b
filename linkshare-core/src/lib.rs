//! LinkShare tunnel protocol reference implementation.
//! No I/O here; the daemon passes bytes and events, this crate decides.

pub mod config;
pub mod frame;
pub mod heartbeat;
pub mod netplan;
pub mod session;
pub mod status;

pub use config::{ConfigError, TunnelConfig, DEFAULT_TCP_PORT, DEFAULT_UDP_PORT};
pub use frame::{classify, data_frame, heartbeat_frame, registration_frame, Inbound, HEADER_LEN};
pub use heartbeat::{Keepalive, Probe, Transition};
pub use netplan::{plan_for, InterfacePlan, Route};
pub use session::{Role, SessionCode, SessionCodeError};
pub use status::{LinkState, StatusSnapshot};
