//! Process-visible connectivity state: two flags, atomic, publish-on-change.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

/// What external observers see: engine running at all, and relay confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub active: bool,
    pub connected: bool,
}

/// Shared connectivity flags. One instance per engine, handed to every worker
/// at construction. Setters swap atomically and report whether the value
/// changed, so callers broadcast each transition exactly once and redundant
/// updates stay silent.
#[derive(Debug, Default)]
pub struct LinkState {
    active: AtomicBool,
    connected: AtomicBool,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the flag changed.
    pub fn set_active(&self, value: bool) -> bool {
        self.active.swap(value, Ordering::SeqCst) != value
    }

    /// Returns true if the flag changed.
    pub fn set_connected(&self, value: bool) -> bool {
        self.connected.swap(value, Ordering::SeqCst) != value
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            active: self.is_active(),
            connected: self.is_connected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_inactive_and_disconnected() {
        let state = LinkState::new();
        assert_eq!(
            state.snapshot(),
            StatusSnapshot {
                active: false,
                connected: false
            }
        );
    }

    #[test]
    fn setters_report_change_once() {
        let state = LinkState::new();
        assert!(state.set_active(true));
        assert!(!state.set_active(true));
        assert!(state.set_connected(true));
        assert!(!state.set_connected(true));
        assert!(state.set_connected(false));
        assert!(!state.set_connected(false));
    }

    #[test]
    fn snapshot_tracks_flags() {
        let state = LinkState::new();
        state.set_active(true);
        state.set_connected(true);
        assert_eq!(
            state.snapshot(),
            StatusSnapshot {
                active: true,
                connected: true
            }
        );
    }
}
