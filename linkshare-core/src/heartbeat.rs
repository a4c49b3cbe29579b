//! Keepalive state machine for the UDP relay path.
//!
//! UDP gives no connection-level failure signal, so liveness is probed: one
//! heartbeat frame per cycle, one ACK expected within the timeout. The machine
//! is time-free; the daemon worker supplies the clock and the sockets and asks
//! it what to do each cycle. It is the sole authority on UDP reconnection and
//! on connectivity transitions, which it emits at most once per edge.

/// What to do at the top of a heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// No usable channel: close any stale socket, open and register a new one,
    /// then pause briefly before the next cycle.
    Reconnect,
    /// Channel looks healthy: send a heartbeat frame and poll for the ACK.
    Send,
}

/// Connectivity edge to publish. Emitted only when the observable state
/// actually changes; repeated timeouts while already disconnected are silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

/// Per-session keepalive tracker. One instance, owned by the heartbeat worker.
#[derive(Debug, Default)]
pub struct Keepalive {
    connected: bool,
}

impl Keepalive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel-health check that opens every cycle.
    pub fn begin_cycle(&mut self, channel_open: bool) -> Probe {
        if channel_open {
            Probe::Send
        } else {
            Probe::Reconnect
        }
    }

    /// ACK arrived within the bound.
    pub fn on_ack(&mut self) -> Option<Transition> {
        if self.connected {
            None
        } else {
            self.connected = true;
            Some(Transition::Connected)
        }
    }

    /// Fold in the currently published state before a cycle. Registration ACKs
    /// set `connected` outside the heartbeat path; observing them here keeps
    /// this machine's edges aligned with what observers have already seen.
    pub fn observe(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// No ACK within the timeout. The caller reconnects within this cycle.
    pub fn on_timeout(&mut self) -> Option<Transition> {
        self.disconnect_edge()
    }

    /// Send or poll failed. Treated like a timeout, but reconnection waits for
    /// the next cycle's channel-health check.
    pub fn on_transport_error(&mut self) -> Option<Transition> {
        self.disconnect_edge()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect_edge(&mut self) -> Option<Transition> {
        if self.connected {
            self.connected = false;
            Some(Transition::Disconnected)
        } else {
            None
        }
    }
}
