//! Supervised UDP channel to the relay.
//!
//! The heartbeat worker owns the channel lifecycle (open/close/replace); the
//! forwarding loop re-fetches the handle every iteration and tolerates `None`
//! or a socket that has just been swapped out. `ArcSwapOption` makes the
//! replacement a single atomic hand-off.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use linkshare_core::frame;
use linkshare_core::{Role, SessionCode};
use tokio::net::UdpSocket;

pub struct UdpLink {
    socket: ArcSwapOption<UdpSocket>,
    relay: SocketAddr,
    closed: AtomicBool,
}

impl UdpLink {
    pub fn new(relay: SocketAddr) -> Self {
        Self {
            socket: ArcSwapOption::const_empty(),
            relay,
            closed: AtomicBool::new(false),
        }
    }

    /// Possibly-stale handle; callers must not cache it across iterations.
    pub fn current(&self) -> Option<Arc<UdpSocket>> {
        self.socket.load_full()
    }

    /// Drop any stale socket, open a fresh one, connect to the relay and
    /// resend the registration datagram. Fire-and-forget: the ACK (if any) is
    /// picked up by whichever worker reads the socket next. Fails once the
    /// link has been closed, so an in-flight reconnect cannot resurrect the
    /// channel during teardown.
    pub async fn reconnect(
        &self,
        code: &SessionCode,
        role: Role,
    ) -> io::Result<Arc<UdpSocket>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        self.socket.store(None);
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(self.relay).await?;
        socket.send(&frame::registration_frame(code, role)).await?;
        let socket = Arc::new(socket);
        self.socket.store(Some(socket.clone()));
        if self.closed.load(Ordering::SeqCst) {
            // close() raced the store; honor it.
            self.socket.store(None);
            return Err(closed_error());
        }
        Ok(socket)
    }

    /// Close the channel for good. Terminal: any reconnect attempt still in
    /// flight fails instead of storing a fresh socket.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.socket.store(None);
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "udp channel closed")
}
