//! Heartbeat worker: probe the UDP relay path and repair it.
//!
//! One heartbeat frame every few seconds, one ACK expected back. This worker
//! is the only place the UDP channel is reopened; the forwarding loop just
//! logs its errors and waits for the repaired handle to show up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkshare_core::frame;
use linkshare_core::{Keepalive, Probe, Role, SessionCode, Transition};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::engine::{sleep_unless_shutdown, StatusPublisher};
use crate::link::UdpLink;

#[derive(Clone, Copy)]
pub(crate) struct Timing {
    /// Pause between heartbeat cycles.
    pub interval: Duration,
    /// How long to wait for the ACK before declaring the path dead.
    pub ack_timeout: Duration,
    /// Breather after a reconnect before probing again.
    pub reconnect_pause: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            interval: Duration::from_secs(3),
            ack_timeout: Duration::from_secs(5),
            reconnect_pause: Duration::from_secs(1),
        }
    }
}

pub async fn run(
    link: Arc<UdpLink>,
    code: SessionCode,
    role: Role,
    publisher: Arc<StatusPublisher>,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
) {
    run_with(link, code, role, publisher, running, shutdown, Timing::default()).await
}

pub(crate) async fn run_with(
    link: Arc<UdpLink>,
    code: SessionCode,
    role: Role,
    publisher: Arc<StatusPublisher>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    timing: Timing,
) {
    let mut keepalive = Keepalive::new();
    let mut ack = [0u8; frame::HEADER_LEN];

    while running.load(Ordering::SeqCst) {
        // Registration ACKs set `connected` outside this loop; fold them in
        // before deciding what this cycle's edge would be.
        keepalive.observe(publisher.is_connected());

        match keepalive.begin_cycle(link.current().is_some()) {
            Probe::Reconnect => {
                if let Err(e) = link.reconnect(&code, role).await {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!("udp reconnect failed: {e}");
                    }
                }
                if !sleep_unless_shutdown(timing.reconnect_pause, &mut shutdown).await {
                    break;
                }
                continue;
            }
            Probe::Send => {}
        }
        let Some(socket) = link.current() else {
            continue;
        };

        match socket.send(&frame::heartbeat_frame(&code, role)).await {
            Err(e) => {
                // Treated like a timeout, but the reconnect waits for the next
                // cycle's channel-health check.
                if running.load(Ordering::SeqCst) {
                    tracing::warn!("heartbeat send failed: {e}");
                }
                apply(keepalive.on_transport_error(), &publisher);
            }
            Ok(_) => match timeout(timing.ack_timeout, socket.recv(&mut ack)).await {
                Ok(Ok(_)) => {
                    tracing::trace!("heartbeat ack received");
                    apply(keepalive.on_ack(), &publisher);
                }
                Ok(Err(e)) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::debug!("heartbeat poll failed: {e}");
                    }
                    apply(keepalive.on_transport_error(), &publisher);
                }
                Err(_) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!("heartbeat timeout, reconnecting udp channel");
                    }
                    apply(keepalive.on_timeout(), &publisher);
                    if running.load(Ordering::SeqCst) {
                        if let Err(e) = link.reconnect(&code, role).await {
                            tracing::warn!("udp reconnect failed: {e}");
                        }
                    }
                }
            },
        }

        if !sleep_unless_shutdown(timing.interval, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!("keepalive worker exiting");
}

fn apply(transition: Option<Transition>, publisher: &StatusPublisher) {
    match transition {
        Some(Transition::Connected) => publisher.set_connected(true),
        Some(Transition::Disconnected) => publisher.set_connected(false),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    fn code() -> SessionCode {
        SessionCode::new("A1B2C3").unwrap()
    }

    fn fast_timing() -> Timing {
        Timing {
            interval: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(100),
            reconnect_pause: Duration::from_millis(10),
        }
    }

    struct Harness {
        relay: UdpSocket,
        link: Arc<UdpLink>,
        publisher: Arc<StatusPublisher>,
        running: Arc<AtomicBool>,
        shutdown_tx: watch::Sender<bool>,
        worker: tokio::task::JoinHandle<()>,
    }

    async fn spawn_worker() -> Harness {
        let relay = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let link = Arc::new(UdpLink::new(relay.local_addr().unwrap()));
        let (publisher, _rx) = StatusPublisher::new_for_tests();
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_with(
            link.clone(),
            code(),
            Role::Host,
            publisher.clone(),
            running.clone(),
            shutdown_rx,
            fast_timing(),
        ));
        Harness {
            relay,
            link,
            publisher,
            running,
            shutdown_tx,
            worker,
        }
    }

    async fn stop(h: Harness) {
        h.running.store(false, Ordering::SeqCst);
        let _ = h.shutdown_tx.send(true);
        h.worker.await.unwrap();
    }

    #[tokio::test]
    async fn opens_and_registers_channel_when_missing() {
        let h = spawn_worker().await;

        // First cycle has no channel: the worker opens one and registers.
        let mut buf = [0u8; 16];
        let (n, _) = h.relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x41, 0x31, 0x42, 0x32, 0x43, 0x33, 0x01]);
        assert!(h.link.current().is_some());

        stop(h).await;
    }

    #[tokio::test]
    async fn ack_publishes_connected_once() {
        let h = spawn_worker().await;

        let mut buf = [0u8; 16];
        // Registration, then answer a couple of heartbeats.
        let (_, from) = h.relay.recv_from(&mut buf).await.unwrap();
        for _ in 0..2 {
            let (n, _) = h.relay.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, frame::HEADER_LEN);
            h.relay.send_to(&[0x01], from).await.unwrap();
        }

        // Give the worker a beat to process the last ack.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.publisher.is_connected());

        stop(h).await;
    }

    #[tokio::test]
    async fn sustained_silence_flips_connected_off_and_reregisters() {
        let h = spawn_worker().await;
        h.publisher.set_connected(true);

        let mut buf = [0u8; 16];
        // Registration from the first cycle.
        h.relay.recv_from(&mut buf).await.unwrap();
        // Heartbeat that will never be answered.
        let (n, _) = h.relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, frame::HEADER_LEN);

        // Timeout path: disconnect published, channel reopened + re-registered.
        let (n, _) = h.relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x41, 0x31, 0x42, 0x32, 0x43, 0x33, 0x01]);
        assert!(!h.publisher.is_connected());

        stop(h).await;
    }
}
