//! UDP forwarding worker: register, then pump packets both ways with the
//! 7-byte relay header.
//!
//! This loop never repairs its own channel. On a send or receive error it logs
//! and keeps going; the keepalive worker notices the dead path and swaps in a
//! fresh socket, which this loop picks up by re-fetching the handle each
//! iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkshare_core::frame::{self, Inbound};
use linkshare_core::{Role, SessionCode};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::engine::{sleep_unless_shutdown, StatusPublisher};
use crate::iface::PacketIo;
use crate::link::UdpLink;

/// Single bounded read for the registration ACK; forwarding starts either way.
const REGISTER_ACK_WAIT: Duration = Duration::from_secs(1);
/// Pause while the channel is down or erroring, waiting for the keepalive
/// worker to replace it.
const CHANNEL_RETRY: Duration = Duration::from_millis(500);
/// Largest possible IP packet from the interface.
const BUF_LEN: usize = 65535;

pub async fn run<T: PacketIo>(
    tun: Arc<T>,
    link: Arc<UdpLink>,
    code: SessionCode,
    role: Role,
    publisher: Arc<StatusPublisher>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    register(link.as_ref(), &code, role, publisher.as_ref()).await;

    let mut tun_buf = vec![0u8; BUF_LEN];
    let mut relay_buf = vec![0u8; BUF_LEN];

    while running.load(Ordering::SeqCst) {
        let Some(socket) = link.current() else {
            if !sleep_unless_shutdown(CHANNEL_RETRY, &mut shutdown).await {
                break;
            }
            continue;
        };

        tokio::select! {
            _ = shutdown.changed() => break,

            // Interface -> relay, wrapped with the session header.
            read = tun.recv(&mut tun_buf) => match read {
                Ok(n) if n > 0 => {
                    let packet = frame::data_frame(&code, role, &tun_buf[..n]);
                    if let Err(e) = socket.send(&packet).await {
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!("udp send failed, waiting for reconnect: {e}");
                            if !sleep_unless_shutdown(CHANNEL_RETRY, &mut shutdown).await {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!("interface read failed: {e}");
                        if !sleep_unless_shutdown(CHANNEL_RETRY, &mut shutdown).await {
                            break;
                        }
                    }
                }
            },

            // Relay -> interface, header stripped; short datagrams are
            // control traffic and never reach the interface.
            read = socket.recv(&mut relay_buf) => match read {
                Ok(n) => {
                    if let Inbound::Payload(payload) = frame::classify(&relay_buf[..n]) {
                        if !payload.is_empty() {
                            if let Err(e) = tun.send(payload).await {
                                if running.load(Ordering::SeqCst) {
                                    tracing::warn!("interface write failed: {e}");
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::debug!("udp recv failed, waiting for reconnect: {e}");
                        if !sleep_unless_shutdown(CHANNEL_RETRY, &mut shutdown).await {
                            break;
                        }
                    }
                }
            },
        }

        // Both directions share this worker; never monopolize the scheduler.
        tokio::task::yield_now().await;
    }

    tracing::debug!("udp worker exiting");
}

/// Open the channel and send the registration datagram, then read once for
/// the ACK. Whether the ACK arrives only decides the initial `connected`
/// publication, never whether forwarding starts.
async fn register(
    link: &UdpLink,
    code: &SessionCode,
    role: Role,
    publisher: &StatusPublisher,
) {
    let socket = match link.reconnect(code, role).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::warn!("udp channel open failed, keepalive will retry: {e}");
            return;
        }
    };
    let mut ack = [0u8; frame::HEADER_LEN];
    match timeout(REGISTER_ACK_WAIT, socket.recv(&mut ack)).await {
        Ok(Ok(n)) if n > 0 => {
            tracing::debug!(session = %code, "udp registration confirmed");
            publisher.set_connected(true);
        }
        Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
            tracing::debug!(session = %code, "udp registration ack not seen, forwarding anyway");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::mock_pair;
    use tokio::net::UdpSocket;

    fn code() -> SessionCode {
        SessionCode::new("A1B2C3").unwrap()
    }

    async fn relay_and_link() -> (UdpSocket, Arc<UdpLink>) {
        let relay = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let link = Arc::new(UdpLink::new(relay.local_addr().unwrap()));
        (relay, link)
    }

    #[tokio::test]
    async fn register_sets_connected_on_ack() {
        let (relay, link) = relay_and_link().await;
        let (publisher, _rx) = StatusPublisher::new_for_tests();

        let reg = tokio::spawn({
            let link = link.clone();
            let publisher = publisher.clone();
            async move { register(link.as_ref(), &code(), Role::Client, publisher.as_ref()).await }
        });

        let mut buf = [0u8; 16];
        let (n, from) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x41, 0x31, 0x42, 0x32, 0x43, 0x33, 0x00]);
        relay.send_to(&[0x01], from).await.unwrap();

        reg.await.unwrap();
        assert!(publisher.is_connected());
    }

    #[tokio::test]
    async fn register_without_ack_still_returns() {
        let (relay, link) = relay_and_link().await;
        let (publisher, _rx) = StatusPublisher::new_for_tests();

        register(link.as_ref(), &code(), Role::Host, publisher.as_ref()).await;

        // Registration datagram arrived, but no ACK was sent back.
        let mut buf = [0u8; 16];
        let (n, _) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(buf[n - 1], 1);
        assert!(!publisher.is_connected());
    }

    #[tokio::test]
    async fn forwards_both_directions() {
        let (relay, link) = relay_and_link().await;
        let (tun, mut driver) = mock_pair();
        let (publisher, _rx) = StatusPublisher::new_for_tests();
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run(
            Arc::new(tun),
            link.clone(),
            code(),
            Role::Client,
            publisher,
            running.clone(),
            shutdown_rx,
        ));

        // Drain the registration datagram and learn the worker's address.
        let mut buf = [0u8; BUF_LEN];
        let (_, worker_addr) = relay.recv_from(&mut buf).await.unwrap();
        relay.send_to(&[0x01], worker_addr).await.unwrap();

        // Interface -> relay: packet comes out framed.
        driver.inject.send(vec![0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        let (n, _) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, frame::HEADER_LEN + 4);
        assert_eq!(&buf[..6], b"A1B2C3");
        assert_eq!(buf[6], 0);
        assert_eq!(&buf[7..n], &[0xDE, 0xAD, 0xBE, 0xEF]);

        // Relay -> interface: header stripped.
        let inbound = frame::data_frame(&code(), Role::Host, &[1, 2, 3]);
        relay.send_to(&inbound, worker_addr).await.unwrap();
        let written = driver.written.recv().await.unwrap();
        assert_eq!(written, vec![1, 2, 3]);

        // A short control datagram is never forwarded.
        relay.send_to(&[0x01], worker_addr).await.unwrap();
        driver.inject.send(vec![9]).unwrap();
        let (n, _) = relay.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[7..n], &[9]);
        assert!(driver.written.try_recv().is_err());

        running.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);
        worker.await.unwrap();
    }
}
