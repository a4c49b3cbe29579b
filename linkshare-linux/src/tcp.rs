//! TCP worker: register once, then pump raw bytes in both directions.
//!
//! After the single 7-byte registration message the stream carries no framing
//! at all; one stream per session is the demultiplexing. Failure here is fatal
//! to this worker only, the UDP path and the engine keep running.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkshare_core::frame;
use linkshare_core::{Role, SessionCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;

/// Bounded wait for the one-byte registration ACK.
const REGISTRATION_ACK_TIMEOUT: Duration = Duration::from_secs(5);
const PUMP_BUF_LEN: usize = 32768;

pub async fn run<T: crate::iface::PacketIo>(
    tun: Arc<T>,
    relay: SocketAddr,
    code: SessionCode,
    role: Role,
    running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
) {
    let mut stream = match TcpStream::connect(relay).await {
        Ok(stream) => stream,
        Err(e) => {
            if running.load(Ordering::SeqCst) {
                tracing::warn!("tcp connect to {relay} failed: {e}");
            }
            return;
        }
    };

    if let Err(e) = register(&mut stream, &code, role, REGISTRATION_ACK_TIMEOUT).await {
        if running.load(Ordering::SeqCst) {
            tracing::warn!("tcp registration failed, tcp path disabled: {e}");
        }
        return;
    }
    tracing::debug!(session = %code, "tcp registration confirmed, starting pumps");

    let (reader, writer) = stream.into_split();
    // When the relay side ends the stream is finished; the interface-side
    // pump has to be told, it would otherwise sit in a half-closed write loop.
    let (stream_done_tx, stream_done_rx) = watch::channel(false);
    let to_relay = tokio::spawn(pump_to_relay(
        tun.clone(),
        writer,
        running.clone(),
        shutdown.clone(),
        stream_done_rx,
    ));
    let from_relay = tokio::spawn(async move {
        pump_from_relay(reader, tun, running, shutdown).await;
        let _ = stream_done_tx.send(true);
    });

    // The worker is finished only when both directions are.
    let _ = from_relay.await;
    let _ = to_relay.await;
    tracing::debug!("tcp worker exiting");
}

/// Send the 7-byte header and poll for one ACK byte within `wait`.
async fn register(
    stream: &mut TcpStream,
    code: &SessionCode,
    role: Role,
    wait: Duration,
) -> io::Result<()> {
    let mut header = [0u8; frame::HEADER_LEN];
    frame::encode_header(&mut header, code, role);
    stream.write_all(&header).await?;

    let mut ack = [0u8; 1];
    match timeout(wait, stream.read_exact(&mut ack)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "no registration ack from relay",
        )),
    }
}

/// Interface -> relay, verbatim. Ends on EOF, error, shutdown, or the other
/// direction finishing the stream; the write side is shut down on the way out
/// so the relay and the opposite pump see the stream close.
async fn pump_to_relay<T: crate::iface::PacketIo>(
    tun: Arc<T>,
    mut writer: OwnedWriteHalf,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    mut stream_done: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; PUMP_BUF_LEN];
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = stream_done.changed() => break,
            read = tun.recv(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = writer.write_all(&buf[..n]).await {
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!("tcp write to relay failed: {e}");
                        }
                        break;
                    }
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!("interface read failed in tcp pump: {e}");
                    }
                    break;
                }
            },
        }
    }
    let _ = writer.shutdown().await;
}

/// Relay -> interface, verbatim until EOF or error.
async fn pump_from_relay<T: crate::iface::PacketIo>(
    mut reader: OwnedReadHalf,
    tun: Arc<T>,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; PUMP_BUF_LEN];
    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = shutdown.changed() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = tun.send(&buf[..n]).await {
                        if running.load(Ordering::SeqCst) {
                            tracing::warn!("interface write failed in tcp pump: {e}");
                        }
                        break;
                    }
                }
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        tracing::warn!("tcp read from relay failed: {e}");
                    }
                    break;
                }
            },
        }
    }
}
