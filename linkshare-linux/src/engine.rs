//! Tunnel engine lifecycle: spawn the three workers, publish status
//! transitions, reverse everything on stop.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linkshare_core::{ConfigError, LinkState, StatusSnapshot, TunnelConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::iface::{IfaceError, PacketIo};
use crate::link::UdpLink;
use crate::{keepalive, tcp, udp};

/// How long `stop()` waits for each worker before abandoning it.
const WORKER_GRACE: Duration = Duration::from_secs(2);

/// Fatal startup failure. Nothing is left running when one of these is
/// returned; transport trouble after startup never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to resolve relay host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Iface(#[from] IfaceError),
}

/// Resolve the relay hostname once at startup; DNS failure is fatal.
pub async fn resolve_relay(host: &str) -> Result<IpAddr, EngineError> {
    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|source| EngineError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| EngineError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        })
}

/// Sleep that ends early on shutdown. Returns false when shutting down, so
/// worker loops can use it directly as a continue condition.
pub(crate) async fn sleep_unless_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        _ = shutdown.changed() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Broadcasts `active`/`connected` transitions exactly once each. The atomic
/// flags decide whether a value changed; only a change reaches the watch
/// channel and the log.
pub struct StatusPublisher {
    state: Arc<LinkState>,
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusPublisher {
    fn new() -> (Self, watch::Receiver<StatusSnapshot>) {
        let state = Arc::new(LinkState::new());
        let (tx, rx) = watch::channel(state.snapshot());
        (StatusPublisher { state, tx }, rx)
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> (Arc<StatusPublisher>, watch::Receiver<StatusSnapshot>) {
        let (publisher, rx) = StatusPublisher::new();
        (Arc::new(publisher), rx)
    }

    pub fn set_active(&self, value: bool) {
        if self.state.set_active(value) {
            self.broadcast();
        }
    }

    pub fn set_connected(&self, value: bool) {
        if self.state.set_connected(value) {
            self.broadcast();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.state.snapshot()
    }

    fn broadcast(&self) {
        let snapshot = self.state.snapshot();
        tracing::info!(
            active = snapshot.active,
            connected = snapshot.connected,
            "tunnel status"
        );
        let _ = self.tx.send(snapshot);
    }
}

/// Running tunnel session. Owns the virtual interface and the worker handles;
/// dropping it without `stop()` aborts nothing, so callers should stop.
pub struct Engine<T: PacketIo> {
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    publisher: Arc<StatusPublisher>,
    status_rx: watch::Receiver<StatusSnapshot>,
    link: Arc<UdpLink>,
    tun: Arc<T>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl<T: PacketIo> Engine<T> {
    /// Validate the configuration and bring the session up over an already
    /// established interface. The caller resolves the relay and obtains the
    /// interface grant first; both failures abort before this point.
    pub fn start(config: TunnelConfig, relay_ip: IpAddr, tun: T) -> Result<Self, EngineError> {
        config.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (publisher, status_rx) = StatusPublisher::new();
        let publisher = Arc::new(publisher);
        let tun = Arc::new(tun);
        let link = Arc::new(UdpLink::new(SocketAddr::new(relay_ip, config.udp_port)));
        let tcp_relay = SocketAddr::new(relay_ip, config.tcp_port);

        publisher.set_active(true);
        tracing::info!(
            role = config.role.as_str(),
            session = %config.session_code,
            relay = %relay_ip,
            "tunnel engine starting"
        );

        let workers = vec![
            (
                "udp",
                tokio::spawn(udp::run(
                    tun.clone(),
                    link.clone(),
                    config.session_code.clone(),
                    config.role,
                    publisher.clone(),
                    running.clone(),
                    shutdown_rx.clone(),
                )),
            ),
            (
                "tcp",
                tokio::spawn(tcp::run(
                    tun.clone(),
                    tcp_relay,
                    config.session_code.clone(),
                    config.role,
                    running.clone(),
                    shutdown_rx.clone(),
                )),
            ),
            (
                "keepalive",
                tokio::spawn(keepalive::run(
                    link.clone(),
                    config.session_code.clone(),
                    config.role,
                    publisher.clone(),
                    running.clone(),
                    shutdown_rx,
                )),
            ),
        ];

        Ok(Engine {
            running,
            shutdown,
            publisher,
            status_rx,
            link,
            tun,
            workers,
        })
    }

    /// Synchronous status query.
    pub fn status(&self) -> StatusSnapshot {
        self.publisher.snapshot()
    }

    /// Status transition stream for external observers.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Idempotent teardown: flip the running flag first so loops exit on their
    /// own, publish the inactive state, close the relay channels to unblock
    /// parked I/O, then wait a bounded grace period per worker. A worker that
    /// fails to exit in time is abandoned. The interface handle is released
    /// last, after no worker can still be touching it.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        self.publisher.set_connected(false);
        self.publisher.set_active(false);
        self.link.close();

        for (name, mut handle) in self.workers.drain(..) {
            if tokio::time::timeout(WORKER_GRACE, &mut handle).await.is_err() {
                tracing::warn!("{name} worker did not exit in time, abandoning");
                handle.abort();
            }
        }

        drop(self.tun);
        tracing::info!("tunnel engine stopped");
    }
}
