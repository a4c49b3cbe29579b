// LinkShare Linux: session tunnel daemon relaying IP packets through a
// third-party relay, as host (sharing internet) or client (consuming it).

mod config;
mod directory;
mod engine;
mod iface;
mod keepalive;
mod link;
mod tcp;
mod udp;

use std::time::Duration;

use linkshare_core::{plan_for, Role, SessionCode, TunnelConfig};

use crate::directory::DirectoryClient;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const TUN_NAME: &str = "lshare0";
/// How often the host asks the directory whether its session still exists.
const VALIDATE_INTERVAL: Duration = Duration::from_secs(10);

enum Command {
    /// Create a session and share this machine's uplink.
    Host,
    /// Join an existing session by code and route everything through it.
    Join(String),
    /// Restore the persisted session after a restart.
    Resume,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("linkshare-linux {VERSION}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let command = match args.first().map(String::as_str) {
        Some("host") => Command::Host,
        Some("join") => match args.get(1) {
            Some(code) => Command::Join(code.clone()),
            None => return Err("usage: linkshare-linux join <CODE>".into()),
        },
        Some("resume") | None => Command::Resume,
        Some(other) => {
            return Err(format!(
                "unknown command {other:?}; expected host, join <CODE> or resume"
            )
            .into())
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(command))
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let (mut cfg, dir) = match command {
        Command::Host => {
            let dir = DirectoryClient::new(config::directory_url())?;
            let grant = dir.create().await?;
            println!("session code: {}", grant.code);
            let cfg = TunnelConfig {
                role: Role::Host,
                session_code: SessionCode::new(&grant.code)?,
                relay_host: grant.relay_server,
                udp_port: grant.udp_port,
                tcp_port: grant.tcp_port,
            };
            (cfg, Some(dir))
        }
        Command::Join(code) => {
            let code = SessionCode::new(&code)?;
            let dir = DirectoryClient::new(config::directory_url())?;
            let grant = dir.join(&code).await?;
            let cfg = TunnelConfig {
                role: Role::Client,
                session_code: code,
                relay_host: grant.relay_server,
                udp_port: grant.udp_port,
                tcp_port: grant.tcp_port,
            };
            (cfg, Some(dir))
        }
        Command::Resume => {
            let cfg = config::load_session()
                .ok_or("no persisted session; run 'host' or 'join <CODE>' first")?;
            let dir = DirectoryClient::new(config::directory_url())?;
            match dir.validate(&cfg.session_code).await {
                Ok(false) => {
                    config::clear_session();
                    return Err("persisted session is no longer active".into());
                }
                Ok(true) => {}
                Err(e) => tracing::debug!("session validation failed, resuming anyway: {e}"),
            }
            tracing::info!(session = %cfg.session_code, "resuming persisted session");
            (cfg, Some(dir))
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg.validate()?;

    let relay_ip = engine::resolve_relay(&cfg.relay_host).await?;
    let plan = plan_for(cfg.role, relay_ip);
    let tun = iface::LinuxTun::establish(TUN_NAME, &plan)?;
    tracing::info!(iface = tun.name(), address = %plan.address, "virtual interface up");

    config::save_session(&cfg)?;
    let session_code = cfg.session_code.clone();
    let role = cfg.role;
    let engine = engine::Engine::start(cfg, relay_ip, tun)?;

    // Status channel for external observers: one JSON line per transition.
    let mut status = engine.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = *status.borrow_and_update();
            if let Ok(line) = serde_json::to_string(&snapshot) {
                println!("{line}");
            }
        }
    });

    tokio::select! {
        result = shutdown_signal() => result?,
        _ = session_revoked(dir.as_ref(), &session_code, role) => {
            tracing::info!("session cancelled at the directory");
        }
    }
    tracing::info!("shutting down");
    engine.stop().await;
    config::clear_session();

    if role == Role::Host {
        if let Some(dir) = dir {
            if let Err(e) = dir.cancel(&session_code).await {
                tracing::warn!("failed to cancel session at directory: {e}");
            }
        }
    }
    Ok(())
}

/// Resolve when the directory reports the session gone. Hosts poll so a
/// cancellation from elsewhere tears the tunnel down; everyone else never
/// resolves. Directory errors are tolerated, the poll just tries again.
async fn session_revoked(dir: Option<&DirectoryClient>, code: &SessionCode, role: Role) {
    let dir = match (role, dir) {
        (Role::Host, Some(dir)) => dir,
        _ => return std::future::pending::<()>().await,
    };
    loop {
        tokio::time::sleep(VALIDATE_INTERVAL).await;
        match dir.validate(code).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => tracing::debug!("session validation failed: {e}"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
