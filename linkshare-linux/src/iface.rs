//! Virtual interface seam: TUN device on Linux, in-memory mock for tests.
//!
//! The platform grant is the one thing the engine cannot own: opening
//! `/dev/net/tun` needs CAP_NET_ADMIN, and a refusal is a fatal startup error,
//! never retried. Everything above this module only sees `PacketIo`.

use std::future::Future;
use std::io;

use linkshare_core::netplan::InterfacePlan;

/// Packet-level endpoint: reading yields packets the device wants to send,
/// writing injects packets into the local stack. Shared-reference so the UDP
/// loop and both TCP pump directions can use one handle concurrently; the two
/// ends of the device are independent.
pub trait PacketIo: Send + Sync + 'static {
    fn recv<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send + 'a;

    fn send<'a>(&'a self, packet: &'a [u8]) -> impl Future<Output = io::Result<usize>> + Send + 'a;
}

/// Establishing the interface failed.
#[derive(Debug, thiserror::Error)]
pub enum IfaceError {
    /// The platform refused the grant (no CAP_NET_ADMIN / user declined).
    #[error("virtual interface grant denied: {0}")]
    GrantDenied(#[source] io::Error),
    #[error("tun device error: {0}")]
    Device(#[from] io::Error),
    #[error("interface configuration failed: {0}")]
    Configure(String),
}

#[cfg(target_os = "linux")]
pub use linux::LinuxTun;

#[cfg(target_os = "linux")]
mod linux {
    use super::{IfaceError, InterfacePlan, PacketIo};
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::process::Command;

    use tokio::io::unix::AsyncFd;

    // From <linux/if_tun.h>; raw IP packets, no packet-info prefix.
    const TUNSETIFF: libc::c_ulong = 0x4004_54CA;
    const IFF_TUN: libc::c_short = 0x0001;
    const IFF_NO_PI: libc::c_short = 0x1000;

    #[repr(C)]
    struct IfReq {
        name: [u8; libc::IFNAMSIZ],
        flags: libc::c_short,
        _pad: [u8; 22],
    }

    /// TUN device with a non-blocking fd driven through the reactor. All I/O
    /// paths are cancel-safe, so shutdown can abort a parked worker cleanly.
    pub struct LinuxTun {
        fd: AsyncFd<OwnedFd>,
        name: String,
    }

    impl LinuxTun {
        /// Open the device, set the interface name, bring it up with the
        /// plan's address, MTU and routes. DNS is applied best-effort.
        pub fn establish(name: &str, plan: &InterfacePlan) -> Result<Self, IfaceError> {
            let raw = unsafe {
                libc::open(
                    c"/dev/net/tun".as_ptr(),
                    libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
                )
            };
            if raw < 0 {
                let err = io::Error::last_os_error();
                return Err(match err.kind() {
                    io::ErrorKind::PermissionDenied => IfaceError::GrantDenied(err),
                    _ => IfaceError::Device(err),
                });
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let mut req = IfReq {
                name: [0; libc::IFNAMSIZ],
                flags: IFF_TUN | IFF_NO_PI,
                _pad: [0; 22],
            };
            let bytes = name.as_bytes();
            if bytes.len() >= libc::IFNAMSIZ {
                return Err(IfaceError::Configure(format!(
                    "interface name too long: {name}"
                )));
            }
            req.name[..bytes.len()].copy_from_slice(bytes);
            if unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF, &req) } < 0 {
                let err = io::Error::last_os_error();
                return Err(match err.kind() {
                    io::ErrorKind::PermissionDenied => IfaceError::GrantDenied(err),
                    _ => IfaceError::Device(err),
                });
            }

            configure(name, plan)?;

            Ok(LinuxTun {
                fd: AsyncFd::new(fd)?,
                name: name.to_string(),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        async fn recv_impl(&self, buf: &mut [u8]) -> io::Result<usize> {
            loop {
                let mut guard = self.fd.readable().await?;
                match guard.try_io(|inner| read_fd(inner.get_ref().as_raw_fd(), buf)) {
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            }
        }

        async fn send_impl(&self, packet: &[u8]) -> io::Result<usize> {
            loop {
                let mut guard = self.fd.writable().await?;
                match guard.try_io(|inner| write_fd(inner.get_ref().as_raw_fd(), packet)) {
                    Ok(result) => return result,
                    Err(_would_block) => continue,
                }
            }
        }
    }

    impl PacketIo for LinuxTun {
        async fn recv<'a>(&'a self, buf: &'a mut [u8]) -> io::Result<usize> {
            self.recv_impl(buf).await
        }

        async fn send<'a>(&'a self, packet: &'a [u8]) -> io::Result<usize> {
            self.send_impl(packet).await
        }
    }

    fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }

    /// Address, link state, MTU and routes via ip(8); DNS via resolvectl if
    /// present. Route or DNS failure on the host side is logged, not fatal,
    /// matching how a missing relay route degrades rather than aborts.
    fn configure(name: &str, plan: &InterfacePlan) -> Result<(), IfaceError> {
        run_ip(&[
            "addr",
            "add",
            &format!("{}/{}", plan.address, plan.prefix),
            "dev",
            name,
        ])?;
        run_ip(&["link", "set", name, "up", "mtu", &plan.mtu.to_string()])?;
        for route in &plan.routes {
            if let Err(e) = run_ip(&["route", "add", &route.cidr(), "dev", name]) {
                tracing::warn!("failed to add route {}: {e}", route.cidr());
            }
        }
        let dns: Vec<String> = plan.dns.iter().map(|d| d.to_string()).collect();
        let mut cmd = Command::new("resolvectl");
        cmd.arg("dns").arg(name).args(&dns);
        if let Err(e) = cmd.status() {
            tracing::debug!("resolvectl unavailable, skipping DNS setup: {e}");
        }
        Ok(())
    }

    fn run_ip(args: &[&str]) -> Result<(), IfaceError> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| IfaceError::Configure(format!("ip {}: {e}", args.join(" "))))?;
        if !output.status.success() {
            return Err(IfaceError::Configure(format!(
                "ip {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub use mock::mock_pair;
