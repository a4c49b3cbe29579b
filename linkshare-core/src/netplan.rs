//! Role-dependent virtual interface plan: address, routes, DNS, MTU.

use std::net::{IpAddr, Ipv4Addr};

use crate::session::Role;

/// Tunnel MTU requested from the platform.
pub const TUNNEL_MTU: u16 = 1500;

/// Local tunnel endpoint addresses, one per role, on a shared /24.
pub const HOST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 1);
pub const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(10, 8, 0, 2);

const DNS_SERVERS: [IpAddr; 3] = [
    IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
    IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
    IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)),
];

/// One route to install on the tunnel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dest: IpAddr,
    pub prefix: u8,
}

impl Route {
    /// CIDR form, as `ip route` expects it.
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.dest, self.prefix)
    }
}

/// Everything the platform needs to establish the virtual interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfacePlan {
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub mtu: u16,
    pub routes: Vec<Route>,
    pub dns: Vec<IpAddr>,
}

/// Build the interface plan for a role.
///
/// The host keeps its own traffic direct and routes only the relay through the
/// tunnel; the client sends everything through it.
pub fn plan_for(role: Role, relay: IpAddr) -> InterfacePlan {
    let (address, routes) = match role {
        Role::Host => (
            HOST_ADDR,
            vec![Route {
                dest: relay,
                prefix: single_host_prefix(relay),
            }],
        ),
        Role::Client => (
            CLIENT_ADDR,
            vec![Route {
                dest: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                prefix: 0,
            }],
        ),
    };
    InterfacePlan {
        address,
        prefix: 24,
        mtu: TUNNEL_MTU,
        routes,
        dns: DNS_SERVERS.to_vec(),
    }
}

fn single_host_prefix(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELAY: IpAddr = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));

    #[test]
    fn host_routes_only_the_relay() {
        let plan = plan_for(Role::Host, RELAY);
        assert_eq!(plan.address, HOST_ADDR);
        assert_eq!(plan.routes, vec![Route { dest: RELAY, prefix: 32 }]);
    }

    #[test]
    fn client_routes_everything() {
        let plan = plan_for(Role::Client, RELAY);
        assert_eq!(plan.address, CLIENT_ADDR);
        assert_eq!(plan.routes.len(), 1);
        assert_eq!(plan.routes[0].cidr(), "0.0.0.0/0");
    }

    #[test]
    fn shared_settings() {
        for role in [Role::Host, Role::Client] {
            let plan = plan_for(role, RELAY);
            assert_eq!(plan.prefix, 24);
            assert_eq!(plan.mtu, TUNNEL_MTU);
            assert_eq!(plan.dns.len(), 3);
        }
    }
}
