//! Addresses of this machine, used to give same-host peers one registry key.
//!
//! A node announcing the wildcard host is keyed by the source IP of its
//! datagrams. Another node on the same machine is heard both through
//! loopback and through the LAN interface; both sources map to `127.0.0.1`.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Mutex, MutexGuard};

pub const CANONICAL_LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Debug, Default)]
pub struct LocalHosts {
    ips: Mutex<HashSet<IpAddr>>,
}

impl LocalHosts {
    pub fn new(seed: impl IntoIterator<Item = IpAddr>) -> Self {
        let hosts = Self::default();
        for ip in seed {
            hosts.learn(ip);
        }
        hosts
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<IpAddr>> {
        self.ips.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record `ip` as belonging to this machine. Returns true if it was new.
    /// Loopback and wildcard addresses are implied and never stored.
    pub fn learn(&self, ip: IpAddr) -> bool {
        if ip.is_loopback() || ip.is_unspecified() {
            return false;
        }
        let added = self.lock().insert(ip);
        if added {
            tracing::info!(ip = %ip, "Learned local address");
        }
        added
    }

    pub fn is_local(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.lock().contains(&ip)
    }

    /// Loopback or a known local address becomes `127.0.0.1`; anything else
    /// is returned unchanged.
    pub fn canonical(&self, ip: IpAddr) -> IpAddr {
        if self.is_local(ip) {
            CANONICAL_LOCAL
        } else {
            ip
        }
    }
}

/// Interface address broadcasts leave from, found by connecting an unsent
/// UDP socket. None when there is no route.
pub fn broadcast_interface_ip(discovery_port: u16) -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.set_broadcast(true).ok()?;
    socket
        .connect(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), discovery_port))
        .ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified() && !ip.is_loopback()).then_some(ip)
}
