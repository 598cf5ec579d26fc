//! Discovery: periodic presence broadcast plus a listener that feeds the
//! peer registry.
//!
//! Two threads share the service:
//!   - broadcaster: announces this node every `interval` to the LAN
//!     broadcast address and to loopback
//!   - listener: receives announcements (1s read timeout so it notices
//!     shutdown) and touches the registry for every peer but ourselves
//!
//! Everything here is best-effort. Bad datagrams are dropped without a
//! trace above debug level.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants;
use crate::events::{EventSink, NodeEvent};
use crate::network::local_hosts::{self, LocalHosts};
use crate::network::protocol::{self, Announcement, PeerAddress, WireMessage};
use crate::registry::PeerRegistry;
use crate::shutdown::ShutdownSignal;
use crate::time_utils;
use crate::{MessengerError, MessengerResult};

/// Where and how often to announce.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// This node's identity as announced (config host + bound message port).
    pub identity: PeerAddress,
    /// Address the listener binds.
    pub bind_addr: SocketAddr,
    /// Destinations for every announcement.
    pub targets: Vec<SocketAddr>,
    pub interval: Duration,
    pub recv_timeout: Duration,
    /// Addresses of this machine known up front. More are learned from our
    /// own announcements coming back.
    pub seed_local_ips: Vec<IpAddr>,
}

impl DiscoverySettings {
    /// LAN defaults: listen on all interfaces, announce to the limited
    /// broadcast address and to loopback.
    pub fn lan(identity: PeerAddress, discovery_port: u16, interval: Duration) -> Self {
        Self {
            identity,
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), discovery_port),
            targets: vec![
                SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), discovery_port),
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), discovery_port),
            ],
            interval,
            recv_timeout: Duration::from_millis(constants::DISCOVERY_RECV_TIMEOUT_MS),
            seed_local_ips: local_hosts::broadcast_interface_ip(discovery_port).into_iter().collect(),
        }
    }
}

pub struct DiscoveryService {
    recv_socket: UdpSocket,
    send_socket: UdpSocket,
    settings: DiscoverySettings,
    registry: Arc<PeerRegistry>,
    local_hosts: Arc<LocalHosts>,
    events: EventSink,
    shutdown: ShutdownSignal,
}

impl DiscoveryService {
    /// Bind both sockets. Fails if the discovery port cannot be bound.
    pub fn bind(
        settings: DiscoverySettings,
        registry: Arc<PeerRegistry>,
        events: EventSink,
        shutdown: ShutdownSignal,
    ) -> MessengerResult<Self> {
        let port = settings.bind_addr.port();
        let discovery_err = |source: io::Error| MessengerError::Discovery { port, source };

        let recv_socket = bind_shared_udp(settings.bind_addr).map_err(discovery_err)?;
        recv_socket
            .set_read_timeout(Some(settings.recv_timeout))
            .map_err(discovery_err)?;

        let send_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(discovery_err)?;
        send_socket.set_broadcast(true).map_err(discovery_err)?;

        tracing::info!(
            bind = %settings.bind_addr,
            identity = %settings.identity,
            interval_secs = settings.interval.as_secs(),
            "Discovery bound"
        );

        let local_hosts = Arc::new(LocalHosts::new(settings.seed_local_ips.iter().copied()));

        Ok(Self {
            recv_socket,
            send_socket,
            settings,
            registry,
            local_hosts,
            events,
            shutdown,
        })
    }

    /// Actual listener address (useful when bound to port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.recv_socket.local_addr()
    }

    /// This machine's addresses, shared with the inbound server.
    pub fn local_hosts(&self) -> Arc<LocalHosts> {
        Arc::clone(&self.local_hosts)
    }

    /// Start the broadcaster and listener threads.
    pub fn spawn(self: &Arc<Self>) -> io::Result<Vec<JoinHandle<()>>> {
        let broadcaster = {
            let svc = Arc::clone(self);
            std::thread::Builder::new()
                .name("discovery-broadcast".into())
                .spawn(move || svc.broadcast_loop())?
        };
        let listener = {
            let svc = Arc::clone(self);
            std::thread::Builder::new()
                .name("discovery-listen".into())
                .spawn(move || svc.listen_loop())?
        };
        Ok(vec![broadcaster, listener])
    }

    fn announcement(&self) -> Result<Vec<u8>, serde_json::Error> {
        WireMessage::Discovery(Announcement {
            host: self.settings.identity.host().to_string(),
            port: self.settings.identity.port(),
            timestamp: time_utils::unix_secs_f64(&time_utils::now()),
        })
        .encode()
    }

    /// Send one announcement to every target. Returns how many sends succeeded.
    pub fn announce(&self) -> usize {
        self.announce_to(&self.settings.targets)
    }

    /// One-shot announcement to the broadcast targets only.
    pub fn announce_now(&self) -> usize {
        self.announce_to(&refresh_targets(&self.settings.targets))
    }

    fn announce_to(&self, targets: &[SocketAddr]) -> usize {
        let payload = match self.announcement() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Cannot encode announcement");
                return 0;
            }
        };

        let mut sent = 0;
        for target in targets {
            match self.send_socket.send_to(&payload, target) {
                Ok(_) => sent += 1,
                Err(e) => tracing::warn!(target = %target, error = %e, "Announcement send failed"),
            }
        }
        tracing::debug!(sent, targets = targets.len(), "Announcement sent");
        sent
    }

    fn broadcast_loop(&self) {
        tracing::info!("Broadcaster started");
        while self.shutdown.is_running() {
            self.announce();
            if !self.shutdown.wait(self.settings.interval) {
                break;
            }
        }
        tracing::info!("Broadcaster stopped");
    }

    fn listen_loop(&self) {
        tracing::info!("Discovery listener started");
        let mut buf = [0u8; constants::MAX_DATAGRAM_BYTES];

        while self.shutdown.is_running() {
            match self.recv_socket.recv_from(&mut buf) {
                Ok((0, _)) => continue,
                Ok((len, src)) => {
                    self.handle_datagram(&buf[..len], src.ip(), Instant::now());
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    tracing::error!(error = %e, "Discovery socket error");
                    // Don't spin on a persistent socket error
                    self.shutdown.wait(Duration::from_millis(200));
                }
            }
        }
        tracing::info!("Discovery listener stopped");
    }

    /// Apply one received datagram. Returns the peer it refreshed, if any.
    pub fn handle_datagram(&self, bytes: &[u8], source: IpAddr, now: Instant) -> Option<PeerAddress> {
        let announced = match protocol::decode_discovery(bytes, source) {
            Some(a) => a,
            None => {
                tracing::debug!(source = %source, len = bytes.len(), "Ignoring datagram");
                return None;
            }
        };

        // Our own broadcast comes back through loopback and the LAN.
        // Its source is one of our own addresses.
        if announced == self.settings.identity {
            self.local_hosts.learn(source);
            return None;
        }

        let peer = announced.resolve_against(self.local_hosts.canonical(source));
        if self.registry.touch(&peer, now) {
            tracing::info!(peer = %peer, "Discovered new peer");
            (self.events)(NodeEvent::PeerDiscovered(peer.clone()));
        }
        Some(peer)
    }
}

/// Targets for a forced announcement: the non-loopback ones, or every
/// target when all of them are loopback.
fn refresh_targets(targets: &[SocketAddr]) -> Vec<SocketAddr> {
    let remote: Vec<SocketAddr> = targets
        .iter()
        .copied()
        .filter(|t| !t.ip().is_loopback())
        .collect();
    if remote.is_empty() {
        targets.to_vec()
    } else {
        remote
    }
}

/// Bind a UDP socket that other local nodes can bind too (SO_REUSEADDR),
/// so several nodes on one host all receive broadcasts.
#[cfg(unix)]
fn bind_shared_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    use std::os::unix::io::FromRawFd;

    let v4 = match addr {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(_) => return UdpSocket::bind(addr),
    };

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let reuse: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        sin.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = v4.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*v4.ip()).to_be(),
    };

    let ret = unsafe {
        libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(unsafe { UdpSocket::from_raw_fd(fd) })
}

#[cfg(not(unix))]
fn bind_shared_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    UdpSocket::bind(addr)
}
