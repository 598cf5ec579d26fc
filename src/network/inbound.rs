//! Inbound message server: TCP listener, one thread per connection.
//!
//! Each connection carries exactly one message in a single read of up to
//! `max_frame_bytes`. There is no framing, so longer payloads are cut at
//! that size and usually end up as plain text.
//!
//! Per connection:
//!   read once -> decode (chat JSON or plain text) -> append to log
//!   -> touch sender in registry -> drop the stream
//!
//! Nothing a single peer sends can take the server down: errors are logged
//! and the connection is closed.

use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::events::{EventSink, NodeEvent};
use crate::message_log::{LogEntry, MessageLog};
use crate::network::local_hosts::LocalHosts;
use crate::network::protocol::{self, InboundPayload, PeerAddress};
use crate::registry::PeerRegistry;
use crate::shutdown::ShutdownSignal;
use crate::time_utils;
use crate::{MessengerError, MessengerResult};

/// Bind `host:first_port`, moving to the next port on failure, up to
/// `attempts` ports in total.
pub fn bind_with_retry(host: &str, first_port: u16, attempts: u16) -> MessengerResult<TcpListener> {
    let attempts = attempts.max(1);
    let last_port = first_port.saturating_add(attempts - 1);
    let mut last_err = None;

    for port in first_port..=last_port {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                if port != first_port {
                    tracing::info!(requested = first_port, bound = port, "Requested port busy, moved on");
                }
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "Bind failed, trying next port");
                last_err = Some(e);
            }
        }
    }

    let source = last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no port tried"));
    tracing::error!(first = first_port, last = last_port, error = %source, "No free port");
    Err(MessengerError::Bind {
        first: first_port,
        last: last_port,
        source,
    })
}

/// Turns one received payload into a log entry and a registry sighting.
/// Shared by every connection thread.
pub struct InboundHandler {
    registry: Arc<PeerRegistry>,
    log: Arc<MessageLog>,
    events: EventSink,
    local_hosts: Arc<LocalHosts>,
    read_timeout: Duration,
    max_frame_bytes: usize,
}

impl InboundHandler {
    pub fn new(
        registry: Arc<PeerRegistry>,
        log: Arc<MessageLog>,
        events: EventSink,
        read_timeout: Duration,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            registry,
            log,
            events,
            local_hosts: Arc::new(LocalHosts::default()),
            read_timeout,
            max_frame_bytes,
        }
    }

    /// Share the set of this machine's addresses with discovery.
    pub fn with_local_hosts(mut self, local_hosts: Arc<LocalHosts>) -> Self {
        self.local_hosts = local_hosts;
        self
    }

    /// Serve one connection. The stream is closed when this returns.
    pub fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_read_timeout(Some(self.read_timeout)) {
            tracing::warn!(peer = %peer, error = %e, "Cannot set read timeout");
            return;
        }

        let mut buf = vec![0u8; self.max_frame_bytes];
        let len = match stream.read(&mut buf) {
            Ok(0) => {
                tracing::debug!(peer = %peer, "Connection closed without data");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Receive failed");
                return;
            }
        };

        let (entry, sender) = self.ingest(&buf[..len], peer, Instant::now());
        tracing::info!(peer = %peer, sender = %sender, bytes = len, "Message received");
        (self.events)(NodeEvent::MessageReceived(entry));
    }

    /// Record one payload: exactly one log entry and one registry touch.
    /// Returns the entry and the address that was touched.
    pub fn ingest(&self, bytes: &[u8], peer: SocketAddr, now: Instant) -> (LogEntry, PeerAddress) {
        let observed = PeerAddress::from(peer);

        let (entry, sender) = match protocol::decode_inbound(bytes) {
            InboundPayload::Chat(chat) => {
                let label = chat.sender.clone().unwrap_or_else(|| observed.to_string());
                let sender = chat
                    .sender
                    .as_deref()
                    .and_then(|s| s.parse::<PeerAddress>().ok())
                    .map(|a| a.resolve_against(self.local_hosts.canonical(peer.ip())))
                    .unwrap_or_else(|| observed.clone());
                let shown_at = chat
                    .timestamp
                    .as_deref()
                    .map(time_utils::display_from_wire)
                    .unwrap_or_else(|| time_utils::display(&time_utils::now()));
                (LogEntry::new(shown_at, label, chat.text), sender)
            }
            InboundPayload::PlainText(text) => {
                tracing::debug!(peer = %peer, "Payload is not a chat message, keeping as text");
                let shown_at = time_utils::display(&time_utils::now());
                (LogEntry::new(shown_at, observed.to_string(), text), observed)
            }
        };

        self.log.append(entry.clone());
        self.registry.touch(&sender, now);
        (entry, sender)
    }
}

pub struct InboundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<InboundHandler>,
    shutdown: ShutdownSignal,
}

impl InboundServer {
    pub fn new(listener: TcpListener, handler: InboundHandler, shutdown: ShutdownSignal) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(handler),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the accept loop on its own thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("inbound-accept".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        tracing::info!(addr = %self.local_addr, "Inbound server listening");

        while self.shutdown.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    let handler = self.handler.clone();
                    let spawned = std::thread::Builder::new()
                        .name(format!("inbound-{}", peer))
                        .spawn(move || handler.handle_connection(stream, peer));
                    if let Err(e) = spawned {
                        tracing::error!(peer = %peer, error = %e, "Cannot spawn connection thread");
                    }
                }
                Err(e) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    tracing::warn!(error = %e, "Accept error");
                    self.shutdown.wait(Duration::from_millis(100));
                }
            }
        }

        tracing::info!("Inbound server stopped");
    }
}

/// Unblock a listener stuck in `accept()` by connecting to it.
pub fn wake(local_addr: SocketAddr) {
    let target = match local_addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), local_addr.port()),
        _ => local_addr,
    };
    // Connect and drop: the accept returns and the loop sees the flag.
    if let Err(e) = TcpStream::connect_timeout(&target, Duration::from_secs(1)) {
        tracing::warn!(target = %target, error = %e, "Cannot wake inbound listener; accept may stay blocked");
    }
}
