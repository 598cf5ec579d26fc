//! The node: one context object owning config, registry, log and every
//! running service.
//!
//! Architecture:
//!   - inbound server: accept thread + 1 thread per connection
//!   - discovery: broadcaster thread + listener thread
//!   - maintenance: 1 thread for stale eviction and status logging
//!   - dispatcher: fixed worker pool, used only during `send_to_peers`
//!
//! Startup binds the TCP listener first (its port is the identity we
//! announce), then discovery. Either failing aborts startup.

pub mod maintenance;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::NodeConfig;
use crate::events::EventSink;
use crate::message_log::{LogEntry, MessageLog};
use crate::network::discovery::{DiscoverySettings, DiscoveryService};
use crate::network::dispatcher::{MessageDispatcher, SendReport, TcpTransport};
use crate::network::inbound::{self, InboundHandler, InboundServer};
use crate::network::protocol::PeerAddress;
use crate::registry::{Freshness, PeerRegistry};
use crate::shutdown::ShutdownSignal;
use crate::MessengerResult;

/// One row of the peer list.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerView {
    pub address: PeerAddress,
    pub age: Duration,
    pub freshness: Freshness,
}

/// Snapshot for the status screen.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub self_address: PeerAddress,
    pub discovery_port: u16,
    pub running: bool,
    pub active_count: usize,
    pub total_known: usize,
    pub log_size: usize,
}

pub struct Node {
    config: NodeConfig,
    identity: PeerAddress,
    inbound_addr: SocketAddr,
    discovery_addr: SocketAddr,
    registry: Arc<PeerRegistry>,
    log: Arc<MessageLog>,
    dispatcher: MessageDispatcher,
    discovery: Arc<DiscoveryService>,
    shutdown: ShutdownSignal,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Start every service with LAN discovery defaults.
    pub fn start(config: NodeConfig, events: EventSink) -> MessengerResult<Self> {
        let interval = config.broadcast_interval();
        let discovery_port = config.discovery_port;
        Self::start_with(config, events, move |identity| {
            DiscoverySettings::lan(identity.clone(), discovery_port, interval)
        })
    }

    /// Start with custom discovery settings, derived from the bound identity.
    pub fn start_with(
        config: NodeConfig,
        events: EventSink,
        discovery_settings: impl FnOnce(&PeerAddress) -> DiscoverySettings,
    ) -> MessengerResult<Self> {
        config.validate()?;

        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let shutdown = ShutdownSignal::new();

        let listener = inbound::bind_with_retry(&config.host, config.port, config.port_attempts)?;
        let inbound_addr = listener.local_addr()?;
        let identity = PeerAddress::new(config.host.clone(), inbound_addr.port());

        let discovery = Arc::new(DiscoveryService::bind(
            discovery_settings(&identity),
            registry.clone(),
            events.clone(),
            shutdown.clone(),
        )?);
        let discovery_addr = discovery.local_addr()?;

        let dispatcher = MessageDispatcher::new(
            registry.clone(),
            log.clone(),
            Arc::new(TcpTransport::new(config.send_timeout())),
            config.fanout_workers,
            config.peers.delivery_window(),
            config.evict_after_failures,
        )?;

        let handler = InboundHandler::new(
            registry.clone(),
            log.clone(),
            events,
            config.read_timeout(),
            config.max_frame_bytes,
        )
        .with_local_hosts(discovery.local_hosts());
        let server = InboundServer::new(listener, handler, shutdown.clone())?;

        let mut handles = Vec::new();
        let spawned = (|| -> std::io::Result<()> {
            handles.push(server.spawn()?);
            handles.extend(discovery.spawn()?);
            let registry = registry.clone();
            let log = log.clone();
            let policy = config.peers.clone();
            let shutdown = shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                    .name("maintenance".into())
                    .spawn(move || maintenance::run_maintenance_loop(registry, log, policy, shutdown))?,
            );
            Ok(())
        })();
        if let Err(e) = spawned {
            // Stop whatever did start before reporting.
            shutdown.trigger();
            inbound::wake(inbound_addr);
            for handle in handles {
                let _ = handle.join();
            }
            return Err(e.into());
        }

        tracing::info!(
            identity = %identity,
            inbound = %inbound_addr,
            discovery = %discovery_addr,
            "Node started"
        );

        Ok(Self {
            config,
            identity,
            inbound_addr,
            discovery_addr,
            registry,
            log,
            dispatcher,
            discovery,
            shutdown,
            handles: Mutex::new(handles),
        })
    }

    /// Address other nodes reach us at, as announced.
    pub fn identity(&self) -> &PeerAddress {
        &self.identity
    }

    pub fn inbound_addr(&self) -> SocketAddr {
        self.inbound_addr
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Send `text` to every peer in the delivery window.
    pub fn send_to_peers(&self, text: &str) -> MessengerResult<SendReport> {
        self.dispatcher
            .send_to_peers(text, &self.identity, Instant::now())
    }

    /// Peers a send would go to right now.
    pub fn deliverable_count(&self) -> usize {
        self.registry
            .count_active(Instant::now(), self.config.peers.delivery_window())
    }

    /// Peers seen within the display window, freshest first.
    pub fn list_active_peers(&self) -> Vec<PeerView> {
        let policy = &self.config.peers;
        self.registry
            .active_with_age(Instant::now(), policy.active_window())
            .into_iter()
            .map(|(address, age)| PeerView {
                address,
                age,
                freshness: Freshness::classify(age, policy.delivery_window()),
            })
            .collect()
    }

    pub fn recent_log(&self, n: usize) -> Vec<LogEntry> {
        self.log.recent(n)
    }

    pub fn status(&self) -> NodeStatus {
        let now = Instant::now();
        NodeStatus {
            self_address: self.identity.clone(),
            discovery_port: self.discovery_addr.port(),
            running: self.shutdown.is_running(),
            active_count: self
                .registry
                .count_active(now, self.config.peers.active_window()),
            total_known: self.registry.len(),
            log_size: self.log.len(),
        }
    }

    /// Announce ourselves right away instead of waiting for the next round.
    pub fn refresh_discovery(&self) -> usize {
        tracing::info!("Forced discovery announcement");
        self.discovery.announce_now()
    }

    /// Stop every service and wait for their threads.
    ///
    /// Deliveries already in flight finish on their own timeout.
    pub fn shutdown(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        tracing::info!("Shutting down...");

        inbound::wake(self.inbound_addr);

        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .map(|mut h| h.drain(..).collect())
            .unwrap_or_default();
        for handle in handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "Service thread panicked");
            }
        }

        tracing::info!("Node shutdown complete");
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}
