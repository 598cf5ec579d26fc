//! Outgoing fan-out: deliver one chat message to every live peer at once.
//!
//! Architecture:
//!   send_to_peers() -> registry snapshot (delivery window)
//!     -> encode once -> log locally
//!     -> fixed rayon pool delivers to each target (connect, write, close)
//!     -> success refreshes the peer, failure evicts it
//!
//! Per-peer failures never fail the call. Only bad input or an encoding
//! failure does, and both happen before any network activity.

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::id_gen::MessageIdGen;
use crate::message_log::{LogEntry, MessageLog};
use crate::network::protocol::{ChatMessage, PeerAddress, WireMessage};
use crate::registry::PeerRegistry;
use crate::time_utils;
use crate::{MessengerError, MessengerResult};

/// How a single delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Refused,
    TimedOut,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::TimedOut,
            _ => Self::Failed(err.to_string()),
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Refused => write!(f, "connection refused"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One-shot delivery of an encoded payload to a peer.
pub trait Transport: Send + Sync {
    fn deliver(&self, target: &PeerAddress, payload: &[u8]) -> DeliveryOutcome;
}

/// Plain TCP: connect with a timeout, write everything, close.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Transport for TcpTransport {
    fn deliver(&self, target: &PeerAddress, payload: &[u8]) -> DeliveryOutcome {
        let resolved = match (target.host(), target.port()).to_socket_addrs() {
            Ok(mut addrs) => addrs.next(),
            Err(e) => return DeliveryOutcome::Failed(format!("resolve: {}", e)),
        };
        let Some(sock_addr) = resolved else {
            return DeliveryOutcome::Failed("resolve: no address".into());
        };

        let mut stream = match TcpStream::connect_timeout(&sock_addr, self.timeout) {
            Ok(s) => s,
            Err(e) => return DeliveryOutcome::from_io_error(&e),
        };
        if let Err(e) = stream.set_write_timeout(Some(self.timeout)) {
            return DeliveryOutcome::from_io_error(&e);
        }
        match stream.write_all(payload).and_then(|_| stream.flush()) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => DeliveryOutcome::from_io_error(&e),
        }
    }
}

/// Result of one `send_to_peers` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendReport {
    /// Set when there was something to send.
    pub message_id: Option<u64>,
    pub attempted: usize,
    pub sent: usize,
    pub failed: Vec<(PeerAddress, DeliveryOutcome)>,
}

impl SendReport {
    /// Nobody was eligible; nothing went on the wire.
    pub fn no_active_peers(&self) -> bool {
        self.attempted == 0
    }

    pub fn failed_peers(&self) -> Vec<&PeerAddress> {
        self.failed.iter().map(|(p, _)| p).collect()
    }
}

pub struct MessageDispatcher {
    registry: Arc<PeerRegistry>,
    log: Arc<MessageLog>,
    transport: Arc<dyn Transport>,
    pool: rayon::ThreadPool,
    ids: MessageIdGen,
    delivery_window: Duration,
    evict_after_failures: u32,
    /// Consecutive failures per peer; only used when `evict_after_failures > 1`.
    failures: Mutex<HashMap<PeerAddress, u32>>,
}

impl MessageDispatcher {
    pub fn new(
        registry: Arc<PeerRegistry>,
        log: Arc<MessageLog>,
        transport: Arc<dyn Transport>,
        workers: usize,
        delivery_window: Duration,
        evict_after_failures: u32,
    ) -> MessengerResult<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fanout-{}", i))
            .build()
            .map_err(|e| MessengerError::InvalidState(format!("fan-out pool: {}", e)))?;

        tracing::info!(workers, evict_after_failures, "Dispatcher initialized");

        Ok(Self {
            registry,
            log,
            transport,
            pool,
            ids: MessageIdGen::new(),
            delivery_window,
            evict_after_failures: evict_after_failures.max(1),
            failures: Mutex::new(HashMap::new()),
        })
    }

    /// Send `text` to every peer seen within the delivery window.
    pub fn send_to_peers(
        &self,
        text: &str,
        self_address: &PeerAddress,
        now: Instant,
    ) -> MessengerResult<SendReport> {
        if text.trim().is_empty() {
            return Err(MessengerError::InvalidInput("message is empty".into()));
        }

        let targets = self.registry.snapshot_active(now, self.delivery_window);
        if targets.is_empty() {
            tracing::info!("No active peers, nothing sent");
            return Ok(SendReport::default());
        }

        let stamp = time_utils::now();
        let message_id = self.ids.next();
        let payload = WireMessage::Chat(ChatMessage {
            text: text.to_string(),
            sender: self_address.to_string(),
            timestamp: time_utils::to_wire(&stamp),
            message_id,
        })
        .encode()?;

        self.log.append(LogEntry::local(text));

        let outcomes: Vec<(PeerAddress, DeliveryOutcome)> = self.pool.install(|| {
            targets
                .par_iter()
                .map(|target| (target.clone(), self.transport.deliver(target, &payload)))
                .collect()
        });

        let mut report = SendReport {
            message_id: Some(message_id),
            attempted: outcomes.len(),
            ..SendReport::default()
        };

        for (peer, outcome) in outcomes {
            if outcome.is_delivered() {
                self.registry.touch(&peer, Instant::now());
                self.clear_failures(&peer);
                tracing::info!(peer = %peer, message_id, "Delivered");
                report.sent += 1;
            } else {
                tracing::warn!(peer = %peer, message_id, outcome = %outcome, "Delivery failed");
                self.record_failure(&peer);
                report.failed.push((peer, outcome));
            }
        }

        tracing::info!(
            message_id,
            sent = report.sent,
            failed = report.failed.len(),
            "Send complete"
        );
        Ok(report)
    }

    fn record_failure(&self, peer: &PeerAddress) {
        if self.evict_after_failures <= 1 {
            if self.registry.evict(peer) {
                tracing::info!(peer = %peer, "Evicted unreachable peer");
            }
            return;
        }

        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let count = failures.entry(peer.clone()).or_insert(0);
        *count += 1;
        if *count >= self.evict_after_failures {
            failures.remove(peer);
            drop(failures);
            if self.registry.evict(peer) {
                tracing::info!(peer = %peer, "Evicted unreachable peer");
            }
        }
    }

    fn clear_failures(&self, peer: &PeerAddress) {
        if self.evict_after_failures > 1 {
            self.failures
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{addr, closed_port};
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts attempts; fails for hosts listed in `refuse`.
    #[derive(Default)]
    struct ScriptedTransport {
        attempts: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        refuse: Vec<PeerAddress>,
        delay: Duration,
    }

    impl Transport for ScriptedTransport {
        fn deliver(&self, target: &PeerAddress, _payload: &[u8]) -> DeliveryOutcome {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.refuse.contains(target) {
                DeliveryOutcome::Refused
            } else {
                DeliveryOutcome::Delivered
            }
        }
    }

    fn dispatcher(
        registry: &Arc<PeerRegistry>,
        log: &Arc<MessageLog>,
        transport: Arc<dyn Transport>,
        workers: usize,
        evict_after: u32,
    ) -> MessageDispatcher {
        MessageDispatcher::new(
            registry.clone(),
            log.clone(),
            transport,
            workers,
            Duration::from_secs(30),
            evict_after,
        )
        .unwrap()
    }

    fn me() -> PeerAddress {
        addr("0.0.0.0", 8888)
    }

    #[test]
    fn test_no_active_peers_means_no_attempts() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let transport = Arc::new(ScriptedTransport::default());
        let d = dispatcher(&registry, &log, transport.clone(), 4, 1);

        // Known but outside the delivery window
        let t0 = Instant::now();
        registry.touch(&addr("10.0.0.2", 8888), t0);
        let report = d.send_to_peers("hi", &me(), t0 + Duration::from_secs(31)).unwrap();

        assert!(report.no_active_peers());
        assert_eq!(report.sent, 0);
        assert_eq!(report.message_id, None);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_empty_text_rejected_before_network() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let transport = Arc::new(ScriptedTransport::default());
        let d = dispatcher(&registry, &log, transport.clone(), 4, 1);
        registry.touch(&addr("10.0.0.2", 8888), Instant::now());

        let err = d.send_to_peers("   ", &me(), Instant::now()).unwrap_err();
        assert!(matches!(err, MessengerError::InvalidInput(_)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reachable_refreshed_and_refused_evicted_over_tcp() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let d = dispatcher(
            &registry,
            &log,
            Arc::new(TcpTransport::new(Duration::from_secs(3))),
            4,
            1,
        );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let reachable = PeerAddress::from(listener.local_addr().unwrap());
        let unreachable = addr("127.0.0.1", closed_port());

        let received = Arc::new(Mutex::new(Vec::new()));
        let acceptor = {
            let received = received.clone();
            std::thread::spawn(move || {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = Vec::new();
                stream.read_to_end(&mut buf).unwrap();
                *received.lock().unwrap() = buf;
            })
        };

        let t0 = Instant::now();
        registry.touch(&reachable, t0);
        registry.touch(&unreachable, t0);

        let report = d.send_to_peers("hello", &addr("127.0.0.1", 7000), t0).unwrap();
        acceptor.join().unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed_peers(), vec![&unreachable]);
        assert_eq!(report.failed[0].1, DeliveryOutcome::Refused);

        let active = registry.snapshot_active(Instant::now(), Duration::from_secs(30));
        assert!(active.contains(&reachable));
        assert!(!active.contains(&unreachable));
        assert!(registry.last_seen(&reachable).unwrap() >= t0);

        let wire: serde_json::Value = serde_json::from_slice(&received.lock().unwrap()).unwrap();
        assert_eq!(wire["type"], "message");
        assert_eq!(wire["text"], "hello");
        assert_eq!(wire["sender"], "127.0.0.1:7000");
        assert_eq!(wire["message_id"].as_u64(), report.message_id);

        // Own copy logged regardless of outcome
        assert_eq!(log.len(), 1);
        assert_eq!(log.recent(1)[0].sender, "You");
    }

    #[test]
    fn test_all_failed_still_logs_locally() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let p = addr("10.0.0.2", 8888);
        let transport = Arc::new(ScriptedTransport {
            refuse: vec![p.clone()],
            ..ScriptedTransport::default()
        });
        let d = dispatcher(&registry, &log, transport, 2, 1);
        registry.touch(&p, Instant::now());

        let report = d.send_to_peers("anyone?", &me(), Instant::now()).unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(registry.is_empty());
        assert_eq!(log.recent(1)[0].text, "anyone?");
    }

    #[test]
    fn test_eviction_threshold_is_tunable() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let p = addr("10.0.0.2", 8888);
        let transport = Arc::new(ScriptedTransport {
            refuse: vec![p.clone()],
            ..ScriptedTransport::default()
        });
        let d = dispatcher(&registry, &log, transport, 2, 2);
        registry.touch(&p, Instant::now());

        d.send_to_peers("one", &me(), Instant::now()).unwrap();
        assert!(registry.contains(&p), "first failure tolerated");

        d.send_to_peers("two", &me(), Instant::now()).unwrap();
        assert!(!registry.contains(&p), "second consecutive failure evicts");
    }

    #[test]
    fn test_fanout_bounded_by_pool_size() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let transport = Arc::new(ScriptedTransport {
            delay: Duration::from_millis(50),
            ..ScriptedTransport::default()
        });
        let d = dispatcher(&registry, &log, transport.clone(), 2, 1);
        let now = Instant::now();
        for i in 0..6 {
            registry.touch(&addr("10.0.0.2", 9000 + i), now);
        }

        let report = d.send_to_peers("fan", &me(), now).unwrap();
        assert_eq!(report.sent, 6);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 6);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_message_ids_increase_across_sends() {
        let registry = Arc::new(PeerRegistry::new());
        let log = Arc::new(MessageLog::new());
        let d = dispatcher(&registry, &log, Arc::new(ScriptedTransport::default()), 2, 1);
        registry.touch(&addr("10.0.0.2", 8888), Instant::now());

        let a = d.send_to_peers("a", &me(), Instant::now()).unwrap().message_id.unwrap();
        let b = d.send_to_peers("b", &me(), Instant::now()).unwrap().message_id.unwrap();
        assert!(b > a);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_io_error_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        let other = io::Error::from(io::ErrorKind::BrokenPipe);
        assert_eq!(DeliveryOutcome::from_io_error(&refused), DeliveryOutcome::Refused);
        assert_eq!(DeliveryOutcome::from_io_error(&timed_out), DeliveryOutcome::TimedOut);
        assert!(matches!(DeliveryOutcome::from_io_error(&other), DeliveryOutcome::Failed(_)));
    }
}
