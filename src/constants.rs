// === Network defaults ===
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_DISCOVERY_PORT: u16 = 8889;
pub const PORT_BIND_ATTEMPTS: u16 = 20;

// === Discovery ===
pub const BROADCAST_INTERVAL_SECS: u64 = 10;
pub const DISCOVERY_RECV_TIMEOUT_MS: u64 = 1_000;
pub const MAX_DATAGRAM_BYTES: usize = 4_096;

// === Inbound / outbound timeouts ===
pub const READ_TIMEOUT_SECS: u64 = 5;
pub const SEND_TIMEOUT_SECS: u64 = 3;
/// Single-read capacity for inbound payloads. Messages are not framed,
/// so anything longer is truncated.
pub const MAX_FRAME_BYTES: usize = 4_096;

// === Fan-out ===
pub const FANOUT_WORKERS: usize = 16;
pub const EVICT_AFTER_FAILURES: u32 = 1;

// === Peer liveness (seconds) ===
pub const ACTIVE_WINDOW_SECS: u64 = 60;
pub const DELIVERY_WINDOW_SECS: u64 = 30;
pub const STALE_AFTER_SECS: u64 = 300;
pub const FRESH_PEER_SECS: u64 = 10;

// === Maintenance ===
pub const CLEANUP_INTERVAL_SECS: u64 = 30;
pub const STATUS_INTERVAL_SECS: u64 = 60;

// === Log view ===
pub const RECENT_LOG_ENTRIES: usize = 20;
pub const LOCAL_SENDER_LABEL: &str = "You";

// === Files ===
pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_LOG_FILE: &str = "network_messenger.log";
