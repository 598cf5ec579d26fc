//! LAN Messenger: peer-to-peer text messaging on a local network.
//!
//! Nodes find each other by UDP broadcast, track peer liveness in a shared
//! registry, and deliver messages over direct TCP connections. Delivery is
//! best-effort: unreachable peers are evicted and re-admitted by discovery.

// Foundation
pub mod constants;
pub mod error;
pub mod id_gen;
pub mod time_utils;

// Core types
pub mod config;
pub mod events;
pub mod message_log;
pub mod shutdown;

// Sub-systems
pub mod network;
pub mod node;
pub mod registry;
pub mod tracing_init;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-exports for convenience
pub use config::{NodeConfig, PeerPolicy};
pub use error::{MessengerError, MessengerResult};
pub use events::{EventSink, NodeEvent};
pub use message_log::LogEntry;
pub use network::{DeliveryOutcome, PeerAddress, SendReport};
pub use node::{Node, NodeStatus, PeerView};
