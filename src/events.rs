//! Observer hook for things the user should see as they happen.
//!
//! Services call the sink from their own threads; it must not block.

use std::sync::Arc;

use crate::message_log::LogEntry;
use crate::network::protocol::PeerAddress;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    PeerDiscovered(PeerAddress),
    MessageReceived(LogEntry),
}

pub type EventSink = Arc<dyn Fn(NodeEvent) + Send + Sync>;

/// Sink that drops every event.
pub fn discard() -> EventSink {
    Arc::new(|_: NodeEvent| {})
}
