//! LAN networking: discovery over UDP broadcast, messages over TCP.

pub mod discovery;
pub mod dispatcher;
pub mod inbound;
pub mod local_hosts;
pub mod protocol;

pub use dispatcher::{DeliveryOutcome, MessageDispatcher, SendReport, TcpTransport, Transport};
pub use protocol::PeerAddress;
