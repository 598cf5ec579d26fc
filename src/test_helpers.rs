//! Shared test utilities: addresses, event capture, polling.
//!
//! Available only under `#[cfg(test)]`.

use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::events::{EventSink, NodeEvent};
use crate::network::protocol::PeerAddress;

pub fn addr(host: &str, port: u16) -> PeerAddress {
    PeerAddress::new(host, port)
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Event sink that records everything it is given.
pub fn recording_sink() -> (EventSink, Arc<Mutex<Vec<NodeEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink: EventSink = {
        let seen = seen.clone();
        Arc::new(move |event: NodeEvent| seen.lock().unwrap().push(event))
    };
    (sink, seen)
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
