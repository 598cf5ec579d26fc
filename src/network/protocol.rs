//! Wire formats: discovery datagrams, chat payloads and peer addresses.
//!
//! Discovery (UDP, one datagram):
//!   `{"type":"discovery","host":"10.0.0.5","port":8888,"timestamp":1714560000.123}`
//!
//! Chat (TCP, one write, no framing):
//!   `{"type":"message","text":"hi","sender":"10.0.0.5:8888","timestamp":"2024-05-01T12:00:00.000000","message_id":1714560000123}`
//!
//! Inbound TCP payloads that are not a chat object are kept as plain text.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::MessengerError;

/// Peer identity: host exactly as advertised plus port. No DNS normalization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddress {
    host: String,
    port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// True when the host is a wildcard bind address (`0.0.0.0`, `::`),
    /// which says nothing about where the peer can be reached.
    pub fn has_unspecified_host(&self) -> bool {
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_unspecified())
            .unwrap_or(false)
    }

    /// Replace a wildcard host with the address the traffic actually came from.
    pub fn resolve_against(self, observed: IpAddr) -> Self {
        if self.has_unspecified_host() {
            Self::new(observed.to_string(), self.port)
        } else {
            self
        }
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = MessengerError;

    /// Parse `host:port`, splitting on the last colon.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| MessengerError::InvalidInput(format!("missing port in '{}'", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(MessengerError::InvalidInput(format!("missing host in '{}'", s)));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| MessengerError::InvalidInput(format!("bad port in '{}'", s)))?;
        if port == 0 {
            return Err(MessengerError::InvalidInput(format!("port 0 in '{}'", s)));
        }
        Ok(Self::new(host, port))
    }
}

/// Presence announcement broadcast by every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub host: String,
    pub port: u16,
    /// Unix seconds at send time.
    pub timestamp: f64,
}

/// Point-to-point chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    /// `host:port` of the sending node's listener.
    pub sender: String,
    /// ISO 8601.
    pub timestamp: String,
    pub message_id: u64,
}

/// Every message this node puts on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "discovery")]
    Discovery(Announcement),
    #[serde(rename = "message")]
    Chat(ChatMessage),
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decode a discovery datagram. `source` fills in a missing host.
///
/// Returns `None` for anything that is not a usable announcement: invalid
/// JSON, another message type, missing or non-integer port, port 0 or out
/// of range. A numeric string port is accepted.
pub fn decode_discovery(bytes: &[u8], source: IpAddr) -> Option<PeerAddress> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let obj = value.as_object()?;

    if obj.get("type").and_then(|v| v.as_str()) != Some("discovery") {
        return None;
    }

    let port = match obj.get("port")? {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    let port = u16::try_from(port).ok().filter(|p| *p != 0)?;

    let host = match obj.get("host") {
        Some(serde_json::Value::String(h)) if !h.is_empty() => h.clone(),
        Some(serde_json::Value::String(_)) | None => source.to_string(),
        Some(_) => return None,
    };

    Some(PeerAddress::new(host, port))
}

/// Chat payload as received. Fields are optional: peers running older or
/// foreign builds may omit any of them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundChat {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message_id: Option<u64>,
}

/// Result of decoding one inbound TCP payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Chat(InboundChat),
    PlainText(String),
}

/// Decode one inbound TCP payload.
///
/// A JSON object whose `type` is absent or `"message"` and whose fields have
/// the expected shapes is a chat message. Anything else, including truncated
/// JSON, is plain text (invalid UTF-8 replaced).
pub fn decode_inbound(bytes: &[u8]) -> InboundPayload {
    let as_chat = serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .filter(|v| {
            v.is_object()
                && matches!(
                    v.get("type").and_then(|t| t.as_str()),
                    None | Some("message")
                )
        })
        .and_then(|v| serde_json::from_value::<InboundChat>(v).ok());

    match as_chat {
        Some(chat) => InboundPayload::Chat(chat),
        None => InboundPayload::PlainText(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SRC: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    #[test]
    fn test_announcement_wire_shape() {
        let msg = WireMessage::Discovery(Announcement {
            host: "0.0.0.0".into(),
            port: 8888,
            timestamp: 1.5,
        });
        let v: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(v["type"], "discovery");
        assert_eq!(v["host"], "0.0.0.0");
        assert_eq!(v["port"], 8888);
        assert_eq!(v["timestamp"], 1.5);
    }

    #[test]
    fn test_chat_wire_shape_preserves_utf8() {
        let msg = WireMessage::Chat(ChatMessage {
            text: "привет 👋".into(),
            sender: "10.0.0.1:8888".into(),
            timestamp: "2024-05-01T12:00:00.000000".into(),
            message_id: 7,
        });
        let bytes = msg.encode().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["text"], "привет 👋");
        assert_eq!(v["message_id"], 7);

        match decode_inbound(&bytes) {
            InboundPayload::Chat(chat) => {
                assert_eq!(chat.text, "привет 👋");
                assert_eq!(chat.sender.as_deref(), Some("10.0.0.1:8888"));
                assert_eq!(chat.message_id, Some(7));
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_discovery_accepts_valid() {
        let raw = br#"{"type":"discovery","host":"10.0.0.9","port":8890,"timestamp":1.0}"#;
        assert_eq!(decode_discovery(raw, SRC), Some(PeerAddress::new("10.0.0.9", 8890)));
    }

    #[test]
    fn test_decode_discovery_string_port_and_missing_host() {
        let raw = br#"{"type":"discovery","port":"8890"}"#;
        assert_eq!(
            decode_discovery(raw, SRC),
            Some(PeerAddress::new("192.168.1.20", 8890))
        );
    }

    #[test]
    fn test_decode_discovery_rejects_malformed() {
        let cases: [&[u8]; 8] = [
            b"not json",
            br#"[1,2,3]"#,
            br#"{"type":"message","host":"a","port":1}"#,
            br#"{"type":"discovery","host":"a"}"#,
            br#"{"type":"discovery","host":"a","port":"eighty"}"#,
            br#"{"type":"discovery","host":"a","port":0}"#,
            br#"{"type":"discovery","host":"a","port":70000}"#,
            br#"{"type":"discovery","host":"a","port":12.5}"#,
        ];
        for raw in cases {
            assert_eq!(decode_discovery(raw, SRC), None, "{}", String::from_utf8_lossy(raw));
        }
    }

    #[test]
    fn test_decode_inbound_falls_back_to_plain_text() {
        assert_eq!(
            decode_inbound(b"hello there"),
            InboundPayload::PlainText("hello there".into())
        );
        // Truncated JSON
        assert_eq!(
            decode_inbound(br#"{"type":"message","text":"cut"#),
            InboundPayload::PlainText(r#"{"type":"message","text":"cut"#.into())
        );
        // Non-object JSON
        assert_eq!(decode_inbound(b"42"), InboundPayload::PlainText("42".into()));
        // Foreign type
        assert!(matches!(
            decode_inbound(br#"{"type":"discovery","port":1}"#),
            InboundPayload::PlainText(_)
        ));
    }

    #[test]
    fn test_decode_inbound_lenient_fields() {
        match decode_inbound(br#"{"text":"no sender"}"#) {
            InboundPayload::Chat(chat) => {
                assert_eq!(chat.text, "no sender");
                assert_eq!(chat.sender, None);
                assert_eq!(chat.timestamp, None);
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_peer_address_parse_and_display() {
        let a: PeerAddress = "10.0.0.1:8888".parse().unwrap();
        assert_eq!(a, PeerAddress::new("10.0.0.1", 8888));
        assert_eq!(a.to_string(), "10.0.0.1:8888");

        let v6: PeerAddress = "[fe80::1]:9000".parse().unwrap();
        assert_eq!(v6.host(), "fe80::1");
        assert_eq!(v6.port(), 9000);

        assert!("nohost".parse::<PeerAddress>().is_err());
        assert!(":8888".parse::<PeerAddress>().is_err());
        assert!("host:0".parse::<PeerAddress>().is_err());
        assert!("host:99999".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_equality_is_exact() {
        assert_ne!(PeerAddress::new("localhost", 1), PeerAddress::new("127.0.0.1", 1));
    }

    #[test]
    fn test_resolve_against_replaces_wildcard_only() {
        let wild = PeerAddress::new("0.0.0.0", 8888);
        assert!(wild.has_unspecified_host());
        assert_eq!(wild.resolve_against(SRC), PeerAddress::new("192.168.1.20", 8888));

        let named = PeerAddress::new("10.0.0.3", 8888);
        assert_eq!(named.clone().resolve_against(SRC), named);
    }
}
