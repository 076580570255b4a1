//! Socket.io packet model. The [`Packet`] is the base unit of data exchanged
//! with the server over the engine transport.

use serde::{Deserialize, Serialize};

use crate::Value;

/// A protocol packet: a typed payload bound to a namespace, plus transport
/// hints and the CONNECT-only query carriage.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// The packet payload.
    pub inner: PacketData,
    /// The namespace the packet belongs to.
    pub ns: String,
    /// Transport hints forwarded to the engine with every frame.
    pub options: PacketOptions,
    /// Query string appended to the namespace at encode time.
    /// Only meaningful on an outbound CONNECT.
    pub query: Option<String>,
}

impl Packet {
    fn new(inner: PacketData, ns: impl Into<String>) -> Self {
        Self {
            inner,
            ns: ns.into(),
            options: PacketOptions::default(),
            query: None,
        }
    }

    /// Create a connect packet carrying the authentication payload.
    pub fn connect(ns: impl Into<String>, auth: Option<serde_json::Value>) -> Self {
        Self::new(PacketData::Connect(auth), ns)
    }

    /// Create a disconnect packet for the given namespace.
    pub fn disconnect(ns: impl Into<String>) -> Self {
        Self::new(PacketData::Disconnect, ns)
    }

    /// Create an event packet. `data` starts with the event name.
    pub fn event(ns: impl Into<String>, data: Vec<Value>) -> Self {
        Self::new(PacketData::Event(data, None), ns)
    }

    /// Create a binary event packet. `data` starts with the event name.
    pub fn bin_event(ns: impl Into<String>, data: Vec<Value>) -> Self {
        Self::new(PacketData::BinaryEvent(data, None), ns)
    }

    /// Create an ack packet answering the event with the given ack id.
    pub fn ack(ns: impl Into<String>, data: Vec<Value>, ack: i64) -> Self {
        Self::new(PacketData::EventAck(data, ack), ns)
    }

    /// Create a binary ack packet answering the event with the given ack id.
    pub fn bin_ack(ns: impl Into<String>, data: Vec<Value>, ack: i64) -> Self {
        Self::new(PacketData::BinaryAck(data, ack), ns)
    }

    /// Create an error packet for the given namespace.
    pub fn connect_error(ns: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(PacketData::ConnectError(data), ns)
    }
}

/// | Type          | ID  | Usage                                                          |
/// |---------------|-----|----------------------------------------------------------------|
/// | CONNECT       | 0   | Namespace handshake (auth out, `{sid}` echo in).               |
/// | DISCONNECT    | 1   | Leaving a namespace.                                           |
/// | EVENT         | 2   | Data to the other side.                                        |
/// | ACK           | 3   | Acknowledging an event.                                        |
/// | CONNECT_ERROR | 4   | Namespace-level error (e.g. a middleware rejection).           |
/// | BINARY_EVENT  | 5   | Data with adjacent binary payloads.                            |
/// | BINARY_ACK    | 6   | Acknowledgement with adjacent binary payloads.                 |
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    /// Connect packet with an optional payload: the auth value outbound, the
    /// server `{sid}` echo inbound.
    Connect(Option<serde_json::Value>),
    /// Disconnect packet, used to leave a namespace.
    Disconnect,
    /// Event packet with an optional ack id requesting a response.
    Event(Vec<Value>, Option<i64>),
    /// Ack packet answering an event.
    EventAck(Vec<Value>, i64),
    /// Error packet carrying the server's error descriptor.
    ConnectError(serde_json::Value),
    /// Binary event packet with an optional ack id.
    BinaryEvent(Vec<Value>, Option<i64>),
    /// Binary ack packet.
    BinaryAck(Vec<Value>, i64),
}

impl PacketData {
    /// The wire tag of the packet type.
    pub fn index(&self) -> usize {
        match self {
            PacketData::Connect(_) => 0,
            PacketData::Disconnect => 1,
            PacketData::Event(_, _) => 2,
            PacketData::EventAck(_, _) => 3,
            PacketData::ConnectError(_) => 4,
            PacketData::BinaryEvent(_, _) => 5,
            PacketData::BinaryAck(_, _) => 6,
        }
    }

    /// Set the ack id on the packet types that carry an optional one.
    pub fn set_ack_id(&mut self, ack_id: i64) {
        match self {
            PacketData::Event(_, ack) | PacketData::BinaryEvent(_, ack) => *ack = Some(ack_id),
            _ => {}
        }
    }

    /// Ack id carried by the packet, if any.
    pub fn ack_id(&self) -> Option<i64> {
        match self {
            PacketData::Event(_, ack) | PacketData::BinaryEvent(_, ack) => *ack,
            PacketData::EventAck(_, ack) | PacketData::BinaryAck(_, ack) => Some(*ack),
            _ => None,
        }
    }

    /// Check if the packet is a binary packet (binary event or binary ack).
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            PacketData::BinaryEvent(_, _) | PacketData::BinaryAck(_, _)
        )
    }
}

/// Transport hints attached to every outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOptions {
    /// Whether the engine may compress the frames of this packet.
    pub compress: bool,
}

impl Default for PacketOptions {
    fn default() -> Self {
        Self { compress: true }
    }
}

/// Connect echo sent by the server once a namespace handshake succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPacket {
    /// The server-assigned session id for the namespace.
    pub sid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn wire_indexes_are_stable() {
        assert_eq!(Packet::connect("/", None).inner.index(), 0);
        assert_eq!(Packet::disconnect("/").inner.index(), 1);
        assert_eq!(Packet::event("/", vec![]).inner.index(), 2);
        assert_eq!(Packet::ack("/", vec![], 1).inner.index(), 3);
        assert_eq!(
            Packet::connect_error("/", serde_json::json!({})).inner.index(),
            4
        );
        assert_eq!(Packet::bin_event("/", vec![]).inner.index(), 5);
        assert_eq!(Packet::bin_ack("/", vec![], 1).inner.index(), 6);
    }

    #[test]
    fn ack_id_only_on_events() {
        let mut packet = Packet::connect("/", None);
        packet.inner.set_ack_id(3);
        assert_eq!(packet.inner.ack_id(), None);

        let mut packet = Packet::event("/", vec![Value::from("ev")]);
        packet.inner.set_ack_id(3);
        assert_eq!(packet.inner.ack_id(), Some(3));
    }

    #[test]
    fn binary_classification() {
        assert!(!Packet::event("/", vec![]).inner.is_binary());
        assert!(Packet::bin_event("/", vec![Value::Binary(Bytes::new())])
            .inner
            .is_binary());
    }
}
