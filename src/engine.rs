//! The engine transport contract: the duplex, frame-oriented connection the
//! protocol is layered on.
//!
//! Implementations (websocket, long-polling with upgrade, in-memory stubs)
//! live outside this crate; the [`Manager`](crate::Manager) only depends on
//! this interface and builds one transport per open attempt through an
//! [`EngineFactory`].

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    emitter::{Emitter, Subscription},
    errors::EngineError,
    manager::ManagerConfig,
    packet::PacketOptions,
};

/// A single engine frame: an opaque string or binary payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Bytes),
}

/// Lifecycle events produced by an engine transport.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The transport finished its handshake and is writable.
    Open,
    /// A heartbeat probe from the server.
    Ping,
    /// An inbound frame.
    Data(Frame),
    /// The transport closed, with the transport-level reason.
    Close(String),
    /// The transport failed.
    Error(EngineError),
}

impl EngineEvent {
    /// The discriminant used as a subscription key.
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::Open => EngineEventKind::Open,
            EngineEvent::Ping => EngineEventKind::Ping,
            EngineEvent::Data(_) => EngineEventKind::Data,
            EngineEvent::Close(_) => EngineEventKind::Close,
            EngineEvent::Error(_) => EngineEventKind::Error,
        }
    }
}

/// Subscription keys for [`EngineEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    /// [`EngineEvent::Open`]
    Open,
    /// [`EngineEvent::Ping`]
    Ping,
    /// [`EngineEvent::Data`]
    Data,
    /// [`EngineEvent::Close`]
    Close,
    /// [`EngineEvent::Error`]
    Error,
}

/// Emitter type engine implementations typically embed to satisfy
/// [`EngineTransport::on`].
pub type EngineEvents = Emitter<EngineEventKind, EngineEvent>;

/// A duplex frame connection.
///
/// Writes are non-blocking and unbounded; delivery is best effort. Event
/// handlers are invoked on whatever context the implementation delivers
/// events from.
pub trait EngineTransport: Send + Sync {
    /// Subscribe to a lifecycle event.
    fn on(
        &self,
        kind: EngineEventKind,
        handler: Box<dyn Fn(&EngineEvent) + Send + Sync>,
    ) -> Subscription;

    /// Write one frame, with the packet's transport hints.
    fn write(&self, frame: Frame, options: &PacketOptions);

    /// Close the transport. A `Close` event follows if the transport was
    /// open.
    fn close(&self);

    /// The transport session id, present once the transport is open.
    fn id(&self) -> Option<String>;
}

/// Builds an engine transport for the given uri. Invoked by the manager on
/// every open attempt; transport-specific options live in the factory's
/// captures and in [`ManagerConfig::path`].
pub type EngineFactory =
    Arc<dyn Fn(&str, &ManagerConfig) -> Arc<dyn EngineTransport> + Send + Sync>;
