#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]

//! A multiplexed, reconnecting socket.io-style client core.
//!
//! The crate provides the two components that carry the protocol logic:
//! * The [`Manager`] owns one engine transport (an abstract duplex frame
//!   connection, see [`engine::EngineTransport`]), encodes and decodes the
//!   packet framing and drives the reconnection state machine with
//!   exponential backoff and jitter.
//! * The [`Socket`] is a virtual channel riding on a manager: one socket per
//!   namespace, with its own connect handshake, event emission,
//!   request/response acknowledgements and send/receive buffering across
//!   disconnects. Several sockets multiplex over a single transport.
//!
//! The engine transport itself (websocket, long-polling, ...) is not part of
//! this crate: anything implementing [`engine::EngineTransport`] can be
//! plugged in through an [`engine::EngineFactory`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use socketio_client::{
//!     engine::{EngineEvent, EngineEventKind, EngineFactory, EngineTransport, Frame},
//!     emitter::{Emitter, Subscription},
//!     manager::{Manager, ManagerConfig},
//!     packet::PacketOptions,
//!     socket::SocketOptions,
//!     Value,
//! };
//!
//! // A do-nothing transport, stands in for a real websocket engine.
//! #[derive(Default)]
//! struct NullEngine(Emitter<EngineEventKind, EngineEvent>);
//! impl EngineTransport for NullEngine {
//!     fn on(
//!         &self,
//!         kind: EngineEventKind,
//!         handler: Box<dyn Fn(&EngineEvent) + Send + Sync>,
//!     ) -> Subscription {
//!         self.0.on(kind, move |ev| handler(ev))
//!     }
//!     fn write(&self, _frame: Frame, _options: &PacketOptions) {}
//!     fn close(&self) {}
//!     fn id(&self) -> Option<String> {
//!         None
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let factory: EngineFactory =
//!         Arc::new(|_uri, _config| Arc::new(NullEngine::default()));
//!     let io = Manager::new("http://localhost:3000", factory, ManagerConfig::default());
//!     let socket = io.socket("/chat", SocketOptions::default());
//!     let _sub = socket.on("message", |ev| println!("got {:?}", ev.args));
//!     socket.emit("message", vec![Value::from("hello")]).unwrap();
//! }
//! ```
//!
//! Listener registrations return a [`Subscription`](emitter::Subscription):
//! a scoped handle that detaches the listener when released (or dropped).
//! Keep it alive for as long as the listener should stay attached.
//!
//! Timers (connect timeout, reconnect delays) are spawned tokio tasks, so
//! the manager must be used from within a tokio runtime.

pub mod backoff;
pub mod emitter;
pub mod engine;
mod errors;
pub mod manager;
pub mod packet;
pub mod parser;
pub mod socket;

use bytes::Bytes;

pub use errors::{EngineError, Error};
pub use manager::{Manager, ManagerConfig, ManagerEvent, ManagerEventKind, ReadyState};
pub use socket::{AckResponder, Auth, DisconnectReason, Event, Socket, SocketOptions};

/// A dynamic payload element carried by event packets.
///
/// Event argument lists are ordered sequences of values; a value is either a
/// JSON tree or a standalone binary payload. Binary payloads are only
/// representable at the top level of an argument list.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A JSON payload.
    Json(serde_json::Value),
    /// A binary payload, sent as an adjacent binary frame on the wire.
    Binary(Bytes),
}

impl Value {
    /// Borrow the JSON payload if this value holds one.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            Value::Binary(_) => None,
        }
    }

    /// Borrow the binary payload if this value holds one.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Json(_) => None,
            Value::Binary(b) => Some(b),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Json(serde_json::Value::String(value.to_owned()))
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Json(serde_json::Value::String(value))
    }
}
impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

/// Check whether an argument list contains a binary payload.
///
/// Used to auto-select the BINARY_EVENT / BINARY_ACK packet variants when the
/// caller did not force a framing with [`Socket::binary`].
pub fn has_binary(values: &[Value]) -> bool {
    values.iter().any(|v| matches!(v, Value::Binary(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binary_detection() {
        assert!(!has_binary(&[]));
        assert!(!has_binary(&[Value::from("a"), Value::Json(json!({"b": 1}))]));
        assert!(has_binary(&[
            Value::from("a"),
            Value::Binary(Bytes::from_static(&[1, 2])),
        ]));
    }

    #[test]
    fn value_accessors() {
        let v = Value::from("x");
        assert_eq!(v.as_json(), Some(&json!("x")));
        assert!(v.as_binary().is_none());

        let b = Value::Binary(Bytes::from_static(&[1]));
        assert!(b.as_json().is_none());
        assert_eq!(b.as_binary(), Some(&Bytes::from_static(&[1])));
    }
}
