//! A [`Socket`] is a virtual channel bound to one namespace, multiplexed with
//! its siblings over the manager's engine transport.

use std::{
    borrow::Cow,
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc, Mutex, Weak,
    },
};

use crate::{
    emitter::{Emitter, Subscription},
    errors::Error,
    manager::{Manager, ManagerEvent, ManagerEventKind, ReadyState},
    packet::{ConnectPacket, Packet, PacketData, PacketOptions},
    Value,
};

/// Event names that cannot be emitted to the server: they belong to the
/// local socket lifecycle. Inbound packets may still trigger them.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "disconnect",
    "disconnecting",
    "error",
    "newListener",
    "removeListener",
];

/// All the possible reasons for a [`Socket`] to be disconnected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed this namespace with a DISCONNECT packet.
    IoServerDisconnect,
    /// The user called [`Socket::disconnect`].
    IoClientDisconnect,
    /// The engine transport closed, with the transport-level reason.
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::IoServerDisconnect => f.write_str("io server disconnect"),
            DisconnectReason::IoClientDisconnect => f.write_str("io client disconnect"),
            DisconnectReason::Transport(reason) => f.write_str(reason),
        }
    }
}

/// The authentication payload sent with the namespace CONNECT handshake.
#[derive(Clone, Default)]
pub enum Auth {
    /// No payload.
    #[default]
    None,
    /// A literal payload.
    Value(serde_json::Value),
    /// A provider invoked with a one-shot callback delivering the payload;
    /// the CONNECT is sent when the callback runs.
    Provider(Arc<dyn Fn(Box<dyn FnOnce(serde_json::Value) + Send>) + Send + Sync>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("Auth::None"),
            Auth::Value(value) => f.debug_tuple("Auth::Value").field(value).finish(),
            Auth::Provider(_) => f.write_str("Auth::Provider"),
        }
    }
}

/// Per-socket options.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// Query string appended to the namespace on the CONNECT packet, the
    /// only channel for per-socket query parameters.
    pub query: Option<String>,
    /// The authentication payload or provider.
    pub auth: Auth,
}

/// One-shot emit modifiers, consumed and reset by every emit.
#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    compress: Option<bool>,
    binary: Option<bool>,
}

/// An event delivered to socket listeners.
#[derive(Debug, Clone)]
pub struct Event {
    /// The event name.
    pub name: Cow<'static, str>,
    /// The event arguments (without the name).
    pub args: Vec<Value>,
    /// The responder to call when the server requested an acknowledgement.
    pub ack: Option<AckResponder>,
}

impl Event {
    fn lifecycle(name: &'static str, args: Vec<Value>) -> Self {
        Self {
            name: Cow::Borrowed(name),
            args,
            ack: None,
        }
    }
}

type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Answers a server-initiated acknowledgement request. Repeated calls are
/// no-ops, protecting against double-firing.
#[derive(Clone)]
pub struct AckResponder {
    socket: Arc<Socket>,
    id: i64,
    sent: Arc<AtomicBool>,
}

impl AckResponder {
    fn new(socket: Arc<Socket>, id: i64) -> Self {
        Self {
            socket,
            id,
            sent: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send the acknowledgement with the given arguments.
    pub fn send(&self, args: Vec<Value>) {
        if self.sent.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = if crate::has_binary(&args) {
            PacketData::BinaryAck(args, self.id)
        } else {
            PacketData::EventAck(args, self.id)
        };
        self.socket.packet(Packet {
            inner,
            ns: self.socket.nsp.clone(),
            options: PacketOptions::default(),
            query: None,
        });
    }
}

impl fmt::Debug for AckResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckResponder")
            .field("id", &self.id)
            .field("sent", &self.sent.load(Ordering::SeqCst))
            .finish()
    }
}

/// A namespace socket.
///
/// Created through [`Manager::socket`], never removed from the manager:
/// the same socket is reused across reconnections. While disconnected,
/// outbound events are buffered and flushed in order on the next CONNECT.
pub struct Socket {
    self_ref: Weak<Socket>,
    io: Arc<Manager>,
    nsp: String,
    opts: SocketOptions,
    id: Mutex<Option<String>>,
    connected: AtomicBool,
    ids: AtomicI64,
    acks: Mutex<HashMap<i64, AckCallback>>,
    send_buffer: Mutex<VecDeque<Packet>>,
    receive_buffer: Mutex<VecDeque<Event>>,
    flags: Mutex<Flags>,
    subs: Mutex<Option<Vec<Arc<Subscription>>>>,
    events: Emitter<Cow<'static, str>, Event>,
}

impl Socket {
    pub(crate) fn new(io: Arc<Manager>, nsp: String, opts: SocketOptions) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            io,
            nsp,
            opts,
            id: Mutex::new(None),
            connected: AtomicBool::new(false),
            ids: AtomicI64::new(0),
            acks: Mutex::new(HashMap::new()),
            send_buffer: Mutex::new(VecDeque::new()),
            receive_buffer: Mutex::new(VecDeque::new()),
            flags: Mutex::new(Flags::default()),
            subs: Mutex::new(None),
            events: Emitter::new(),
        })
    }

    /// Get back the owning [`Arc`].
    ///
    /// # Panics
    /// A socket only exists behind the `Arc` built by [`Socket::new`], so
    /// upgrading its own weak reference cannot fail.
    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().unwrap()
    }

    /// Subscribe to an event. Lifecycle events (`connect`, `disconnect`,
    /// `connecting`, `error`) are delivered through the same registry as
    /// user events.
    pub fn on(
        &self,
        event: impl Into<Cow<'static, str>>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.on(event.into(), handler)
    }

    /// Attach to the manager (if detached) and make sure the engine is
    /// opening. No-op while connected.
    pub fn connect(&self) {
        if self.connected() {
            return;
        }
        self.sub_events();
        if !self.io.reconnecting() {
            self.io.open();
        }
        self.io.add_connecting(&self.nsp);
        if self.io.ready_state() == ReadyState::Open {
            self.on_open();
        }
        self.emit_local(Event::lifecycle("connecting", vec![]));
    }

    /// Alias of [`Socket::connect`].
    pub fn open(&self) {
        self.connect();
    }

    /// Subscribe to the manager lifecycle. Idempotent: a socket that is
    /// already attached keeps its existing subscriptions.
    fn sub_events(&self) {
        let mut subs = self.subs.lock().unwrap();
        if subs.is_some() {
            return;
        }
        let open_sub = {
            let this = self.self_ref.clone();
            self.io.on(ManagerEventKind::Open, move |_| {
                if let Some(this) = this.upgrade() {
                    this.on_open();
                }
            })
        };
        let packet_sub = {
            let this = self.self_ref.clone();
            self.io.on(ManagerEventKind::Packet, move |event| {
                if let (Some(this), ManagerEvent::Packet(packet)) = (this.upgrade(), event) {
                    this.on_packet(packet);
                }
            })
        };
        let close_sub = {
            let this = self.self_ref.clone();
            self.io.on(ManagerEventKind::Close, move |event| {
                if let (Some(this), ManagerEvent::Close(reason)) = (this.upgrade(), event) {
                    this.on_close(DisconnectReason::Transport(reason.clone()));
                }
            })
        };
        *subs = Some(vec![
            Arc::new(open_sub),
            Arc::new(packet_sub),
            Arc::new(close_sub),
        ]);
    }

    /// Emit an event to the server.
    ///
    /// While disconnected the packet is buffered and flushed on the next
    /// CONNECT. Fails when `event` is one of the [`RESERVED_EVENTS`].
    pub fn emit(&self, event: impl AsRef<str>, args: Vec<Value>) -> Result<(), Error> {
        self.emit_inner(event.as_ref(), args, None)
    }

    /// Emit an event and register `ack` for the server's acknowledgement.
    ///
    /// There is no ack timeout: the callback stays pending until the server
    /// answers or the socket disconnects.
    pub fn emit_with_ack(
        &self,
        event: impl AsRef<str>,
        args: Vec<Value>,
        ack: impl FnOnce(Vec<Value>) + Send + 'static,
    ) -> Result<(), Error> {
        self.emit_inner(event.as_ref(), args, Some(Box::new(ack)))
    }

    /// Emit a `message` event, mirroring the `send` convenience of the JS
    /// client.
    pub fn send(&self, args: Vec<Value>) -> Result<(), Error> {
        self.emit_inner("message", args, None)
    }

    fn emit_inner(
        &self,
        event: &str,
        args: Vec<Value>,
        ack: Option<AckCallback>,
    ) -> Result<(), Error> {
        // Flags are strictly one-shot: consumed on every emit, even one that
        // fails on a reserved name.
        let flags = std::mem::take(&mut *self.flags.lock().unwrap());
        if RESERVED_EVENTS.contains(&event) {
            return Err(Error::ReservedEventName(event.to_string()));
        }

        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(Value::from(event));
        data.extend(args);

        let id = ack.map(|ack| {
            let id = self.ids.fetch_add(1, Ordering::SeqCst);
            self.acks.lock().unwrap().insert(id, ack);
            id
        });
        let binary = flags.binary.unwrap_or_else(|| crate::has_binary(&data));
        let inner = if binary {
            PacketData::BinaryEvent(data, id)
        } else {
            PacketData::Event(data, id)
        };
        let packet = Packet {
            inner,
            ns: self.nsp.clone(),
            options: PacketOptions {
                compress: flags.compress.unwrap_or(true),
            },
            query: None,
        };

        if self.connected() {
            self.packet(packet);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(nsp = %self.nsp, "buffering packet until connected");
            self.send_buffer.lock().unwrap().push_back(packet);
        }
        Ok(())
    }

    /// Set the compress flag for the next emit only. Defaults to `true`.
    pub fn compress(&self, compress: bool) -> &Self {
        self.flags.lock().unwrap().compress = Some(compress);
        self
    }

    /// Force (or forbid) binary framing for the next emit only, bypassing
    /// payload auto-detection.
    pub fn binary(&self, binary: bool) -> &Self {
        self.flags.lock().unwrap().binary = Some(binary);
        self
    }

    /// Assign the namespace and hand the packet to the manager.
    fn packet(&self, mut packet: Packet) {
        packet.ns = self.nsp.clone();
        self.io.packet(packet);
    }

    /// The engine is open: send the CONNECT handshake with the auth payload.
    fn on_open(&self) {
        match &self.opts.auth {
            Auth::Provider(provider) => {
                let this = self.self_ref.clone();
                provider(Box::new(move |payload| {
                    if let Some(this) = this.upgrade() {
                        this.send_connect(Some(payload));
                    }
                }));
            }
            Auth::Value(payload) => self.send_connect(Some(payload.clone())),
            Auth::None => self.send_connect(None),
        }
    }

    fn send_connect(&self, payload: Option<serde_json::Value>) {
        let mut packet = Packet::connect(self.nsp.clone(), payload);
        packet.query = self.opts.query.clone();
        self.packet(packet);
    }

    fn on_packet(&self, packet: &Packet) {
        // Root namespace errors (e.g. middleware rejections) reach every
        // socket so the rejecting namespace can surface them.
        let root_error = matches!(packet.inner, PacketData::ConnectError(_)) && packet.ns == "/";
        if packet.ns != self.nsp && !root_error {
            return;
        }
        match &packet.inner {
            PacketData::Connect(payload) => self.on_connect(payload.as_ref()),
            PacketData::Event(args, id) | PacketData::BinaryEvent(args, id) => {
                self.on_event(args.clone(), *id);
            }
            PacketData::EventAck(args, id) | PacketData::BinaryAck(args, id) => {
                self.on_ack(args.clone(), *id);
            }
            PacketData::Disconnect => self.on_disconnect(),
            PacketData::ConnectError(payload) => {
                self.emit_local(Event::lifecycle("error", vec![Value::Json(payload.clone())]));
            }
        }
    }

    fn on_connect(&self, payload: Option<&serde_json::Value>) {
        let sid = payload
            .and_then(|payload| serde_json::from_value::<ConnectPacket>(payload.clone()).ok())
            .map(|connect| connect.sid);
        #[cfg(feature = "tracing")]
        tracing::debug!(nsp = %self.nsp, ?sid, "connected to namespace");
        *self.id.lock().unwrap() = sid;
        self.connected.store(true, Ordering::SeqCst);
        self.emit_local(Event::lifecycle("connect", vec![]));
        self.emit_buffered();
    }

    fn on_event(&self, mut args: Vec<Value>, id: Option<i64>) {
        if args.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!(nsp = %self.nsp, "dropping event packet with no event name");
            return;
        }
        let name = match args.remove(0) {
            Value::Json(serde_json::Value::String(name)) => name,
            _other => {
                #[cfg(feature = "tracing")]
                tracing::debug!(nsp = %self.nsp, "dropping event packet with a non-string name");
                return;
            }
        };
        let ack = id.map(|id| AckResponder::new(self.arc(), id));
        let event = Event {
            name: Cow::Owned(name),
            args,
            ack,
        };
        if self.connected() {
            self.emit_local(event);
        } else {
            self.receive_buffer.lock().unwrap().push_back(event);
        }
    }

    fn on_ack(&self, args: Vec<Value>, id: i64) {
        let ack = self.acks.lock().unwrap().remove(&id);
        match ack {
            Some(ack) => ack(args),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(nsp = %self.nsp, id, "bad ack, ignoring");
            }
        }
    }

    fn on_disconnect(&self) {
        self.destroy();
        self.on_close(DisconnectReason::IoServerDisconnect);
    }

    /// Deliver buffered inbound events, then flush buffered outbound
    /// packets, both in FIFO order.
    fn emit_buffered(&self) {
        loop {
            let event = self.receive_buffer.lock().unwrap().pop_front();
            match event {
                Some(event) => self.emit_local(event),
                None => break,
            }
        }
        loop {
            let packet = self.send_buffer.lock().unwrap().pop_front();
            match packet {
                Some(packet) => self.packet(packet),
                None => break,
            }
        }
    }

    /// Release the manager subscriptions and let the manager close the
    /// engine once no socket is left.
    fn destroy(&self) {
        let subs = self.subs.lock().unwrap().take();
        drop(subs);
        self.io.destroy_socket(self);
    }

    /// Disconnect from the namespace. If connected, tells the server first.
    pub fn disconnect(&self) {
        let connected = self.connected();
        if connected {
            #[cfg(feature = "tracing")]
            tracing::debug!(nsp = %self.nsp, "performing disconnect");
            self.packet(Packet::disconnect(self.nsp.clone()));
        }
        self.destroy();
        if connected {
            self.on_close(DisconnectReason::IoClientDisconnect);
        }
    }

    /// Alias of [`Socket::disconnect`].
    pub fn close(&self) {
        self.disconnect();
    }

    /// The manager closed (or this socket disconnected): drop the session.
    ///
    /// Manager subscriptions are deliberately left attached on a manager
    /// close, so the socket reattaches on the next open.
    pub(crate) fn on_close(&self, reason: DisconnectReason) {
        #[cfg(feature = "tracing")]
        tracing::debug!(nsp = %self.nsp, %reason, "socket closed");
        self.connected.store(false, Ordering::SeqCst);
        *self.id.lock().unwrap() = None;
        // Pending acks are per-session and do not survive the disconnect.
        self.acks.lock().unwrap().clear();
        self.emit_local(Event::lifecycle(
            "disconnect",
            vec![Value::from(reason.to_string())],
        ));
    }

    fn emit_local(&self, event: Event) {
        self.events.emit(&event.name.clone(), &event);
    }

    // ==== accessors ====

    /// The server-assigned session id, present only while connected.
    pub fn id(&self) -> Option<String> {
        self.id.lock().unwrap().clone()
    }

    /// Whether the namespace handshake completed.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The negation of [`Socket::connected`].
    pub fn disconnected(&self) -> bool {
        !self.connected()
    }

    /// Whether the socket is attached to its manager's lifecycle.
    pub fn active(&self) -> bool {
        self.subs.lock().unwrap().is_some()
    }

    /// The namespace path of this socket.
    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// The manager this socket multiplexes over.
    pub fn io(&self) -> &Arc<Manager> {
        &self.io
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("nsp", &self.nsp)
            .field("id", &self.id())
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}
