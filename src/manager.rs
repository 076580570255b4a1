//! The [`Manager`] owns one engine transport, runs the protocol codec over
//! it, drives the reconnection state machine and multiplexes the namespace
//! [`Socket`]s sharing the transport.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
    time::Duration,
};

use crate::{
    backoff::Backoff,
    emitter::{Emitter, Subscription},
    engine::{EngineEvent, EngineEventKind, EngineFactory, EngineTransport, Frame},
    errors::EngineError,
    packet::{Packet, PacketData},
    parser::{CommonParser, Parse, ParseError, ParserState},
    socket::{Socket, SocketOptions},
};

/// Configuration of a [`Manager`].
#[derive(Clone)]
pub struct ManagerConfig {
    /// Request path handed to the engine factory.
    ///
    /// Defaults to `/socket.io`.
    pub path: String,

    /// Whether to reconnect automatically after the engine closes.
    ///
    /// Defaults to `true`.
    pub reconnection: bool,

    /// Maximum number of reconnection attempts before giving up, `None` for
    /// unlimited.
    ///
    /// Defaults to `None`.
    pub reconnection_attempts: Option<u32>,

    /// Initial reconnection delay.
    ///
    /// Defaults to 1 second.
    pub reconnection_delay: Duration,

    /// Upper bound on the reconnection delay.
    ///
    /// Defaults to 5 seconds.
    pub reconnection_delay_max: Duration,

    /// Backoff jitter in `[0, 1]`.
    ///
    /// Defaults to 0.5.
    pub randomization_factor: f64,

    /// Connect-attempt timeout, `None` to disable.
    ///
    /// With a zero timeout the pending open subscription is released
    /// synchronously before the timer is armed, so even an engine that opens
    /// synchronously has its open dropped and the attempt times out.
    ///
    /// Defaults to 20 seconds.
    pub timeout: Option<Duration>,

    /// Whether creating a socket opens the engine right away.
    ///
    /// Defaults to `true`.
    pub auto_connect: bool,

    /// The packet parser. Must match the parser used by the server.
    ///
    /// Defaults to [`CommonParser`].
    pub parser: Arc<dyn Parse>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            path: "/socket.io".to_string(),
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: Duration::from_millis(1000),
            reconnection_delay_max: Duration::from_millis(5000),
            randomization_factor: 0.5,
            timeout: Some(Duration::from_millis(20000)),
            auto_connect: true,
            parser: Arc::new(CommonParser),
        }
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("path", &self.path)
            .field("reconnection", &self.reconnection)
            .field("reconnection_attempts", &self.reconnection_attempts)
            .field("reconnection_delay", &self.reconnection_delay)
            .field("reconnection_delay_max", &self.reconnection_delay_max)
            .field("randomization_factor", &self.randomization_factor)
            .field("timeout", &self.timeout)
            .field("auto_connect", &self.auto_connect)
            .finish_non_exhaustive()
    }
}

/// Connection state of a [`Manager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// No engine, or the engine has closed.
    Closed,
    /// An open attempt is in flight.
    Opening,
    /// The engine is open and packets flow.
    Open,
}

/// Events emitted by a [`Manager`].
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The engine opened.
    Open,
    /// The engine closed, with the transport reason.
    Close(String),
    /// A transport error occurred while the engine was open.
    Error(EngineError),
    /// A heartbeat probe from the server.
    Ping,
    /// A packet was decoded; sockets dispatch on this.
    Packet(Packet),
    /// An open attempt failed.
    ConnectError(EngineError),
    /// A reconnect attempt is starting (1-based attempt number).
    ReconnectAttempt(u32),
    /// Alias event of [`ManagerEvent::ReconnectAttempt`].
    Reconnecting(u32),
    /// Reconnection succeeded after the given number of attempts.
    Reconnect(u32),
    /// A reconnect attempt failed; another may be scheduled.
    ReconnectError(EngineError),
    /// The attempt cap was reached; reconnection stops until a manual open.
    ReconnectFailed,
}

impl ManagerEvent {
    /// The discriminant used as a subscription key.
    pub fn kind(&self) -> ManagerEventKind {
        match self {
            ManagerEvent::Open => ManagerEventKind::Open,
            ManagerEvent::Close(_) => ManagerEventKind::Close,
            ManagerEvent::Error(_) => ManagerEventKind::Error,
            ManagerEvent::Ping => ManagerEventKind::Ping,
            ManagerEvent::Packet(_) => ManagerEventKind::Packet,
            ManagerEvent::ConnectError(_) => ManagerEventKind::ConnectError,
            ManagerEvent::ReconnectAttempt(_) => ManagerEventKind::ReconnectAttempt,
            ManagerEvent::Reconnecting(_) => ManagerEventKind::Reconnecting,
            ManagerEvent::Reconnect(_) => ManagerEventKind::Reconnect,
            ManagerEvent::ReconnectError(_) => ManagerEventKind::ReconnectError,
            ManagerEvent::ReconnectFailed => ManagerEventKind::ReconnectFailed,
        }
    }
}

/// Subscription keys for [`ManagerEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ManagerEventKind {
    Open,
    Close,
    Error,
    Ping,
    Packet,
    ConnectError,
    ReconnectAttempt,
    Reconnecting,
    Reconnect,
    ReconnectError,
    ReconnectFailed,
}

type OpenCallback = Box<dyn FnOnce(Option<EngineError>) + Send>;
type SharedOpenCallback = Arc<Mutex<Option<OpenCallback>>>;

/// The connection manager: owns the engine transport, encodes and decodes
/// packets, reconnects with backoff and multiplexes namespace sockets.
///
/// Sockets are obtained with [`Manager::socket`]; one socket per namespace,
/// reused across reconnections for the manager's whole lifetime.
pub struct Manager {
    self_ref: Weak<Manager>,
    uri: String,
    factory: EngineFactory,
    config: RwLock<ManagerConfig>,
    engine: Mutex<Option<Arc<dyn EngineTransport>>>,
    ready_state: Mutex<ReadyState>,
    reconnecting: AtomicBool,
    skip_reconnect: AtomicBool,
    nsps: RwLock<HashMap<String, Arc<Socket>>>,
    connecting: Mutex<HashSet<String>>,
    subs: Mutex<Vec<Arc<Subscription>>>,
    backoff: Mutex<Backoff>,
    parser_state: ParserState,
    events: Emitter<ManagerEventKind, ManagerEvent>,
}

impl Manager {
    /// Create a manager for `uri`, building engines through `engine`.
    ///
    /// Unless [`ManagerConfig::auto_connect`] is disabled this opens the
    /// engine right away, so it must run within a tokio runtime.
    pub fn new(uri: impl Into<String>, engine: EngineFactory, config: ManagerConfig) -> Arc<Self> {
        let backoff = Backoff::new(
            config.reconnection_delay,
            config.reconnection_delay_max,
            config.randomization_factor,
        );
        let auto_connect = config.auto_connect;
        let manager = Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            uri: uri.into(),
            factory: engine,
            config: RwLock::new(config),
            engine: Mutex::new(None),
            ready_state: Mutex::new(ReadyState::Closed),
            reconnecting: AtomicBool::new(false),
            skip_reconnect: AtomicBool::new(false),
            nsps: RwLock::new(HashMap::new()),
            connecting: Mutex::new(HashSet::new()),
            subs: Mutex::new(Vec::new()),
            backoff: Mutex::new(backoff),
            parser_state: ParserState::default(),
            events: Emitter::new(),
        });
        if auto_connect {
            manager.open();
        }
        manager
    }

    /// Get back the owning [`Arc`].
    ///
    /// # Panics
    /// A manager only exists behind the `Arc` built by [`Manager::new`], so
    /// upgrading its own weak reference cannot fail.
    fn arc(&self) -> Arc<Self> {
        self.self_ref.upgrade().unwrap()
    }

    /// Subscribe to a manager event.
    pub fn on(
        &self,
        kind: ManagerEventKind,
        handler: impl Fn(&ManagerEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.on(kind, handler)
    }

    /// Open the engine if it is closed. No-op while opening or open.
    pub fn open(&self) {
        self.open_inner(None);
    }

    /// Alias of [`Manager::open`].
    pub fn connect(&self) {
        self.open_inner(None);
    }

    /// Open the engine and deliver the attempt outcome to `callback`.
    ///
    /// On failure the error goes to the callback *instead of* triggering an
    /// automatic reconnection.
    pub fn open_with(&self, callback: impl FnOnce(Option<EngineError>) + Send + 'static) {
        self.open_inner(Some(Box::new(callback)));
    }

    fn open_inner(&self, callback: Option<OpenCallback>) {
        {
            let mut ready_state = self.ready_state.lock().unwrap();
            if matches!(*ready_state, ReadyState::Opening | ReadyState::Open) {
                return;
            }
            *ready_state = ReadyState::Opening;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(uri = %self.uri, "opening engine");
        self.skip_reconnect.store(false, Ordering::SeqCst);

        let engine = {
            let config = self.config.read().unwrap();
            (self.factory)(&self.uri, &config)
        };
        *self.engine.lock().unwrap() = Some(engine.clone());

        let callback: SharedOpenCallback = Arc::new(Mutex::new(callback));

        let open_sub = Arc::new({
            let this = self.self_ref.clone();
            let callback = callback.clone();
            engine.on(
                EngineEventKind::Open,
                Box::new(move |_| {
                    if let Some(this) = this.upgrade() {
                        this.on_open();
                        let callback = callback.lock().unwrap().take();
                        if let Some(callback) = callback {
                            callback(None);
                        }
                    }
                }),
            )
        });
        let error_sub = Arc::new({
            let this = self.self_ref.clone();
            let callback = callback.clone();
            engine.on(
                EngineEventKind::Error,
                Box::new(move |event| {
                    if let (Some(this), EngineEvent::Error(err)) = (this.upgrade(), event) {
                        this.on_open_error(err.clone(), &callback);
                    }
                }),
            )
        });

        let timeout = self.config.read().unwrap().timeout;
        let timer_sub = timeout.map(|timeout| {
            if timeout.is_zero() {
                // Pre-release so a synchronous open cannot beat the timer.
                open_sub.release();
            }
            let this = self.self_ref.clone();
            let engine = Arc::downgrade(&engine);
            let open_sub = open_sub.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                #[cfg(feature = "tracing")]
                tracing::debug!("connect attempt timed out after {timeout:?}");
                open_sub.release();
                if let Some(engine) = engine.upgrade() {
                    engine.close();
                }
                if let Some(this) = this.upgrade() {
                    this.on_open_error(EngineError::Timeout, &callback);
                }
            });
            Arc::new(Subscription::new(move || handle.abort()))
        });

        let mut subs = self.subs.lock().unwrap();
        subs.push(open_sub);
        subs.push(error_sub);
        subs.extend(timer_sub);
    }

    /// Failure path of an open attempt, shared by the engine error
    /// subscription and the connect-timeout timer.
    fn on_open_error(&self, err: EngineError, callback: &SharedOpenCallback) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?err, "connect attempt failed");
        self.cleanup();
        *self.ready_state.lock().unwrap() = ReadyState::Closed;
        self.emit(ManagerEvent::ConnectError(err.clone()));
        let callback = callback.lock().unwrap().take();
        if let Some(callback) = callback {
            callback(Some(err));
        } else {
            self.maybe_reconnect_on_open();
        }
    }

    fn on_open(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("engine open");
        self.cleanup();
        *self.ready_state.lock().unwrap() = ReadyState::Open;
        self.emit(ManagerEvent::Open);

        let engine = self.engine.lock().unwrap().clone();
        let Some(engine) = engine else { return };

        let data_sub = {
            let this = self.self_ref.clone();
            engine.on(
                EngineEventKind::Data,
                Box::new(move |event| {
                    if let (Some(this), EngineEvent::Data(frame)) = (this.upgrade(), event) {
                        this.on_data(frame.clone());
                    }
                }),
            )
        };
        let ping_sub = {
            let this = self.self_ref.clone();
            engine.on(
                EngineEventKind::Ping,
                Box::new(move |_| {
                    if let Some(this) = this.upgrade() {
                        this.emit(ManagerEvent::Ping);
                    }
                }),
            )
        };
        let error_sub = {
            let this = self.self_ref.clone();
            engine.on(
                EngineEventKind::Error,
                Box::new(move |event| {
                    if let (Some(this), EngineEvent::Error(err)) = (this.upgrade(), event) {
                        this.emit(ManagerEvent::Error(err.clone()));
                    }
                }),
            )
        };
        let close_sub = {
            let this = self.self_ref.clone();
            engine.on(
                EngineEventKind::Close,
                Box::new(move |event| {
                    if let (Some(this), EngineEvent::Close(reason)) = (this.upgrade(), event) {
                        this.on_close(reason.clone());
                    }
                }),
            )
        };

        self.subs
            .lock()
            .unwrap()
            .extend([data_sub, ping_sub, error_sub, close_sub].map(Arc::new));
    }

    fn on_data(&self, frame: Frame) {
        let parser = self.config.read().unwrap().parser.clone();
        match parser.decode(&self.parser_state, frame) {
            Ok(packet) => self.emit(ManagerEvent::Packet(packet)),
            Err(ParseError::NeedsMoreBinaryData) => {}
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("dropping undecodable frame: {_err}");
            }
        }
    }

    fn on_close(&self, reason: String) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%reason, "engine closed");
        self.cleanup();
        self.backoff.lock().unwrap().reset();
        *self.ready_state.lock().unwrap() = ReadyState::Closed;
        self.emit(ManagerEvent::Close(reason));
        if self.config.read().unwrap().reconnection && !self.skip_reconnect.load(Ordering::SeqCst)
        {
            self.reconnect();
        }
    }

    fn reconnect(&self) {
        if self.reconnecting.load(Ordering::SeqCst) || self.skip_reconnect.load(Ordering::SeqCst) {
            return;
        }

        let attempts = self.backoff.lock().unwrap().attempts();
        let cap = self.config.read().unwrap().reconnection_attempts;
        if cap.is_some_and(|cap| attempts >= cap) {
            #[cfg(feature = "tracing")]
            tracing::debug!("reconnect attempts exhausted");
            self.backoff.lock().unwrap().reset();
            self.emit(ManagerEvent::ReconnectFailed);
            self.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        let delay = self.backoff.lock().unwrap().duration();
        #[cfg(feature = "tracing")]
        tracing::debug!("will wait {delay:?} before reconnect attempt");
        self.reconnecting.store(true, Ordering::SeqCst);

        let this = self.self_ref.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = this.upgrade() else { return };
            if this.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }
            let attempt = this.backoff.lock().unwrap().attempts();
            #[cfg(feature = "tracing")]
            tracing::debug!("attempting reconnect #{attempt}");
            this.emit(ManagerEvent::ReconnectAttempt(attempt));
            this.emit(ManagerEvent::Reconnecting(attempt));
            // A handler may have disconnected the manager meanwhile.
            if this.skip_reconnect.load(Ordering::SeqCst) {
                return;
            }

            let weak = Arc::downgrade(&this);
            this.open_inner(Some(Box::new(move |err| {
                let Some(this) = weak.upgrade() else { return };
                match err {
                    Some(err) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("reconnect attempt error");
                        this.reconnecting.store(false, Ordering::SeqCst);
                        this.reconnect();
                        this.emit(ManagerEvent::ReconnectError(err));
                    }
                    None => this.on_reconnect(),
                }
            })));
        });
        self.subs
            .lock()
            .unwrap()
            .push(Arc::new(Subscription::new(move || handle.abort())));
    }

    fn on_reconnect(&self) {
        let attempt = self.backoff.lock().unwrap().attempts();
        #[cfg(feature = "tracing")]
        tracing::debug!("reconnect success after {attempt} attempts");
        self.reconnecting.store(false, Ordering::SeqCst);
        self.backoff.lock().unwrap().reset();
        self.emit(ManagerEvent::Reconnect(attempt));
    }

    fn maybe_reconnect_on_open(&self) {
        // Only once upon the first failed open, and only if reconnection is
        // enabled; the loop takes over from there.
        if !self.reconnecting.load(Ordering::SeqCst)
            && self.config.read().unwrap().reconnection
            && self.backoff.lock().unwrap().attempts() == 0
        {
            self.reconnect();
        }
    }

    /// The socket for the given namespace, created and registered on first
    /// access and reused afterwards.
    pub fn socket(&self, nsp: impl Into<String>, opts: SocketOptions) -> Arc<Socket> {
        let nsp = nsp.into();
        let (socket, created) = {
            let mut nsps = self.nsps.write().unwrap();
            match nsps.get(&nsp) {
                Some(socket) => (socket.clone(), false),
                None => {
                    let socket = Socket::new(self.arc(), nsp.clone(), opts);
                    nsps.insert(nsp, socket.clone());
                    (socket, true)
                }
            }
        };
        if created && self.config.read().unwrap().auto_connect {
            socket.connect();
        }
        socket
    }

    /// Encode and write a packet to the engine. Called by sockets.
    pub(crate) fn packet(&self, mut packet: Packet) {
        // The query is carried once, appended to the nsp at connect time.
        if matches!(packet.inner, PacketData::Connect(_)) {
            if let Some(query) = packet.query.take() {
                packet.ns = format!("{}?{}", packet.ns, query);
            }
        }
        let engine = self.engine.lock().unwrap().clone();
        let Some(engine) = engine else {
            #[cfg(feature = "tracing")]
            tracing::debug!("dropping packet written without an engine");
            return;
        };
        let options = packet.options;
        let parser = self.config.read().unwrap().parser.clone();
        for frame in parser.encode(packet) {
            engine.write(frame, &options);
        }
    }

    /// Socket bookkeeping: `nsp` considers itself live on this manager.
    pub(crate) fn add_connecting(&self, nsp: &str) {
        self.connecting.lock().unwrap().insert(nsp.to_string());
    }

    /// A socket detached. Closes the engine once no socket is left.
    pub(crate) fn destroy_socket(&self, socket: &Socket) {
        let empty = {
            let mut connecting = self.connecting.lock().unwrap();
            connecting.remove(socket.nsp());
            connecting.is_empty()
        };
        if empty {
            #[cfg(feature = "tracing")]
            tracing::debug!("no open sockets left, closing the engine");
            self.close_inner();
        }
    }

    /// Tear the connection down and disable reconnection.
    pub fn close(&self) {
        self.close_inner();
    }

    /// Alias of [`Manager::close`].
    pub fn disconnect(&self) {
        self.close_inner();
    }

    fn close_inner(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!("manager closing");
        self.skip_reconnect.store(true, Ordering::SeqCst);
        self.reconnecting.store(false, Ordering::SeqCst);
        if *self.ready_state.lock().unwrap() == ReadyState::Opening {
            // No engine close event will follow an aborted open.
            self.cleanup();
        }
        self.backoff.lock().unwrap().reset();
        *self.ready_state.lock().unwrap() = ReadyState::Closed;
        let engine = self.engine.lock().unwrap().clone();
        if let Some(engine) = engine {
            engine.close();
        }
    }

    /// Release every subscription and timer, and drop any partial decoder
    /// state.
    fn cleanup(&self) {
        let subs: Vec<_> = self.subs.lock().unwrap().drain(..).collect();
        for sub in subs {
            sub.release();
        }
        self.parser_state.reset();
    }

    fn emit(&self, event: ManagerEvent) {
        self.events.emit(&event.kind(), &event);
    }

    // ==== accessors ====

    /// Current connection state.
    pub fn ready_state(&self) -> ReadyState {
        *self.ready_state.lock().unwrap()
    }

    /// Whether the reconnect loop currently owns the connection lifecycle.
    pub fn reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Session id of the underlying engine, once open.
    pub fn engine_id(&self) -> Option<String> {
        self.engine.lock().unwrap().as_ref().and_then(|e| e.id())
    }

    /// The uri this manager connects to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether automatic reconnection is enabled.
    pub fn reconnection(&self) -> bool {
        self.config.read().unwrap().reconnection
    }

    /// Enable or disable automatic reconnection.
    pub fn set_reconnection(&self, reconnection: bool) {
        self.config.write().unwrap().reconnection = reconnection;
    }

    /// The reconnection attempt cap, `None` for unlimited.
    pub fn reconnection_attempts(&self) -> Option<u32> {
        self.config.read().unwrap().reconnection_attempts
    }

    /// Update the reconnection attempt cap.
    pub fn set_reconnection_attempts(&self, attempts: Option<u32>) {
        self.config.write().unwrap().reconnection_attempts = attempts;
    }

    /// The initial reconnection delay.
    pub fn reconnection_delay(&self) -> Duration {
        self.config.read().unwrap().reconnection_delay
    }

    /// Update the initial reconnection delay, applied to the live backoff.
    pub fn set_reconnection_delay(&self, delay: Duration) {
        self.config.write().unwrap().reconnection_delay = delay;
        self.backoff.lock().unwrap().set_min(delay);
    }

    /// The reconnection delay upper bound.
    pub fn reconnection_delay_max(&self) -> Duration {
        self.config.read().unwrap().reconnection_delay_max
    }

    /// Update the delay upper bound, applied to the live backoff.
    pub fn set_reconnection_delay_max(&self, delay: Duration) {
        self.config.write().unwrap().reconnection_delay_max = delay;
        self.backoff.lock().unwrap().set_max(delay);
    }

    /// The backoff jitter in `[0, 1]`.
    pub fn randomization_factor(&self) -> f64 {
        self.config.read().unwrap().randomization_factor
    }

    /// Update the backoff jitter, applied to the live backoff.
    pub fn set_randomization_factor(&self, factor: f64) {
        self.config.write().unwrap().randomization_factor = factor;
        self.backoff.lock().unwrap().set_jitter(factor);
    }

    /// The connect-attempt timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        self.config.read().unwrap().timeout
    }

    /// Update the connect-attempt timeout.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.config.write().unwrap().timeout = timeout;
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("uri", &self.uri)
            .field("ready_state", &self.ready_state())
            .field("reconnecting", &self.reconnecting())
            .field("nsps", &self.nsps.read().unwrap().keys())
            .finish_non_exhaustive()
    }
}
