#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use socketio_client::{
    emitter::Subscription,
    engine::{EngineEvent, EngineEventKind, EngineEvents, EngineFactory, EngineTransport, Frame},
    manager::{Manager, ManagerConfig},
    packet::PacketOptions,
    EngineError,
};

/// A scriptable engine transport: records every write, and lets the test
/// fire lifecycle events as if they came from the wire.
pub struct StubEngine {
    sid: String,
    events: EngineEvents,
    writes: Mutex<Vec<(Frame, PacketOptions)>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl StubEngine {
    pub fn new(sid: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.into(),
            events: EngineEvents::new(),
            writes: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Simulate the transport handshake completing.
    pub fn fire_open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.events.emit(&EngineEventKind::Open, &EngineEvent::Open);
    }

    pub fn fire_ping(&self) {
        self.events.emit(&EngineEventKind::Ping, &EngineEvent::Ping);
    }

    pub fn fire_frame(&self, frame: Frame) {
        self.events
            .emit(&EngineEventKind::Data, &EngineEvent::Data(frame));
    }

    /// Simulate an inbound text frame.
    pub fn fire_text(&self, data: impl Into<String>) {
        self.fire_frame(Frame::Text(data.into()));
    }

    /// Simulate the server (or the network) dropping the transport.
    pub fn fire_close(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        self.events.emit(
            &EngineEventKind::Close,
            &EngineEvent::Close(reason.to_string()),
        );
    }

    pub fn fire_error(&self, message: &str) {
        self.events.emit(
            &EngineEventKind::Error,
            &EngineEvent::Error(EngineError::Transport(message.to_string())),
        );
    }

    /// Every frame written so far, with its transport options.
    pub fn writes(&self) -> Vec<(Frame, PacketOptions)> {
        self.writes.lock().unwrap().clone()
    }

    /// Text frames written so far.
    pub fn text_writes(&self) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter_map(|(frame, _)| match frame {
                Frame::Text(data) => Some(data),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EngineTransport for StubEngine {
    fn on(
        &self,
        kind: EngineEventKind,
        handler: Box<dyn Fn(&EngineEvent) + Send + Sync>,
    ) -> Subscription {
        self.events.on(kind, move |event| handler(event))
    }

    fn write(&self, frame: Frame, options: &PacketOptions) {
        self.writes.lock().unwrap().push((frame, *options));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // A close event follows only if the transport had opened.
        if self.open.swap(false, Ordering::SeqCst) {
            self.events.emit(
                &EngineEventKind::Close,
                &EngineEvent::Close("transport close".to_string()),
            );
        }
    }

    fn id(&self) -> Option<String> {
        self.open
            .load(Ordering::SeqCst)
            .then(|| self.sid.clone())
    }
}

/// Hands a fresh [`StubEngine`] to the manager on every open attempt and
/// keeps them all around for inspection.
#[derive(Default)]
pub struct EngineHub {
    engines: Mutex<Vec<Arc<StubEngine>>>,
}

impl EngineHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn factory(self: &Arc<Self>) -> EngineFactory {
        let hub = self.clone();
        Arc::new(move |_uri, _config| {
            let mut engines = hub.engines.lock().unwrap();
            let engine = StubEngine::new(format!("engine-{}", engines.len()));
            engines.push(engine.clone());
            engine as Arc<dyn EngineTransport>
        })
    }

    /// The engine of the latest open attempt.
    pub fn current(&self) -> Arc<StubEngine> {
        self.engines
            .lock()
            .unwrap()
            .last()
            .expect("no engine was built yet")
            .clone()
    }

    /// How many open attempts the manager made.
    pub fn count(&self) -> usize {
        self.engines.lock().unwrap().len()
    }
}

pub fn manager_with(config: ManagerConfig) -> (Arc<Manager>, Arc<EngineHub>) {
    let hub = EngineHub::new();
    let io = Manager::new("http://localhost:3000", hub.factory(), config);
    (io, hub)
}

/// Reconnection and timeout off: lifecycle fully driven by the test.
pub fn manual_config() -> ManagerConfig {
    ManagerConfig {
        reconnection: false,
        timeout: None,
        ..Default::default()
    }
}

/// Deterministic, fast reconnection.
pub fn fast_reconnect_config() -> ManagerConfig {
    ManagerConfig {
        reconnection_delay: Duration::from_millis(10),
        reconnection_delay_max: Duration::from_millis(20),
        randomization_factor: 0.0,
        timeout: None,
        ..Default::default()
    }
}

/// The server-side CONNECT echo for a namespace.
pub fn server_connect(engine: &StubEngine, nsp: &str, sid: &str) {
    let frame = if nsp == "/" {
        format!("0{{\"sid\":\"{sid}\"}}")
    } else {
        format!("0{nsp},{{\"sid\":\"{sid}\"}}")
    };
    engine.fire_text(frame);
}

pub async fn timeout_rcv<T: std::fmt::Debug>(rx: &mut tokio::sync::mpsc::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("channel closed")
}

/// Assert that nothing arrives on the channel within `wait`.
pub async fn assert_silent<T: std::fmt::Debug>(
    rx: &mut tokio::sync::mpsc::Receiver<T>,
    wait: Duration,
) {
    let received = tokio::time::timeout(wait, rx.recv()).await;
    assert!(received.is_err(), "unexpected event: {received:?}");
}
