mod fixture;

use std::sync::Arc;

use fixture::{manager_with, manual_config, server_connect, timeout_rcv};
use serde_json::json;
use socketio_client::{Auth, SocketOptions, Value};
use tokio::sync::mpsc;

#[tokio::test]
async fn handshake_sends_connect_and_assigns_sid() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/", SocketOptions::default());
    let engine = hub.current();

    engine.fire_open();
    assert_eq!(engine.text_writes(), vec!["0".to_string()]);

    server_connect(&engine, "/", "aaa111");
    assert!(socket.connected());
    assert!(!socket.disconnected());
    // The namespace sid is server-assigned and distinct from the engine sid.
    assert_eq!(socket.id(), Some("aaa111".to_string()));
    assert_ne!(socket.id(), io.engine_id());
}

#[tokio::test]
async fn custom_namespace_handshake() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/admin", SocketOptions::default());
    let engine = hub.current();

    engine.fire_open();
    assert_eq!(engine.text_writes(), vec!["0/admin,".to_string()]);

    server_connect(&engine, "/admin", "bbb222");
    assert!(socket.connected());
    assert_eq!(socket.id(), Some("bbb222".to_string()));
}

#[tokio::test]
async fn sid_is_cleared_on_disconnect() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/", SocketOptions::default());
    let engine = hub.current();
    engine.fire_open();
    server_connect(&engine, "/", "aaa111");

    let (tx, mut rx) = mpsc::channel::<(Option<String>, String)>(1);
    let observed = socket.clone();
    let _sub = socket.on("disconnect", move |ev| {
        let reason = ev.args[0].as_json().unwrap().as_str().unwrap().to_string();
        tx.try_send((observed.id(), reason)).unwrap();
    });

    socket.disconnect();
    let (id, reason) = timeout_rcv(&mut rx).await;
    assert_eq!(id, None);
    assert_eq!(reason, "io client disconnect");
    assert!(socket.disconnected());
    // A disconnect frame went out before the teardown.
    assert!(engine.text_writes().contains(&"1".to_string()));
}

#[tokio::test]
async fn auth_value_is_sent_with_the_handshake() {
    let (io, hub) = manager_with(manual_config());
    let _socket = io.socket(
        "/",
        SocketOptions {
            auth: Auth::Value(json!({"token": "abc"})),
            ..Default::default()
        },
    );
    let engine = hub.current();
    engine.fire_open();
    assert_eq!(engine.text_writes(), vec!["0{\"token\":\"abc\"}".to_string()]);
}

#[tokio::test]
async fn auth_provider_delivers_the_payload() {
    let (io, hub) = manager_with(manual_config());
    let _socket = io.socket(
        "/",
        SocketOptions {
            auth: Auth::Provider(Arc::new(|deliver| deliver(json!({"e": "f"})))),
            ..Default::default()
        },
    );
    let engine = hub.current();
    engine.fire_open();

    let writes = engine.text_writes();
    assert_eq!(writes, vec!["0{\"e\":\"f\"}".to_string()]);
    // The auth payload travels in the handshake body, not as a query.
    assert!(!writes[0].contains('?'));
}

#[tokio::test]
async fn query_is_carried_by_connect_packets_only() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket(
        "/nsp",
        SocketOptions {
            query: Some("a=b&c=d".to_string()),
            ..Default::default()
        },
    );
    let engine = hub.current();
    engine.fire_open();
    assert_eq!(engine.text_writes(), vec!["0/nsp?a=b&c=d,".to_string()]);

    server_connect(&engine, "/nsp", "ccc333");
    socket.emit("hello", vec![]).unwrap();
    let writes = engine.text_writes();
    assert_eq!(writes[1], format!("2/nsp,{}", json!(["hello"])));
}

#[tokio::test]
async fn query_string_is_passed_verbatim() {
    let (io, hub) = manager_with(manual_config());
    let _socket = io.socket(
        "/",
        SocketOptions {
            query: Some("%26a=%26%3D%3Fa".to_string()),
            ..Default::default()
        },
    );
    let engine = hub.current();
    engine.fire_open();
    assert_eq!(engine.text_writes(), vec!["0/?%26a=%26%3D%3Fa,".to_string()]);
}

#[tokio::test]
async fn root_namespace_error_reaches_custom_namespace_sockets() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/no", SocketOptions::default());
    let engine = hub.current();
    engine.fire_open();

    let (tx, mut rx) = mpsc::channel::<Value>(1);
    let _sub = socket.on("error", move |ev| {
        tx.try_send(ev.args[0].clone()).unwrap();
    });

    // Middleware rejection on the root namespace.
    engine.fire_text("4{\"message\":\"Forbidden\"}");
    let payload = timeout_rcv(&mut rx).await;
    assert_eq!(payload, Value::Json(json!({"message": "Forbidden"})));
    // The error does not flip the connection state.
    assert!(socket.disconnected());
}

#[tokio::test]
async fn error_packets_for_other_namespaces_are_ignored() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/mine", SocketOptions::default());
    let engine = hub.current();
    engine.fire_open();

    let (tx, mut rx) = mpsc::channel::<Value>(1);
    let _sub = socket.on("error", move |ev| {
        tx.try_send(ev.args[0].clone()).unwrap();
    });

    engine.fire_text("4/other,{\"message\":\"not yours\"}");
    fixture::assert_silent(&mut rx, std::time::Duration::from_millis(50)).await;
}

#[tokio::test]
async fn sockets_are_unique_per_namespace() {
    let (io, _hub) = manager_with(manual_config());
    let first = io.socket("/chat", SocketOptions::default());
    let second = io.socket("/chat", SocketOptions::default());
    let other = io.socket("/news", SocketOptions::default());
    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
}

#[tokio::test]
async fn connecting_event_and_active_state() {
    // Defer the connect so the listener is in place first.
    let mut config = manual_config();
    config.auto_connect = false;
    let (io, hub) = manager_with(config);

    let socket = io.socket("/", SocketOptions::default());
    assert!(!socket.active());

    let (tx, mut rx) = mpsc::channel::<()>(1);
    let _sub = socket.on("connecting", move |_| {
        tx.try_send(()).unwrap();
    });
    socket.connect();
    timeout_rcv(&mut rx).await;
    assert!(socket.active());
    assert_eq!(hub.count(), 1);
}

#[tokio::test]
async fn ping_and_runtime_errors_surface_as_manager_events() {
    use socketio_client::{EngineError, ManagerEvent, ManagerEventKind};

    let (io, hub) = manager_with(manual_config());
    let _socket = io.socket("/", SocketOptions::default());
    let engine = hub.current();
    engine.fire_open();

    let (ping_tx, mut ping_rx) = mpsc::channel::<()>(1);
    let _ping_sub = io.on(ManagerEventKind::Ping, move |_| {
        ping_tx.try_send(()).unwrap();
    });
    let (err_tx, mut err_rx) = mpsc::channel::<EngineError>(1);
    let _err_sub = io.on(ManagerEventKind::Error, move |event| {
        if let ManagerEvent::Error(err) = event {
            err_tx.try_send(err.clone()).unwrap();
        }
    });

    engine.fire_ping();
    timeout_rcv(&mut ping_rx).await;

    // A transport error while open is not a connect error and does not
    // close anything by itself.
    engine.fire_error("brief glitch");
    let err = timeout_rcv(&mut err_rx).await;
    assert_eq!(err, EngineError::Transport("brief glitch".to_string()));
    assert_eq!(io.ready_state(), socketio_client::ReadyState::Open);
}

#[tokio::test]
async fn server_disconnect_detaches_the_socket() {
    let (io, hub) = manager_with(manual_config());
    let socket = io.socket("/", SocketOptions::default());
    let engine = hub.current();
    engine.fire_open();
    server_connect(&engine, "/", "aaa111");

    let (tx, mut rx) = mpsc::channel::<String>(1);
    let _sub = socket.on("disconnect", move |ev| {
        let reason = ev.args[0].as_json().unwrap().as_str().unwrap().to_string();
        tx.try_send(reason).unwrap();
    });

    engine.fire_text("1");
    let reason = timeout_rcv(&mut rx).await;
    assert_eq!(reason, "io server disconnect");
    assert!(socket.disconnected());
    assert!(!socket.active());
    // The manager closed the engine once its last socket detached.
    assert!(engine.was_closed());
}
