//! Integration tests for peers talking over in-memory sockets.
//!
//! Every test wires two peers (or a peer and a raw socket) together with
//! `memory_pipe`/`memory_listener`, so nothing touches the network.

use std::sync::Arc;
use std::time::Duration;

use envoy_protocol::{Codec, Envelope, EnvelopeSerdes, JsonCodec, RawSerdes};
use envoy_rpc::{
    ConfigError, InterfaceDef, NoService, PeerConfig, RpcError, ServiceBuilder, ServiceShape,
};
use envoy_transport::{
    memory_listener, memory_pipe, Listener, MemoryPipe, PipeSocket, SimConfig, SimSocket,
    Socket, SocketConfig, SocketState,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Add {
    x: i64,
    y: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sum(i64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Echo(String);

struct Calculator;

impl ServiceShape for Calculator {
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
        service.rpc::<Add, Sum>()
    }
}

struct CalculatorWithPing;

impl ServiceShape for CalculatorWithPing {
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
        service.rpc::<Add, Sum>().message::<Ping>()
    }
}

struct EchoService;

impl ServiceShape for EchoService {
    fn declare<C: Codec + Clone>(service: ServiceBuilder<C>) -> ServiceBuilder<C> {
        service.rpc::<Echo, Echo>()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type EnvSocket = PipeSocket<MemoryPipe, EnvelopeSerdes<JsonCodec>>;

fn serdes() -> EnvelopeSerdes<JsonCodec> {
    EnvelopeSerdes::new(JsonCodec)
}

/// Two non-redialing sockets joined by a memory pipe.
fn socket_pair() -> (EnvSocket, EnvSocket) {
    let (a, b) = memory_pipe();
    (
        PipeSocket::accepted(a, serdes(), SocketConfig::default()),
        PipeSocket::accepted(b, serdes(), SocketConfig::default()),
    )
}

fn fast_timeout(ms: u64) -> PeerConfig {
    PeerConfig::with_call_timeout(Duration::from_millis(ms))
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Calls and messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_call_dialer_serves_add_listener_receives_sum() {
    // The dialing side serves the calculator; the listening side calls it.
    let iface = InterfaceDef::of::<NoService, Calculator>(JsonCodec).unwrap();

    let (mut listener, dialer) = memory_listener();
    let dialed = PipeSocket::dial(dialer, serdes(), SocketConfig::default())
        .await
        .unwrap();
    let accepted = PipeSocket::accepted(
        listener.accept().await.unwrap(),
        serdes(),
        SocketConfig::default(),
    );

    let a = iface
        .client()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(dialed)
        .unwrap();
    let b = iface.server().connect(accepted).unwrap();

    let add = b.rpc::<Add, Sum>().unwrap();
    assert_eq!(add.call(Add { x: 2, y: 3 }).await.unwrap(), Sum(5));
    assert_eq!(a.invocations::<Add>(), 1);
    assert_eq!(b.pending_calls(), 0);
}

#[tokio::test]
async fn test_message_delivered_to_handler() {
    let iface = InterfaceDef::of::<CalculatorWithPing, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .on_message(move |_: Ping| {
            let _ = tx.send(());
        })
        .connect(server_sock)
        .unwrap();
    let client = iface.client().connect(client_sock).unwrap();

    client.message::<Ping>().unwrap().send(Ping).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("handler should run")
        .unwrap();
}

#[tokio::test]
async fn test_message_unknown_to_receiver_is_dropped_and_connection_survives() {
    // The sender believes the receiver accepts Ping; the receiver's
    // contract has no such type.
    let sender_iface = InterfaceDef::of::<CalculatorWithPing, NoService>(JsonCodec).unwrap();
    let receiver_iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let server = receiver_iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(server_sock)
        .unwrap();
    let client = sender_iface.client().connect(client_sock).unwrap();

    client.message::<Ping>().unwrap().send(Ping).await.unwrap();

    let add = client.rpc::<Add, Sum>().unwrap();
    assert_eq!(add.call(Add { x: 2, y: 3 }).await.unwrap(), Sum(5));
    assert_eq!(server.invocations::<Add>(), 1);
    assert!(!server.is_closed());
}

#[tokio::test]
async fn test_both_peers_call_each_other() {
    let iface = InterfaceDef::of::<Calculator, EchoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(server_sock)
        .unwrap();
    let client = iface
        .client()
        .on_rpc(|echo: Echo| Echo(echo.0.to_uppercase()))
        .connect(client_sock)
        .unwrap();

    let add = client.rpc::<Add, Sum>().unwrap();
    let echo = server.rpc::<Echo, Echo>().unwrap();

    assert_eq!(add.call(Add { x: 40, y: 2 }).await.unwrap(), Sum(42));
    assert_eq!(
        echo.call(Echo("hi".into())).await.unwrap(),
        Echo("HI".into())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_each_get_own_response() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let _server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(server_sock)
        .unwrap();
    let client = iface.client().connect(client_sock).unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    let mut tasks = Vec::new();
    for i in 0..50i64 {
        let add = add.clone();
        tasks.push(tokio::spawn(async move {
            let sum = add.call(Add { x: i, y: i * 1000 }).await.unwrap();
            (i, sum)
        }));
    }

    for task in tasks {
        let (i, sum) = task.await.unwrap();
        assert_eq!(sum, Sum(i + i * 1000));
    }
    assert_eq!(client.pending_calls(), 0);
}

// ---------------------------------------------------------------------------
// Timeouts, closing, disconnects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_call_without_response_times_out_and_cleans_up() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (a, b) = memory_pipe();
    let client_sock = PipeSocket::accepted(a, serdes(), SocketConfig::default());
    // The other end reads nothing and answers nothing.
    let _silent = PipeSocket::accepted(b, RawSerdes, SocketConfig::default());

    let client = iface
        .client()
        .config(fast_timeout(200))
        .connect(client_sock)
        .unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    let start = tokio::time::Instant::now();
    let err = add.call(Add { x: 1, y: 1 }).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, RpcError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(1));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_with_timeout_overrides_peer_default() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (a, b) = memory_pipe();
    let client_sock = PipeSocket::accepted(a, serdes(), SocketConfig::default());
    let _silent = PipeSocket::accepted(b, RawSerdes, SocketConfig::default());

    let client = iface.client().connect(client_sock).unwrap();
    let add = client
        .rpc::<Add, Sum>()
        .unwrap()
        .with_timeout(Duration::from_millis(50));
    assert_eq!(add.timeout(), Duration::from_millis(50));

    let start = tokio::time::Instant::now();
    assert!(matches!(
        add.call(Add { x: 1, y: 1 }).await,
        Err(RpcError::Timeout { .. })
    ));
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_response_is_dropped_and_later_calls_succeed() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let _server = iface
        .server()
        .on_rpc(|add: Add| {
            if add.x < 0 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Sum(add.x + add.y)
        })
        .connect(server_sock)
        .unwrap();
    let client = iface
        .client()
        .config(fast_timeout(100))
        .connect(client_sock)
        .unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    let err = add.call(Add { x: -1, y: 0 }).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout { .. }));
    assert_eq!(client.pending_calls(), 0);

    // Let the slow response arrive and be discarded.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.pending_calls(), 0);

    assert_eq!(add.call(Add { x: 2, y: 3 }).await.unwrap(), Sum(5));
}

#[tokio::test]
async fn test_call_after_close_fails_fast_with_closed() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let _server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(server_sock)
        .unwrap();
    let client = iface.client().connect(client_sock).unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    client.close().await.unwrap();
    assert!(client.is_closed());

    let start = tokio::time::Instant::now();
    assert!(matches!(
        add.call(Add { x: 1, y: 2 }).await,
        Err(RpcError::Closed)
    ));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_close_fails_pending_calls() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (a, b) = memory_pipe();
    let client_sock = PipeSocket::accepted(a, serdes(), SocketConfig::default());
    let _silent = PipeSocket::accepted(b, RawSerdes, SocketConfig::default());

    let client = iface.client().connect(client_sock).unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    let pending = tokio::spawn(async move { add.call(Add { x: 1, y: 1 }).await });
    assert!(wait_until(Duration::from_secs(1), || client.pending_calls() == 1).await);

    client.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending call should fail promptly")
        .unwrap();
    assert!(matches!(result, Err(RpcError::Closed)));
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_call_while_disconnected_fails_fast_then_recovers() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let socket_config = SocketConfig {
        redial_interval: Duration::from_millis(20),
        ..Default::default()
    };

    let (mut listener, dialer) = memory_listener();
    let dialed = PipeSocket::dial(dialer.clone(), serdes(), socket_config.clone())
        .await
        .unwrap();
    let accepted = PipeSocket::accepted(
        listener.accept().await.unwrap(),
        serdes(),
        socket_config.clone(),
    );

    let server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(accepted)
        .unwrap();
    let client = iface.client().connect(dialed).unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();
    assert_eq!(add.call(Add { x: 1, y: 1 }).await.unwrap(), Sum(2));

    // Sever the connection and keep the listener unreachable.
    dialer.set_reachable(false);
    server.close().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(1), || {
            client.socket().state() == SocketState::Disconnected
        })
        .await
    );

    let start = tokio::time::Instant::now();
    assert!(matches!(
        add.call(Add { x: 1, y: 1 }).await,
        Err(RpcError::Disconnected)
    ));
    assert!(start.elapsed() < Duration::from_millis(100));

    // Bring the listener back; the socket redials by itself.
    dialer.set_reachable(true);
    let pipe = tokio::time::timeout(Duration::from_secs(1), listener.accept())
        .await
        .expect("socket should redial")
        .unwrap();
    let _server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(PipeSocket::accepted(pipe, serdes(), socket_config))
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || client.socket().is_connected()).await);
    assert_eq!(add.call(Add { x: 2, y: 3 }).await.unwrap(), Sum(5));
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_call_over_lossy_socket_times_out() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(server_sock)
        .unwrap();
    let client = iface
        .client()
        .config(fast_timeout(100))
        .connect(SimSocket::new(client_sock, SimConfig::with_loss(1.0).seeded(5)))
        .unwrap();

    let add = client.rpc::<Add, Sum>().unwrap();
    assert!(matches!(
        add.call(Add { x: 1, y: 1 }).await,
        Err(RpcError::Timeout { .. })
    ));
    assert_eq!(server.invocations::<Add>(), 0);
}

#[tokio::test]
async fn test_call_over_delayed_socket_succeeds() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();
    let delay = Duration::from_millis(30);

    let _server = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .connect(SimSocket::new(server_sock, SimConfig::with_delay(delay, delay)))
        .unwrap();
    let client = iface
        .client()
        .connect(SimSocket::new(client_sock, SimConfig::with_delay(delay, delay)))
        .unwrap();

    let start = tokio::time::Instant::now();
    let add = client.rpc::<Add, Sum>().unwrap();
    assert_eq!(add.call(Add { x: 4, y: 5 }).await.unwrap(), Sum(9));
    assert!(start.elapsed() >= delay * 2);
}

// ---------------------------------------------------------------------------
// Setup errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_missing_handler_returns_error() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (_, server_sock) = socket_pair();

    let result = iface.server().connect(server_sock);
    assert!(matches!(result, Err(ConfigError::MissingHandler(_))));
}

#[tokio::test]
async fn test_connect_duplicate_handler_returns_error() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (_, server_sock) = socket_pair();

    let result = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .on_rpc(|add: Add| Sum(add.x * add.y))
        .connect(server_sock);
    assert!(matches!(result, Err(ConfigError::DuplicateHandler(_))));
}

#[tokio::test]
async fn test_connect_undeclared_handler_returns_error() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (_, server_sock) = socket_pair();

    let result = iface
        .server()
        .on_rpc(|add: Add| Sum(add.x + add.y))
        .on_message(|_: Ping| {})
        .connect(server_sock);
    assert!(matches!(result, Err(ConfigError::UndeclaredOperation(_))));
}

#[tokio::test]
async fn test_rpc_handle_validated_against_called_contract() {
    let iface = InterfaceDef::of::<CalculatorWithPing, NoService>(JsonCodec).unwrap();
    let (client_sock, _server_sock) = socket_pair();
    let client = iface.client().connect(client_sock).unwrap();

    assert!(client.rpc::<Add, Sum>().is_ok());
    assert!(client.message::<Ping>().is_ok());
    assert!(matches!(
        client.rpc::<Add, i64>(),
        Err(ConfigError::ResponseMismatch { .. })
    ));
    assert!(matches!(
        client.rpc::<Echo, Echo>(),
        Err(ConfigError::UndeclaredOperation(_))
    ));
    assert!(matches!(
        client.message::<Add>(),
        Err(ConfigError::UndeclaredOperation(_))
    ));
}

// ---------------------------------------------------------------------------
// Raw wire behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_response_for_unknown_id_is_ignored() {
    let iface = InterfaceDef::of::<Calculator, NoService>(JsonCodec).unwrap();
    let (a, b) = memory_pipe();
    let client_sock = PipeSocket::accepted(a, serdes(), SocketConfig::default());
    let raw = Arc::new(PipeSocket::accepted(b, serdes(), SocketConfig::default()));

    let client = iface
        .client()
        .config(fast_timeout(500))
        .connect(client_sock)
        .unwrap();
    let add = client.rpc::<Add, Sum>().unwrap();

    // Answer the real request by hand, after a stray response.
    let responder = {
        let raw = Arc::clone(&raw);
        tokio::spawn(async move {
            let Some(Envelope::Request { id, .. }) = raw.recv().await.unwrap() else {
                panic!("expected a request");
            };
            let responses = envoy_protocol::UnionBuilder::new(JsonCodec)
                .with::<Sum>()
                .build();
            raw.send(Envelope::Response {
                id: id.wrapping_add(1000),
                data: responses.encode(&Sum(-1)).unwrap(),
            })
            .await
            .unwrap();
            raw.send(Envelope::Response {
                id,
                data: responses.encode(&Sum(7)).unwrap(),
            })
            .await
            .unwrap();
        })
    };

    assert_eq!(add.call(Add { x: 3, y: 4 }).await.unwrap(), Sum(7));
    responder.await.unwrap();
}

#[tokio::test]
async fn test_call_large_payloads_round_trip_and_oversized_fails_without_closing() {
    let iface = InterfaceDef::of::<EchoService, NoService>(JsonCodec).unwrap();
    let (client_sock, server_sock) = socket_pair();

    let server = iface
        .server()
        .on_rpc(|echo: Echo| echo)
        .connect(server_sock)
        .unwrap();
    let client = iface.client().connect(client_sock).unwrap();
    let echo = client.rpc::<Echo, Echo>().unwrap();

    for len in [8_000, 40_000] {
        let text = "a".repeat(len);
        assert_eq!(echo.call(Echo(text.clone())).await.unwrap(), Echo(text));
    }

    let err = echo.call(Echo("a".repeat(70_000))).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::FrameTooLarge { size, limit } if size > limit
    ));
    assert_eq!(client.pending_calls(), 0);

    assert_eq!(echo.call(Echo("x".into())).await.unwrap(), Echo("x".into()));
    assert!(!client.is_closed());
    assert!(!server.is_closed());
    assert_eq!(server.invocations::<Echo>(), 3);
}
