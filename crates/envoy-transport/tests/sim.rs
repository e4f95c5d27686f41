//! Integration tests for the `SimSocket` fault-injection decorator.

use std::time::Duration;

use envoy_protocol::RawSerdes;
use envoy_transport::{
    memory_pipe, MemoryPipe, PipeSocket, SimConfig, SimSocket, Socket, SocketConfig,
    TransportError,
};

type RawSocket = PipeSocket<MemoryPipe, RawSerdes>;

fn pair() -> (RawSocket, RawSocket) {
    let (a, b) = memory_pipe();
    (
        PipeSocket::accepted(a, RawSerdes, SocketConfig::default()),
        PipeSocket::accepted(b, RawSerdes, SocketConfig::default()),
    )
}

#[tokio::test]
async fn test_sim_send_full_loss_never_delivers() {
    let (a, b) = pair();
    let lossy = SimSocket::new(a, SimConfig::with_loss(1.0).seeded(3));

    for i in 0..10u8 {
        lossy.send(vec![i]).await.expect("dropped sends still succeed");
    }

    let result = tokio::time::timeout(Duration::from_millis(50), b.recv()).await;
    assert!(result.is_err(), "nothing should arrive");
}

#[tokio::test]
async fn test_sim_recv_full_loss_reports_keepalive() {
    let (a, b) = pair();
    let lossy = SimSocket::new(b, SimConfig::with_loss(1.0).seeded(3));

    a.send(b"lost".to_vec()).await.unwrap();
    assert_eq!(lossy.recv().await.unwrap(), None);
    assert!(lossy.is_connected());
}

#[tokio::test]
async fn test_sim_no_faults_behaves_like_inner_socket() {
    let (a, b) = pair();
    let a = SimSocket::new(a, SimConfig::default().seeded(9));
    let b = SimSocket::new(b, SimConfig::default().seeded(9));

    a.send(b"one".to_vec()).await.unwrap();
    a.send(b"two".to_vec()).await.unwrap();
    assert_eq!(b.recv().await.unwrap(), Some(b"one".to_vec()));
    assert_eq!(b.recv().await.unwrap(), Some(b"two".to_vec()));

    b.send(Vec::new()).await.unwrap();
    assert_eq!(a.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_sim_delayed_send_arrives_after_delay() {
    let (a, b) = pair();
    let delay = Duration::from_millis(40);
    let slow = SimSocket::new(a, SimConfig::with_delay(delay, delay));

    let start = tokio::time::Instant::now();
    slow.send(b"late".to_vec()).await.unwrap();
    assert!(start.elapsed() < delay, "send must not block on the delay");

    assert_eq!(b.recv().await.unwrap(), Some(b"late".to_vec()));
    assert!(start.elapsed() >= delay);
}

#[tokio::test]
async fn test_sim_deferred_send_error_surfaces_on_next_send() {
    let (a, _b) = pair();
    let delay = Duration::from_millis(10);
    let slow = SimSocket::new(a, SimConfig::with_delay(delay, delay));

    slow.send(b"doomed".to_vec()).await.unwrap();
    slow.inner().close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        slow.send(b"next".to_vec()).await,
        Err(TransportError::Closed)
    ));
}

#[tokio::test]
async fn test_sim_send_with_queued_error_still_delivers_message() {
    let config = SocketConfig {
        recv_buffer_size: 8,
        ..SocketConfig::default()
    };
    let (a, b) = memory_pipe();
    let a = PipeSocket::accepted(a, RawSerdes, config.clone());
    let b = PipeSocket::accepted(b, RawSerdes, config);
    let delay = Duration::from_millis(10);
    let slow = SimSocket::new(a, SimConfig::with_delay(delay, delay));

    // Fails on the delayed task, after the caller got Ok.
    slow.send(vec![0; 9]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        slow.send(b"next".to_vec()).await,
        Err(TransportError::FrameTooLarge { size: 9, limit: 8 })
    ));
    let received = tokio::time::timeout(Duration::from_secs(1), b.recv()).await;
    assert_eq!(received.unwrap().unwrap(), Some(b"next".to_vec()));

    // The queue is drained.
    slow.send(b"last".to_vec()).await.unwrap();
    assert!(slow.is_connected());
}

#[tokio::test]
async fn test_sim_close_closes_inner() {
    let (a, _b) = pair();
    let sim = SimSocket::new(a, SimConfig::default());

    sim.close().await.unwrap();
    assert!(sim.is_closed());
    assert!(sim.inner().is_closed());
}
