//! Tests for the socket listener.

use std::io::Read;
use std::net::TcpStream;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use zap_config::{QueuePolicy, SocketEndpoint};

use super::{BindError, SocketListener, Transport};
use crate::handoff::{ConnectionHandle, HandoffQueue, QueueOptions};

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

#[fixture]
fn queue() -> Arc<HandoffQueue> {
    Arc::new(HandoffQueue::new(QueueOptions::default()).expect("create queue"))
}

#[fixture]
fn unix_tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

fn drain(queue: &HandoffQueue, expected: usize) -> Vec<ConnectionHandle> {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut handles = Vec::new();
    while handles.len() < expected && Instant::now() < deadline {
        match queue.try_pop().expect("pop") {
            Some(handle) => handles.push(handle),
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    }
    handles
}

#[rstest]
fn tcp_listener_enqueues_accepted_connections(
    tcp_endpoint: SocketEndpoint,
    queue: Arc<HandoffQueue>,
) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let handle = listener
        .start(Arc::clone(&queue), |_| {})
        .expect("start listener");

    let _first = TcpStream::connect(addr).expect("connect first client");
    let _second = TcpStream::connect(addr).expect("connect second client");

    let handles = drain(&queue, 2);
    assert_eq!(handles.len(), 2, "expected two queued connections");
    assert!(handles.iter().all(|h| h.transport() == Transport::Tcp));
    assert!(handles.iter().all(|h| h.peer().is_some()));
    assert_eq!(handle.stats().accepted(), 2);

    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn shutdown_wakes_a_blocked_accept(tcp_endpoint: SocketEndpoint, queue: Arc<HandoffQueue>) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let handle = listener.start(queue, |_| {}).expect("start listener");
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    handle.shutdown();
    handle.join().expect("join listener");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[rstest]
fn requested_shutdown_does_not_report_fatal(
    tcp_endpoint: SocketEndpoint,
    queue: Arc<HandoffQueue>,
) {
    let (tx, rx) = mpsc::channel();
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let handle = listener
        .start(queue, move |error| {
            tx.send(error.to_string()).expect("report fatal");
        })
        .expect("start listener");

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(rx.try_recv().is_err(), "no fatal error expected");
}

#[test]
fn full_queue_closes_the_connection() {
    let options = QueueOptions::new(QueuePolicy::Reject, Duration::from_millis(10))
        .with_buffer_bytes(1);
    let queue = Arc::new(HandoffQueue::new(options).expect("create queue"));
    let listener = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind");
    let addr = listener.local_addr().expect("local address");
    let handle = listener
        .start(Arc::clone(&queue), |_| {})
        .expect("start listener");

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut clients = Vec::new();
    while handle.stats().rejected() == 0 && Instant::now() < deadline {
        clients.push(TcpStream::connect(addr).expect("connect client"));
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.stats().rejected() > 0, "queue never filled");

    // The rejected connection is the newest one; the daemon closed it.
    let mut last = clients.pop().expect("at least one client");
    last.set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set timeout");
    let mut buf = [0_u8; 1];
    assert_eq!(last.read(&mut buf).expect("read eof"), 0);

    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn unix_listener_cleans_stale_socket_files(
    unix_tempdir: tempfile::TempDir,
    queue: Arc<HandoffQueue>,
) {
    let path = unix_tempdir.path().join("zapd.sock");
    {
        let _stale = UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let handle = listener
        .start(Arc::clone(&queue), |_| {})
        .expect("start listener");

    let _client = UnixStream::connect(&path).expect("connect unix client");
    let handles = drain(&queue, 1);
    assert_eq!(handles.len(), 1);
    assert_eq!(
        handles.first().map(ConnectionHandle::transport),
        Some(Transport::Unix)
    );

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(
        !path.exists(),
        "listener should remove unix socket on shutdown"
    );
}

#[rstest]
fn unix_listener_rejects_in_use_socket(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("zapd.sock");
    let _existing = UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, BindError::UnixInUse { .. }));
}

#[rstest]
fn unix_listener_rejects_regular_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("zapd.sock");
    std::fs::write(&path, b"not a socket").expect("write file");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, BindError::UnixNotSocket { .. }));
}

#[test]
fn tcp_bind_conflict_is_reported() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("bind occupant");
    let port = occupied.local_addr().expect("occupant address").port();

    let error = SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", port))
        .expect_err("port is taken");
    assert!(matches!(error, BindError::BindTcp { .. }), "got {error:?}");
}
