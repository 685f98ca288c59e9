//! Tests for the descriptor handoff queue.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use zap_config::QueuePolicy;

use super::{ConnectionHandle, HandoffQueue, PushError, QueueOptions};
use crate::transport::{ConnectionStream, Transport};

struct Loopback {
    listener: TcpListener,
}

impl Loopback {
    fn accept_pair(&self) -> (TcpStream, ConnectionHandle) {
        let addr = self.listener.local_addr().expect("local address");
        let client = TcpStream::connect(addr).expect("connect client");
        let (server, peer) = self.listener.accept().expect("accept client");
        (client, ConnectionHandle::from_tcp(server, peer))
    }
}

#[fixture]
fn loopback() -> Loopback {
    Loopback {
        listener: TcpListener::bind(("127.0.0.1", 0)).expect("bind loopback"),
    }
}

#[fixture]
fn queue() -> HandoffQueue {
    HandoffQueue::new(QueueOptions::default()).expect("create queue")
}

#[rstest]
fn empty_queue_pops_none(queue: HandoffQueue) {
    assert!(queue.try_pop().expect("pop").is_none());
}

#[rstest]
fn popped_handle_reaches_the_same_connection(loopback: Loopback, queue: HandoffQueue) {
    let (mut client, handle) = loopback.accept_pair();
    let peer = handle.peer().map(str::to_owned);
    queue.push(handle).expect("push handle");

    let popped = queue.try_pop().expect("pop").expect("handle queued");
    assert_eq!(popped.transport(), Transport::Tcp);
    assert_eq!(popped.peer().map(str::to_owned), peer);

    let mut stream = popped.into_stream();
    client.write_all(b"ping").expect("client write");
    let mut buf = [0_u8; 4];
    stream.read_exact(&mut buf).expect("server read");
    assert_eq!(&buf, b"ping");

    stream.write_all(b"pong").expect("server write");
    drop(stream);
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).expect("client read to end");
    assert_eq!(reply, b"pong");
}

#[rstest]
fn handles_leave_in_arrival_order(loopback: Loopback, queue: HandoffQueue) {
    let mut clients = Vec::new();
    let mut peers = Vec::new();
    for _ in 0..3 {
        let (client, handle) = loopback.accept_pair();
        peers.push(handle.peer().map(str::to_owned));
        queue.push(handle).expect("push handle");
        clients.push(client);
    }

    let popped: Vec<_> = (0..3)
        .map(|_| {
            queue
                .try_pop()
                .expect("pop")
                .and_then(|handle| handle.peer().map(str::to_owned))
        })
        .collect();
    assert_eq!(popped, peers);
    assert!(queue.try_pop().expect("pop").is_none());
}

#[test]
fn unix_connections_round_trip() {
    let queue = HandoffQueue::new(QueueOptions::default()).expect("create queue");
    let (mut local, remote) = UnixStream::pair().expect("unix pair");
    queue
        .push(ConnectionHandle::from_unix(remote))
        .expect("push unix handle");

    let popped = queue.try_pop().expect("pop").expect("handle queued");
    assert_eq!(popped.transport(), Transport::Unix);
    let mut stream = popped.into_stream();
    assert!(matches!(stream, ConnectionStream::Unix(_)));
    stream.write_all(b"hello").expect("write");
    drop(stream);
    let mut received = String::new();
    local.read_to_string(&mut received).expect("read");
    assert_eq!(received, "hello");
}

#[test]
fn full_queue_rejects_and_returns_the_handle() {
    let options = QueueOptions::new(QueuePolicy::Reject, Duration::from_millis(10))
        .with_buffer_bytes(1);
    let queue = HandoffQueue::new(options).expect("create queue");

    let mut rejected = None;
    let mut peers = Vec::new();
    for _ in 0..4096 {
        let (local, remote) = UnixStream::pair().expect("unix pair");
        peers.push(local);
        match queue.push(ConnectionHandle::from_unix(remote)) {
            Ok(()) => {}
            Err(error) => {
                rejected = Some(error);
                break;
            }
        }
    }

    let error = rejected.expect("a tiny buffer must eventually fill");
    assert!(matches!(error, PushError::Full { .. }), "got {error:?}");
    let handle = error.into_handle();
    assert_eq!(handle.transport(), Transport::Unix);
}

#[test]
fn blocking_policy_times_out_when_full() {
    let options =
        QueueOptions::new(QueuePolicy::Block, Duration::from_millis(20)).with_buffer_bytes(1);
    let queue = HandoffQueue::new(options).expect("create queue");

    let mut outcome = None;
    let mut peers = Vec::new();
    for _ in 0..4096 {
        let (local, remote) = UnixStream::pair().expect("unix pair");
        peers.push(local);
        if let Err(error) = queue.push(ConnectionHandle::from_unix(remote)) {
            outcome = Some(error);
            break;
        }
    }
    assert!(matches!(outcome, Some(PushError::Full { .. })));
}

#[rstest]
fn concurrent_consumers_never_share_a_handle(loopback: Loopback) {
    let queue = Arc::new(HandoffQueue::new(QueueOptions::default()).expect("create queue"));
    let mut clients = Vec::new();
    for _ in 0..8 {
        let (client, handle) = loopback.accept_pair();
        queue.push(handle).expect("push handle");
        clients.push(client);
    }

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut peers = Vec::new();
                while let Some(handle) = queue.try_pop().expect("pop") {
                    peers.extend(handle.peer().map(str::to_owned));
                }
                peers
            })
        })
        .collect();

    let mut seen: Vec<String> = consumers
        .into_iter()
        .flat_map(|consumer| consumer.join().expect("join consumer"))
        .collect();
    seen.sort();
    let before = seen.len();
    seen.dedup();
    assert_eq!(before, 8, "every handle should be received");
    assert_eq!(seen.len(), 8, "no handle should be received twice");
}
