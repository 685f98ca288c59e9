//! End-to-end flow through a foreground daemon: listener, handoff queue and
//! thread workers.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rstest::{fixture, rstest};

use crate::process::{DaemonPhase, LaunchMode, SystemSignaller};
use crate::tests::support::{Scratch, TestDaemonizer, TestShutdownSignal, current_account};
use crate::workers::{HandlerError, RequestHandler};

#[derive(Default)]
struct EchoCounter {
    requests: AtomicUsize,
}

impl RequestHandler for EchoCounter {
    fn handle(&self, request: &[u8]) -> Result<Option<Vec<u8>>, HandlerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut reply = b"ack:".to_vec();
        reply.extend_from_slice(request);
        Ok(Some(reply))
    }
}

fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).expect("connect to daemon");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    stream.write_all(payload).expect("send request");
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).expect("read reply");
    reply
}

#[fixture]
fn scratch() -> Scratch {
    Scratch::new()
}

#[rstest]
fn foreground_daemon_serves_and_shuts_down_cleanly(scratch: Scratch) {
    let config = scratch.config("start", &[]);
    let daemonizer = TestDaemonizer::default();
    let mut supervisor = scratch.supervisor(daemonizer.clone(), SystemSignaller);
    let handler = Arc::new(EchoCounter::default());

    let handle = supervisor
        .start(
            &config,
            Arc::clone(&handler) as Arc<dyn RequestHandler>,
            TestShutdownSignal::fired(),
        )
        .expect("start daemon");

    assert_eq!(supervisor.phase(), DaemonPhase::Running);
    assert_eq!(
        fs::read_to_string(scratch.pid_path()).expect("read pid file"),
        format!("{}\n", std::process::id())
    );
    let (user, _) = current_account();
    assert_eq!(daemonizer.calls(), vec![(LaunchMode::Foreground, user)]);

    let addr = handle.local_addr().expect("tcp address");
    assert_eq!(exchange(addr, b"ping"), b"ack:ping");

    let report = supervisor
        .serve(handle)
        .expect("serve until shutdown");

    assert!(report.is_clean());
    assert_eq!(report.stopped().len(), 2);
    assert_eq!(supervisor.phase(), DaemonPhase::Stopped);
    assert!(!scratch.pid_path().exists());
    assert_eq!(handler.requests.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case(1)]
#[case(5)]
#[case(20)]
fn every_connection_is_served_exactly_once(scratch: Scratch, #[case] connections: usize) {
    let config = scratch.config("start", &[]);
    let mut supervisor = scratch.supervisor(TestDaemonizer::default(), SystemSignaller);
    let handler = Arc::new(EchoCounter::default());
    let handle = supervisor
        .start(
            &config,
            Arc::clone(&handler) as Arc<dyn RequestHandler>,
            TestShutdownSignal::fired(),
        )
        .expect("start daemon");
    let addr = handle.local_addr().expect("tcp address");

    let clients: Vec<_> = (0..connections)
        .map(|index| {
            std::thread::spawn(move || {
                let payload = format!("req-{index}");
                let reply = exchange(addr, payload.as_bytes());
                assert_eq!(reply, format!("ack:{payload}").into_bytes());
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread");
    }

    supervisor
        .serve(handle)
        .expect("serve until shutdown");
    assert_eq!(handler.requests.load(Ordering::SeqCst), connections);
}

#[rstest]
fn dropping_the_handle_removes_the_pid_file(scratch: Scratch) {
    let config = scratch.config("start", &[]);
    let mut supervisor = scratch.supervisor(TestDaemonizer::default(), SystemSignaller);
    let handle = supervisor
        .start(
            &config,
            Arc::new(EchoCounter::default()),
            TestShutdownSignal::new(),
        )
        .expect("start daemon");
    assert!(scratch.pid_path().exists());

    drop(handle);

    assert!(!scratch.pid_path().exists());
}
