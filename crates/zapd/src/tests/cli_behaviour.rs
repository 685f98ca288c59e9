//! `--cmd` dispatch and exit codes.

use std::fs;
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mockall::predicate::eq;
use rstest::{fixture, rstest};

use crate::cli::{dispatch, run};
use crate::process::{MockProcessSignaller, StopSignal, SystemSignaller};
use crate::tests::support::{Scratch, TestDaemonizer, TestShutdownSignal};

#[fixture]
fn scratch() -> Scratch {
    Scratch::new()
}

struct Output {
    code: ExitCode,
    stdout: String,
    stderr: String,
}

fn dispatch_with(
    scratch: &Scratch,
    command: &str,
    extra: &[&str],
    daemonizer: TestDaemonizer,
    signaller: MockProcessSignaller,
) -> Output {
    let config = scratch.config(command, extra);
    let mut supervisor = scratch.supervisor(daemonizer, signaller);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = dispatch(
        &config,
        &mut supervisor,
        TestShutdownSignal::fired(),
        &mut stdout,
        &mut stderr,
    );
    Output {
        code,
        stdout: String::from_utf8(stdout).expect("utf8 stdout"),
        stderr: String::from_utf8(stderr).expect("utf8 stderr"),
    }
}

#[rstest]
#[case("help")]
#[case("HELP")]
fn help_prints_usage(scratch: Scratch, #[case] command: &str) {
    let output = dispatch_with(
        &scratch,
        command,
        &[],
        TestDaemonizer::default(),
        MockProcessSignaller::new(),
    );
    assert_eq!(output.code, ExitCode::SUCCESS);
    assert!(output.stdout.contains("--cmd"));
    assert!(output.stderr.is_empty());
}

#[rstest]
fn unknown_command_is_a_usage_error(scratch: Scratch) {
    let output = dispatch_with(
        &scratch,
        "reload",
        &[],
        TestDaemonizer::default(),
        MockProcessSignaller::new(),
    );
    assert_eq!(output.code, ExitCode::from(2));
    assert!(output.stderr.contains("unknown command 'reload'"));
    assert!(output.stderr.contains("--cmd"));
}

#[rstest]
fn stop_when_nothing_runs_succeeds(scratch: Scratch) {
    let mut signaller = MockProcessSignaller::new();
    signaller.expect_send().never();
    let output = dispatch_with(&scratch, "stop", &[], TestDaemonizer::default(), signaller);
    assert_eq!(output.code, ExitCode::SUCCESS);
}

#[rstest]
fn stop_that_cannot_kill_fails(scratch: Scratch) {
    fs::write(scratch.pid_path(), "4242\n").expect("write pid file");
    let mut signaller = MockProcessSignaller::new();
    signaller.expect_is_alive().returning(|_| Ok(true));
    signaller.expect_send().returning(|_, _| Ok(()));
    let output = dispatch_with(&scratch, "stop", &[], TestDaemonizer::default(), signaller);
    assert_eq!(output.code, ExitCode::FAILURE);
    assert!(output.stderr.contains("4242"));
}

#[rstest]
fn restart_skips_start_when_stop_fails(scratch: Scratch) {
    fs::write(scratch.pid_path(), "4242\n").expect("write pid file");
    let mut signaller = MockProcessSignaller::new();
    signaller.expect_is_alive().returning(|_| Ok(true));
    signaller.expect_send().returning(|_, _| Ok(()));
    let daemonizer = TestDaemonizer::default();
    let output = dispatch_with(&scratch, "restart", &[], daemonizer.clone(), signaller);
    assert_eq!(output.code, ExitCode::FAILURE);
    assert!(daemonizer.calls().is_empty());
}

#[rstest]
fn restart_stops_the_old_daemon_before_loading_the_environment(scratch: Scratch) {
    fs::write(scratch.pid_path(), "4242\n").expect("write pid file");
    fs::write(scratch.path().join("bootstrap.clp"), "").expect("write bootstrap");
    let probes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&probes);
    let mut signaller = MockProcessSignaller::new();
    signaller
        .expect_is_alive()
        .returning(move |_| Ok(counter.fetch_add(1, Ordering::SeqCst) == 0));
    signaller
        .expect_send()
        .with(eq(4242), eq(StopSignal::Terminate))
        .times(1)
        .returning(|_, _| Ok(()));
    let daemonizer = TestDaemonizer::default();

    let output = dispatch_with(&scratch, "restart", &[], daemonizer.clone(), signaller);

    assert_eq!(output.code, ExitCode::FAILURE);
    assert!(output.stderr.contains("bootstrap.clp"));
    assert!(!scratch.pid_path().exists());
    assert!(daemonizer.calls().is_empty());
}

#[rstest]
fn start_serves_until_shutdown(scratch: Scratch) {
    let daemonizer = TestDaemonizer::default();
    let mut signaller = MockProcessSignaller::new();
    signaller.expect_is_alive().never();
    let output = dispatch_with(&scratch, "start", &[], daemonizer.clone(), signaller);
    assert_eq!(output.code, ExitCode::SUCCESS);
    assert_eq!(daemonizer.calls().len(), 1);
    assert!(!scratch.pid_path().exists());
}

#[rstest]
fn start_with_busy_port_fails(scratch: Scratch) {
    let occupied = TcpListener::bind("127.0.0.1:0").expect("occupy a port");
    let port = occupied.local_addr().expect("local addr").port();
    let listen = format!("tcp://127.0.0.1:{port}");
    let output = dispatch_with(
        &scratch,
        "start",
        &["--listen", &listen],
        TestDaemonizer::default(),
        MockProcessSignaller::new(),
    );
    assert_eq!(output.code, ExitCode::FAILURE);
    assert!(!output.stderr.is_empty());
    assert!(!scratch.pid_path().exists());
}

#[rstest]
fn start_with_empty_bootstrap_fails_before_binding(scratch: Scratch) {
    fs::write(scratch.path().join("bootstrap.clp"), "").expect("write bootstrap");
    let daemonizer = TestDaemonizer::default();
    let mut supervisor = scratch.supervisor(daemonizer.clone(), SystemSignaller);
    let config = scratch.config("start", &[]);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let code = dispatch(
        &config,
        &mut supervisor,
        TestShutdownSignal::fired(),
        &mut stdout,
        &mut stderr,
    );

    assert_eq!(code, ExitCode::FAILURE);
    assert!(daemonizer.calls().is_empty());
}

#[rstest]
fn run_prints_help_for_help_flag() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run(["zapd", "--help"], &mut stdout, &mut stderr);
    assert_eq!(code, ExitCode::SUCCESS);
    assert!(String::from_utf8_lossy(&stdout).contains("--daemonize"));
}

#[rstest]
fn run_rejects_malformed_arguments() {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let code = run(["zapd", "--workers", "many"], &mut stdout, &mut stderr);
    assert_eq!(code, ExitCode::from(2));
    assert!(!stderr.is_empty());
}
