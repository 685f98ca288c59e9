//! Shared fixtures for the daemon behaviour suites.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use nix::unistd::{Group, User, getgid, getuid};
use tempfile::TempDir;
use zap_config::Config;

use crate::process::{
    DaemonizeError, Daemonizer, LaunchMode, ProcessSignaller, RunAs, ShutdownError,
    ShutdownSignal, StopSchedule, Supervisor,
};

/// Schedule with the production attempt counts and no waiting.
pub fn instant_schedule() -> StopSchedule {
    StopSchedule::with_intervals(Duration::ZERO, Duration::ZERO)
}

/// Names of the account running the tests.
pub fn current_account() -> (String, String) {
    let user = User::from_uid(getuid())
        .expect("query current user")
        .expect("current user has an entry");
    let group = Group::from_gid(getgid())
        .expect("query current group")
        .expect("current group has an entry");
    (user.name, group.name)
}

/// Scratch directory holding the PID file and configuration for one test.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.path().join("zap_proxy.pid")
    }

    /// Foreground configuration for the current account with thread workers
    /// and an ephemeral TCP port, plus any extra arguments.
    pub fn config(&self, command: &str, extra: &[&str]) -> Config {
        let (user, group) = current_account();
        let mut args: Vec<String> = [
            "zapd",
            "--cmd",
            command,
            "--log",
            "-",
            "--listen",
            "tcp://127.0.0.1:0",
            "--worker-isolation",
            "thread",
            "--workers",
            "2",
            "--poll-interval-ms",
            "10",
            "--read-timeout-ms",
            "1000",
        ]
        .iter()
        .map(|arg| (*arg).to_owned())
        .collect();
        args.extend([
            "--config".to_owned(),
            self.path().display().to_string(),
            "--pid".to_owned(),
            self.pid_path().display().to_string(),
            "--user".to_owned(),
            user,
            "--group".to_owned(),
            group,
        ]);
        args.extend(extra.iter().map(|arg| (*arg).to_owned()));
        Config::load_from_iter(args).expect("parse test config")
    }

    pub fn supervisor<P: ProcessSignaller>(
        &self,
        daemonizer: TestDaemonizer,
        signaller: P,
    ) -> Supervisor<TestDaemonizer, P> {
        Supervisor::with_collaborators(self.pid_path(), daemonizer, signaller, instant_schedule())
    }
}

/// Daemoniser that records each request instead of detaching.
#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<Mutex<Vec<(LaunchMode, String)>>>,
}

impl TestDaemonizer {
    pub fn calls(&self) -> Vec<(LaunchMode, String)> {
        self.calls.lock().expect("daemonizer mutex").clone()
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self, mode: LaunchMode, account: &RunAs) -> Result<(), DaemonizeError> {
        self.calls
            .lock()
            .expect("daemonizer mutex")
            .push((mode, account.user().to_owned()));
        Ok(())
    }
}

/// Shutdown signal fired explicitly by the test.
#[derive(Clone)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl TestShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn fired() -> Self {
        let signal = Self::new();
        signal.trigger();
        signal
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        *triggered = true;
        cvar.notify_all();
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(self) -> Result<(), ShutdownError> {
        let (lock, cvar) = &*self.inner;
        let mut triggered = lock.lock().expect("shutdown mutex poisoned");
        while !*triggered {
            triggered = cvar
                .wait(triggered)
                .expect("shutdown mutex poisoned during wait");
        }
        Ok(())
    }
}
