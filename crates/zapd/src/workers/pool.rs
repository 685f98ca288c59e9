//! Fixed-size set of worker units sharing one handoff queue.

use std::mem;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, close, fork, getpid};
use tracing::{info, warn};
use zap_config::{Config, WorkerIsolation};

use super::unit::{ServeSettings, Worker, WorkerRecord, WorkerStats};
use super::{RequestHandler, WORKER_TARGET, WorkerError};
use crate::handoff::HandoffQueue;
use crate::process::TERMINATION_SIGNALS;

const REAP_INTERVAL: Duration = Duration::from_millis(10);
const CHILD_PANIC_EXIT: i32 = 101;

/// Settings used to spawn a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    count: usize,
    isolation: WorkerIsolation,
    poll_interval: Duration,
    settings: ServeSettings,
    shutdown_timeout: Duration,
    inherited_fds: Vec<RawFd>,
}

impl PoolOptions {
    /// Options with the daemon's defaults for `count` units.
    #[must_use]
    pub fn new(count: usize, isolation: WorkerIsolation) -> Self {
        Self {
            count,
            isolation,
            poll_interval: Duration::from_millis(zap_config::DEFAULT_POLL_INTERVAL_MS),
            settings: ServeSettings {
                read_bytes: zap_config::DEFAULT_READ_BYTES,
                read_timeout: Duration::from_millis(zap_config::DEFAULT_READ_TIMEOUT_MS),
            },
            shutdown_timeout: Duration::from_millis(
                zap_config::DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS,
            ),
            inherited_fds: Vec::new(),
        }
    }

    /// Options derived from the daemon configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(usize::from(config.workers()), config.worker_isolation())
            .with_poll_interval(config.poll_interval())
            .with_settings(ServeSettings {
                read_bytes: config.read_bytes(),
                read_timeout: config.read_timeout(),
            })
            .with_shutdown_timeout(config.worker_shutdown_timeout())
    }

    /// Sets the pause between polls of an empty queue.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how each request is read.
    #[must_use]
    pub const fn with_settings(mut self, settings: ServeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets how long shutdown waits for each unit.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Descriptors each forked unit closes right after `fork(2)`.
    #[must_use]
    pub fn with_inherited_fds(mut self, fds: Vec<RawFd>) -> Self {
        self.inherited_fds = fds;
        self
    }

    /// Number of units.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Isolation of each unit.
    #[must_use]
    pub const fn isolation(&self) -> WorkerIsolation {
        self.isolation
    }
}

enum Unit {
    Thread {
        record: WorkerRecord,
        stats: Arc<WorkerStats>,
        handle: thread::JoinHandle<()>,
    },
    Process {
        id: usize,
        pid: Pid,
    },
}

impl Unit {
    const fn id(&self) -> usize {
        match self {
            Self::Thread { record, .. } => record.id(),
            Self::Process { id, .. } => *id,
        }
    }
}

/// Outcome of stopping every unit in a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    stopped: Vec<usize>,
    timed_out: Vec<usize>,
}

impl ShutdownReport {
    /// Units that exited on their own.
    #[must_use]
    pub fn stopped(&self) -> &[usize] {
        &self.stopped
    }

    /// Units that missed the shutdown timeout.
    #[must_use]
    pub fn timed_out(&self) -> &[usize] {
        &self.timed_out
    }

    /// Whether every unit exited within the timeout.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Persistent worker units polling one [`HandoffQueue`].
pub struct WorkerPool {
    units: Vec<Unit>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Starts every unit described by `options`.
    ///
    /// If a unit fails to start, the units already running are stopped before
    /// the error is returned.
    pub fn spawn(
        options: &PoolOptions,
        queue: &Arc<HandoffQueue>,
        handler: &Arc<dyn RequestHandler>,
    ) -> Result<Self, WorkerError> {
        if options.count == 0 {
            return Err(WorkerError::Empty);
        }
        let mut pool = Self {
            units: Vec::with_capacity(options.count),
            shutdown_timeout: options.shutdown_timeout,
        };
        for id in 0..options.count {
            let worker = Worker::new(
                WorkerRecord::new(id, options.poll_interval),
                Arc::clone(queue),
                Arc::clone(handler),
                options.settings,
            );
            let unit = match options.isolation {
                WorkerIsolation::Thread => spawn_thread(worker),
                WorkerIsolation::Process => spawn_process(worker, &options.inherited_fds),
            };
            match unit {
                Ok(unit) => pool.units.push(unit),
                Err(error) => {
                    let report = pool.stop_units();
                    warn!(
                        target: WORKER_TARGET,
                        stopped = report.stopped.len(),
                        "worker spawn failed; stopped partial pool"
                    );
                    return Err(error);
                }
            }
        }
        info!(
            target: WORKER_TARGET,
            count = options.count,
            isolation = %options.isolation,
            "worker pool started"
        );
        Ok(pool)
    }

    /// Number of running units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the pool has no units.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Counters for a thread unit.
    ///
    /// Process units keep their counters in the child and log them on exit,
    /// so this returns `None` for them.
    #[must_use]
    pub fn stats(&self, id: usize) -> Option<Arc<WorkerStats>> {
        self.units.iter().find_map(|unit| match unit {
            Unit::Thread { record, stats, .. } if record.id() == id => Some(Arc::clone(stats)),
            Unit::Thread { .. } | Unit::Process { .. } => None,
        })
    }

    /// PIDs of process units.
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        self.units
            .iter()
            .filter_map(|unit| match unit {
                Unit::Process { pid, .. } => u32::try_from(pid.as_raw()).ok(),
                Unit::Thread { .. } => None,
            })
            .collect()
    }

    /// Requests cooperative shutdown of every unit and waits for them.
    ///
    /// Each unit gets the configured timeout. Process units that miss it are
    /// killed and reaped; thread units that miss it are left detached.
    pub fn shutdown(mut self) -> ShutdownReport {
        let report = self.stop_units();
        info!(
            target: WORKER_TARGET,
            stopped = report.stopped.len(),
            timed_out = report.timed_out.len(),
            "worker pool stopped"
        );
        report
    }

    fn stop_units(&mut self) -> ShutdownReport {
        let units = mem::take(&mut self.units);
        for unit in &units {
            request_stop(unit);
        }
        let mut report = ShutdownReport::default();
        for unit in units {
            let id = unit.id();
            if wait_for_unit(unit, self.shutdown_timeout) {
                report.stopped.push(id);
            } else {
                warn!(
                    target: WORKER_TARGET,
                    worker = id,
                    timeout_ms = self.shutdown_timeout.as_millis(),
                    "worker did not stop in time"
                );
                report.timed_out.push(id);
            }
        }
        report
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.is_empty() {
            let report = self.stop_units();
            if !report.is_clean() {
                warn!(
                    target: WORKER_TARGET,
                    timed_out = ?report.timed_out,
                    "worker pool dropped with units still running"
                );
            }
        }
    }
}

fn spawn_thread(worker: Worker) -> Result<Unit, WorkerError> {
    let record = worker.record().clone();
    let stats = worker.stats();
    let id = record.id();
    let handle = thread::Builder::new()
        .name(format!("zapd-worker-{id}"))
        .spawn(move || worker.run())
        .map_err(|source| WorkerError::Spawn { id, source })?;
    Ok(Unit::Thread {
        record,
        stats,
        handle,
    })
}

fn spawn_process(worker: Worker, inherited_fds: &[RawFd]) -> Result<Unit, WorkerError> {
    let id = worker.record().id();
    let worker = worker.watching_parent(getpid());
    // SAFETY: the child only runs the worker loop and then exits without
    // returning into the parent's call stack.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            info!(
                target: WORKER_TARGET,
                worker = id,
                pid = child.as_raw(),
                "worker process forked"
            );
            Ok(Unit::Process { id, pid: child })
        }
        Ok(ForkResult::Child) => run_child(&worker, inherited_fds),
        Err(source) => Err(WorkerError::Fork { id, source }),
    }
}

fn run_child(worker: &Worker, inherited_fds: &[RawFd]) -> ! {
    for fd in inherited_fds {
        if let Err(error) = close(*fd) {
            warn!(target: WORKER_TARGET, fd, error = %error, "failed to close inherited descriptor");
        }
    }
    let flag = worker.record().flag();
    for signal in TERMINATION_SIGNALS {
        if let Err(error) = signal_hook::flag::register(signal, Arc::clone(&flag)) {
            warn!(
                target: WORKER_TARGET,
                signal,
                error = %error,
                "failed to install worker signal handler"
            );
        }
    }
    request_parent_death_signal();
    // The parent may have exited before the request was registered.
    worker.check_parent();
    let code = match panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
        Ok(()) => 0,
        Err(_) => CHILD_PANIC_EXIT,
    };
    std::process::exit(code)
}

/// Asks the kernel to send SIGTERM when the forking thread exits.
#[cfg(target_os = "linux")]
fn request_parent_death_signal() {
    if let Err(error) = nix::sys::prctl::set_pdeathsig(Signal::SIGTERM) {
        warn!(target: WORKER_TARGET, error = %error, "failed to request parent-death signal");
    }
}

#[cfg(not(target_os = "linux"))]
const fn request_parent_death_signal() {}

fn request_stop(unit: &Unit) {
    match unit {
        Unit::Thread { record, .. } => record.request_shutdown(),
        Unit::Process { id, pid } => match kill(*pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(error) => warn!(
                target: WORKER_TARGET,
                worker = id,
                error = %error,
                "failed to signal worker"
            ),
        },
    }
}

fn wait_for_unit(unit: Unit, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    match unit {
        Unit::Thread { handle, record, .. } => {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    return false;
                }
                thread::sleep(REAP_INTERVAL);
            }
            if handle.join().is_err() {
                warn!(target: WORKER_TARGET, worker = record.id(), "worker thread panicked");
            }
            true
        }
        Unit::Process { id, pid } => {
            loop {
                match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                    Ok(WaitStatus::StillAlive) => {}
                    Ok(status) => {
                        info!(target: WORKER_TARGET, worker = id, ?status, "worker process exited");
                        return true;
                    }
                    Err(Errno::ECHILD) => return true,
                    Err(Errno::EINTR) => continue,
                    Err(error) => {
                        warn!(target: WORKER_TARGET, worker = id, error = %error, "failed to poll worker");
                        break;
                    }
                }
                if Instant::now() >= deadline {
                    break;
                }
                thread::sleep(REAP_INTERVAL);
            }
            kill_and_reap(id, pid);
            false
        }
    }
}

fn kill_and_reap(id: usize, pid: Pid) {
    match kill(pid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(error) => {
            warn!(target: WORKER_TARGET, worker = id, error = %error, "failed to kill worker");
            return;
        }
    }
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => {}
            Ok(_) | Err(_) => break,
        }
    }
}
