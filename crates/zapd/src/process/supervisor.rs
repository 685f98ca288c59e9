//! Daemon lifecycle: start, serve, shutdown, stop and restart.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use nix::errno::Errno;
use tracing::{debug, error, info, warn};
use zap_config::Config;

use crate::environment::EnvironmentError;
use crate::handoff::{HandoffQueue, QueueOptions};
use crate::transport::{ListenerHandle, ListenerStats, SocketListener};
use crate::workers::{PoolOptions, RequestHandler, ShutdownReport, WorkerPool};

use super::PROCESS_TARGET;
use super::account::RunAs;
use super::daemonizer::{Daemonizer, LaunchMode, SystemDaemonizer};
use super::errors::{LifecycleError, StartError};
use super::pid_file::{PidFile, PidFileGuard};
use super::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
use super::signaller::{ProcessSignaller, SystemSignaller};
use super::stop::StopSchedule;

/// Lifecycle phase of the supervised daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DaemonPhase {
    /// Nothing is running under this supervisor.
    #[default]
    Stopped,
    /// `start` is in progress.
    Starting,
    /// The daemon is serving connections.
    Running,
    /// Shutdown or `stop` is in progress.
    Stopping,
    /// `stop` gave up; manual intervention is required.
    Failed,
}

/// State owned by the supervisor and changed only by its methods.
#[derive(Debug, Clone)]
pub struct DaemonState {
    pid: Option<u32>,
    pid_file: PidFile,
    phase: DaemonPhase,
}

impl DaemonState {
    /// PID of the daemon this supervisor started or stopped last.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The PID file.
    #[must_use]
    pub const fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> DaemonPhase {
        self.phase
    }
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live daemon was recorded; no signal was sent.
    NotRunning,
    /// The daemon exited.
    Stopped {
        /// PID that was stopped.
        pid: u32,
        /// Signals delivered before it exited.
        signals_sent: u32,
    },
}

enum DaemonEvent {
    ShutdownRequested(Result<(), ShutdownError>),
    ListenerFailed,
}

/// A daemon started by [`Supervisor::start`].
///
/// Dropping the handle stops the listener and workers and removes the PID
/// file, but [`Supervisor::shutdown`] also reports the outcome.
pub struct DaemonHandle<S = SystemShutdownSignal> {
    listener: ListenerHandle,
    pool: WorkerPool,
    local_addr: Option<SocketAddr>,
    pid_guard: PidFileGuard,
    shutdown: S,
    events: Sender<DaemonEvent>,
    inbox: Receiver<DaemonEvent>,
}

impl<S> DaemonHandle<S> {
    /// Bound TCP address of the listener; `None` for Unix endpoints.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Accept loop counters.
    #[must_use]
    pub fn listener_stats(&self) -> &ListenerStats {
        self.listener.stats()
    }

    /// The running worker pool.
    #[must_use]
    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn split_shutdown(self) -> (S, DaemonHandle<()>) {
        let Self {
            listener,
            pool,
            local_addr,
            pid_guard,
            shutdown,
            events,
            inbox,
        } = self;
        let handle = DaemonHandle {
            listener,
            pool,
            local_addr,
            pid_guard,
            shutdown: (),
            events,
            inbox,
        };
        (shutdown, handle)
    }
}

impl<S> fmt::Debug for DaemonHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonHandle")
            .field("local_addr", &self.local_addr)
            .field("workers", &self.pool.len())
            .finish_non_exhaustive()
    }
}

/// Supervises the daemon process through its PID file.
pub struct Supervisor<D = SystemDaemonizer, P = SystemSignaller> {
    state: DaemonState,
    daemonizer: D,
    signaller: P,
    schedule: StopSchedule,
}

impl Supervisor {
    /// Supervisor using the system daemoniser, `kill(2)` and the default
    /// termination schedule.
    #[must_use]
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self::with_collaborators(
            pid_path,
            SystemDaemonizer::new(),
            SystemSignaller,
            StopSchedule::default(),
        )
    }
}

impl<D, P> Supervisor<D, P>
where
    D: Daemonizer,
    P: ProcessSignaller,
{
    /// Supervisor with injected collaborators.
    pub fn with_collaborators(
        pid_path: impl Into<PathBuf>,
        daemonizer: D,
        signaller: P,
        schedule: StopSchedule,
    ) -> Self {
        // Foreground start-up changes directory, so relative paths are pinned
        // to the invoking directory.
        let requested: PathBuf = pid_path.into();
        let pinned = std::path::absolute(&requested).unwrap_or(requested);
        Self {
            state: DaemonState {
                pid: None,
                pid_file: PidFile::new(pinned),
                phase: DaemonPhase::Stopped,
            },
            daemonizer,
            signaller,
            schedule,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &DaemonState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> DaemonPhase {
        self.state.phase
    }

    /// Starts the daemon in this process.
    ///
    /// The listener is bound before detaching, so a bind failure is reported
    /// to the invoking terminal and no PID file is ever written. `shutdown` is
    /// installed after the workers are forked and before the PID file exists.
    /// On any failure the phase returns to [`DaemonPhase::Stopped`].
    pub fn start<S>(
        &mut self,
        config: &Config,
        handler: Arc<dyn RequestHandler>,
        shutdown: S,
    ) -> Result<DaemonHandle<S>, StartError>
    where
        S: ShutdownSignal,
    {
        self.state.phase = DaemonPhase::Starting;
        info!(
            target: PROCESS_TARGET,
            listen = %config.listen(),
            pid_file = %self.state.pid_file.path().display(),
            "starting daemon"
        );
        match self.start_inner(config, &handler, shutdown) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                self.state.phase = DaemonPhase::Stopped;
                self.state.pid = None;
                error!(target: PROCESS_TARGET, error = %error, "daemon start failed");
                Err(error)
            }
        }
    }

    fn start_inner<S>(
        &mut self,
        config: &Config,
        handler: &Arc<dyn RequestHandler>,
        mut shutdown: S,
    ) -> Result<DaemonHandle<S>, StartError>
    where
        S: ShutdownSignal,
    {
        config.validate()?;
        if let Some(pid) = self.is_running() {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: existing daemon alive"
            );
            return Err(LifecycleError::AlreadyRunning { pid }.into());
        }
        let account = RunAs::resolve(config.user(), config.group())?;
        let listener = SocketListener::bind(config.listen())?;
        let local_addr = listener.local_addr();
        let queue = HandoffQueue::new(QueueOptions::from_config(config))
            .map(Arc::new)
            .map_err(|source| LifecycleError::Handoff { source })?;

        self.daemonizer
            .daemonize(LaunchMode::from_flag(config.daemonize()), &account)
            .map_err(LifecycleError::from)?;

        let pool_options =
            PoolOptions::from_config(config).with_inherited_fds(vec![listener.raw_fd()]);
        let pool = WorkerPool::spawn(&pool_options, &queue, handler)
            .map_err(|source| LifecycleError::Workers { source })?;
        // Workers must not inherit the supervisor's handlers, and `stop` must
        // never find a PID file before they exist.
        shutdown.install().map_err(LifecycleError::from)?;

        let pid = std::process::id();
        let pid_guard = PidFileGuard::write(self.state.pid_file.clone(), pid)?;
        self.state.pid = Some(pid);
        self.state.phase = DaemonPhase::Running;

        let (events, inbox) = mpsc::channel();
        let fatal = events.clone();
        let listener_handle = listener
            .start(queue, move |error| {
                error!(target: PROCESS_TARGET, error = %error, "listener stopped unexpectedly");
                if fatal.send(DaemonEvent::ListenerFailed).is_err() {
                    debug!(target: PROCESS_TARGET, "supervisor no longer waiting for events");
                }
            })
            .map_err(|source| LifecycleError::ListenerFailed { source })?;

        info!(target: PROCESS_TARGET, pid, "daemon running");
        Ok(DaemonHandle {
            listener: listener_handle,
            pool,
            local_addr,
            pid_guard,
            shutdown,
            events,
            inbox,
        })
    }

    /// Blocks until the handle's shutdown signal fires or the listener fails,
    /// then shuts down.
    pub fn serve<S>(&mut self, handle: DaemonHandle<S>) -> Result<ShutdownReport, LifecycleError>
    where
        S: ShutdownSignal,
    {
        let (shutdown, handle) = handle.split_shutdown();
        let notify = handle.events.clone();
        let waiter = thread::Builder::new()
            .name("zapd-signals".to_owned())
            .spawn(move || {
                let result = shutdown.wait();
                if notify.send(DaemonEvent::ShutdownRequested(result)).is_err() {
                    debug!(target: PROCESS_TARGET, "shutdown already in progress");
                }
            });
        if let Err(source) = waiter {
            warn!(target: PROCESS_TARGET, error = %source, "failed to spawn signal thread");
            self.shutdown(handle)?;
            return Err(ShutdownError::Install { source }.into());
        }

        let event = handle.inbox.recv();
        match event {
            Ok(DaemonEvent::ShutdownRequested(Ok(()))) | Err(_) => self.shutdown(handle),
            Ok(DaemonEvent::ShutdownRequested(Err(error))) => {
                self.shutdown(handle)?;
                Err(error.into())
            }
            Ok(DaemonEvent::ListenerFailed) => self.shutdown(handle),
        }
    }

    /// Stops the listener, drains and stops the workers and removes the PID
    /// file.
    ///
    /// A fatal listener exit is reported after the rest of the shutdown has
    /// completed.
    pub fn shutdown<S>(
        &mut self,
        handle: DaemonHandle<S>,
    ) -> Result<ShutdownReport, LifecycleError> {
        self.state.phase = DaemonPhase::Stopping;
        info!(target: PROCESS_TARGET, "shutting down daemon");
        let DaemonHandle {
            listener,
            pool,
            pid_guard,
            ..
        } = handle;

        listener.shutdown();
        let listener_result = listener.join();
        let report = pool.shutdown();
        drop(pid_guard);

        self.state.phase = DaemonPhase::Stopped;
        self.state.pid = None;
        info!(
            target: PROCESS_TARGET,
            workers_stopped = report.stopped().len(),
            workers_timed_out = report.timed_out().len(),
            "shutdown sequence completed"
        );
        listener_result.map_err(|source| LifecycleError::ListenerFailed { source })?;
        Ok(report)
    }

    /// Returns the PID of a live daemon recorded in the PID file.
    ///
    /// A PID file naming a dead process is removed. Unreadable files are kept
    /// and reported.
    pub fn is_running(&self) -> Option<u32> {
        let file = &self.state.pid_file;
        let pid = match file.read() {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                debug!(
                    target: PROCESS_TARGET,
                    file = %file.path().display(),
                    "no pid file"
                );
                return None;
            }
            Err(error) => {
                error!(target: PROCESS_TARGET, error = %error, "unable to read pid file");
                return None;
            }
        };
        match self.signaller.is_alive(pid) {
            Ok(true) => Some(pid),
            Ok(false) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    file = %file.path().display(),
                    "removing stale pid file"
                );
                if let Err(error) = file.remove() {
                    error!(target: PROCESS_TARGET, error = %error, "failed to remove stale pid file");
                }
                None
            }
            Err(error) => {
                error!(target: PROCESS_TARGET, pid, error = %error, "failed to probe process");
                None
            }
        }
    }

    /// Stops the daemon recorded in the PID file.
    ///
    /// Signals follow the [`StopSchedule`]; after each one the supervisor waits
    /// the step's interval and returns as soon as the process is gone.
    pub fn stop(&mut self) -> Result<StopOutcome, LifecycleError> {
        let Some(pid) = self.is_running() else {
            info!(target: PROCESS_TARGET, "daemon not running");
            return Ok(StopOutcome::NotRunning);
        };
        self.state.phase = DaemonPhase::Stopping;
        self.state.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            max_attempts = self.schedule.total_attempts(),
            "stopping daemon"
        );

        let attempts: Vec<_> = self.schedule.attempts().collect();
        let mut signals_sent = 0;
        for (signal, interval) in attempts {
            match self.signaller.send(pid, signal) {
                Ok(()) => signals_sent += 1,
                Err(Errno::ESRCH) => return Ok(self.stopped(pid, signals_sent)),
                Err(source) => {
                    self.state.phase = DaemonPhase::Failed;
                    return Err(LifecycleError::Signal {
                        pid,
                        signal,
                        source,
                    });
                }
            }
            debug!(target: PROCESS_TARGET, pid, %signal, attempt = signals_sent, "signal sent");
            thread::sleep(interval);
            match self.signaller.is_alive(pid) {
                Ok(false) => return Ok(self.stopped(pid, signals_sent)),
                Ok(true) => {}
                Err(source) => {
                    self.state.phase = DaemonPhase::Failed;
                    return Err(LifecycleError::CheckProcess { pid, source });
                }
            }
        }

        self.state.phase = DaemonPhase::Failed;
        error!(
            target: PROCESS_TARGET,
            pid,
            attempts = signals_sent,
            "daemon did not stop; manual intervention required"
        );
        Err(LifecycleError::EscalationExhausted {
            pid,
            attempts: signals_sent,
        })
    }

    fn stopped(&mut self, pid: u32, signals_sent: u32) -> StopOutcome {
        let file = &self.state.pid_file;
        if matches!(file.read(), Ok(Some(recorded)) if recorded == pid)
            && let Err(error) = file.remove()
        {
            warn!(target: PROCESS_TARGET, error = %error, "failed to remove pid file");
        }
        self.state.phase = DaemonPhase::Stopped;
        self.state.pid = None;
        info!(target: PROCESS_TARGET, pid, signals_sent, "daemon stopped");
        StopOutcome::Stopped { pid, signals_sent }
    }

    /// Stops any running daemon, then starts a new one.
    ///
    /// If `stop` fails nothing is started. The request handler is built only
    /// once the old daemon is gone, so it sees the files the new one serves.
    pub fn restart<S, F>(
        &mut self,
        config: &Config,
        build_handler: F,
        shutdown: S,
    ) -> Result<DaemonHandle<S>, StartError>
    where
        S: ShutdownSignal,
        F: FnOnce() -> Result<Arc<dyn RequestHandler>, EnvironmentError>,
    {
        info!(target: PROCESS_TARGET, "restarting daemon");
        self.stop()?;
        let handler = build_handler()?;
        self.start(config, handler, shutdown)
    }
}
