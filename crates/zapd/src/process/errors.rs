//! Defines the error surface for daemon start-up and supervision.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;
use zap_config::ConfigValidationError;

use crate::environment::EnvironmentError;
use crate::handoff::HandoffError;
use crate::transport::{BindError, ListenerError};
use crate::workers::WorkerError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;
use super::signaller::StopSignal;

/// Configuration problems detected while starting the daemon.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The run-as user does not exist.
    #[error("unknown user '{user}'")]
    UnknownUser {
        /// Requested user name.
        user: String,
    },
    /// The run-as group does not exist.
    #[error("unknown group '{group}'")]
    UnknownGroup {
        /// Requested group name.
        group: String,
    },
    /// The account database could not be queried.
    #[error("failed to look up account '{name}': {source}")]
    Lookup {
        /// User or group name being resolved.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A tuning value is unusable.
    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),
}

/// Errors raised while starting, supervising or stopping the daemon.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A live daemon already owns the PID file.
    #[error("daemon already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the existing PID file.
        pid: u32,
    },
    /// The PID file could not be written.
    #[error("failed to write pid file '{path}': {source}")]
    PidWrite {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the recorded process failed.
    #[error("failed to probe process {pid}: {source}")]
    CheckProcess {
        /// Process being probed.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// A termination signal could not be delivered.
    #[error("failed to send {signal} to process {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Signal being sent.
        signal: StopSignal,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// Every termination attempt was made and the process is still alive.
    #[error("process {pid} survived {attempts} termination attempts")]
    EscalationExhausted {
        /// Target process.
        pid: u32,
        /// Signals sent before giving up.
        attempts: u32,
    },
    /// Detaching from the terminal or entering the run-as account failed.
    #[error(transparent)]
    Daemonize(#[from] DaemonizeError),
    /// Waiting for termination signals failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// The handoff queue could not be created.
    #[error("failed to create handoff queue: {source}")]
    Handoff {
        /// Underlying queue error.
        #[source]
        source: HandoffError,
    },
    /// The worker pool could not be started.
    #[error("failed to start worker pool: {source}")]
    Workers {
        /// Underlying pool error.
        #[source]
        source: WorkerError,
    },
    /// The accept loop could not start or stopped on a fatal error.
    #[error("listener failed: {source}")]
    ListenerFailed {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

/// Errors returned by `start` and `restart`.
#[derive(Debug, Error)]
pub enum StartError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The listener could not bind its endpoint.
    #[error(transparent)]
    Bind(#[from] BindError),
    /// Any other lifecycle failure.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The request handler could not be built.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

impl From<ConfigValidationError> for StartError {
    fn from(error: ConfigValidationError) -> Self {
        Self::Config(ConfigError::Invalid(error))
    }
}
