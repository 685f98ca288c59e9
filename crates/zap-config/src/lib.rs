//! Shared configuration for the ZAP daemon.
//!
//! [`Config`] is parsed once from the command line (with `ZAP_*` environment
//! fallbacks) and then passed by reference to every component that needs it.
//! Nothing in the daemon reads arguments or environment variables after
//! start-up.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, Parser};
use thiserror::Error;

mod defaults;
mod logging;
mod socket;
mod tuning;

pub use defaults::*;
pub use logging::{LogDestination, LogFormat, LogFormatParseError, Verbosity};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};
pub use tuning::{QueuePolicy, WorkerIsolation};

/// Lifecycle action selected with `--cmd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonCommand {
    /// Print usage and exit.
    Help,
    /// Start the daemon.
    Start,
    /// Stop a running daemon.
    Stop,
    /// Stop, then start again.
    Restart,
    /// Anything else; treated as a usage error.
    Unknown(String),
}

impl DaemonCommand {
    fn parse(input: &str) -> Self {
        match input.to_ascii_lowercase().as_str() {
            "help" => Self::Help,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "restart" => Self::Restart,
            _ => Self::Unknown(input.to_owned()),
        }
    }
}

/// Errors raised when parsed values are individually valid but unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// The pool needs at least one worker.
    #[error("at least one worker is required")]
    ZeroWorkers,
    /// Workers must read at least one byte per request.
    #[error("--read-bytes must be greater than zero")]
    ZeroReadBytes,
    /// A zero poll interval would spin on an empty queue.
    #[error("--poll-interval-ms must be greater than zero")]
    ZeroPollInterval,
}

/// Command-line configuration for the daemon.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "zapd",
    version,
    about = "ZAP - Zabbix Application Proxy daemon"
)]
pub struct Config {
    /// Path to the configuration directory.
    #[arg(long = "config", short = 'c', env = "ZAP_CONFIG", default_value = ".")]
    config_dir: PathBuf,
    /// Path to the log file, or `-` for stderr.
    #[arg(long, short = 'l', env = "ZAP_LOG", default_value = DEFAULT_LOG_PATH)]
    log: LogDestination,
    /// Log record format.
    #[arg(long, env = "ZAP_LOG_FORMAT", default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
    /// Verbosity level; repeat up to five times.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
    /// Command to execute: start, stop, restart or help.
    #[arg(long, short = 'C', env = "ZAP_CMD", default_value = "help")]
    cmd: String,
    /// Detach from the controlling terminal and run as a Unix daemon.
    #[arg(long, short = 'd', env = "ZAP_DAEMONIZE")]
    daemonize: bool,
    /// Path to the PID file.
    #[arg(long, short = 'P', env = "ZAP_PID", default_value = DEFAULT_PID_PATH)]
    pid: PathBuf,
    /// User the daemon runs as.
    #[arg(long, short = 'U', env = "ZAP_USER", default_value = DEFAULT_ACCOUNT)]
    user: String,
    /// Group the daemon runs as.
    #[arg(long, short = 'G', env = "ZAP_GROUP", default_value = DEFAULT_ACCOUNT)]
    group: String,
    /// Name of the rule environment bootstrap file.
    #[arg(long, short = 'b', env = "ZAP_BOOTSTRAP", default_value = DEFAULT_BOOTSTRAP)]
    bootstrap: String,
    /// Name of the rule environment configuration file.
    #[arg(
        long,
        short = 'f',
        env = "ZAP_CONFIGURATION",
        default_value = DEFAULT_CONFIGURATION
    )]
    configuration: String,
    /// Listening endpoint, for example `tcp://0.0.0.0:10052` or `unix:///run/zapd.sock`.
    #[arg(long, env = "ZAP_LISTEN", default_value = DEFAULT_LISTEN)]
    listen: SocketEndpoint,
    /// Number of worker units.
    #[arg(long, env = "ZAP_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: u16,
    /// How worker units are isolated.
    #[arg(long, value_enum, env = "ZAP_WORKER_ISOLATION", default_value_t = WorkerIsolation::Process)]
    worker_isolation: WorkerIsolation,
    /// Sleep between polls of an empty queue, in milliseconds.
    #[arg(long, env = "ZAP_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,
    /// Bytes read from each connection before the request handler runs.
    #[arg(long, env = "ZAP_READ_BYTES", default_value_t = DEFAULT_READ_BYTES)]
    read_bytes: usize,
    /// Read timeout for handed-off connections, in milliseconds.
    #[arg(long, env = "ZAP_READ_TIMEOUT_MS", default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    read_timeout_ms: u64,
    /// What the listener does when the handoff queue is full.
    #[arg(long, value_enum, env = "ZAP_QUEUE_POLICY", default_value_t = QueuePolicy::Reject)]
    queue_policy: QueuePolicy,
    /// Send timeout for the blocking queue policy, in milliseconds.
    #[arg(long, env = "ZAP_QUEUE_TIMEOUT_MS", default_value_t = DEFAULT_QUEUE_TIMEOUT_MS)]
    queue_timeout_ms: u64,
    /// Kernel send buffer for the handoff queue, in bytes.
    #[arg(long, env = "ZAP_QUEUE_BUFFER_BYTES")]
    queue_buffer_bytes: Option<usize>,
    /// Grace period for each worker during shutdown, in milliseconds.
    #[arg(
        long,
        env = "ZAP_WORKER_SHUTDOWN_TIMEOUT_MS",
        default_value_t = DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS
    )]
    worker_shutdown_timeout_ms: u64,
}

impl Config {
    /// Parses configuration from the process arguments and environment.
    pub fn load() -> Result<Self, clap::Error> {
        Self::try_parse()
    }

    /// Parses configuration from an explicit argument list.
    ///
    /// The first item is treated as the program name.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Rejects values that parse but cannot drive the daemon.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.workers == 0 {
            return Err(ConfigValidationError::ZeroWorkers);
        }
        if self.read_bytes == 0 {
            return Err(ConfigValidationError::ZeroReadBytes);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigValidationError::ZeroPollInterval);
        }
        Ok(())
    }

    /// Renders the long usage text.
    #[must_use]
    pub fn usage() -> String {
        Self::command().render_long_help().to_string()
    }

    /// Lifecycle action requested with `--cmd`.
    #[must_use]
    pub fn action(&self) -> DaemonCommand {
        DaemonCommand::parse(&self.cmd)
    }

    /// Configuration directory handed to the rule environment.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        self.config_dir.as_path()
    }

    /// Log sink selection.
    #[must_use]
    pub const fn log_destination(&self) -> &LogDestination {
        &self.log
    }

    /// Log record format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Severity threshold derived from the `-v` count.
    #[must_use]
    pub const fn verbosity(&self) -> Verbosity {
        Verbosity::from_count(self.verbose)
    }

    /// Whether the daemon detaches from its controlling terminal.
    #[must_use]
    pub const fn daemonize(&self) -> bool {
        self.daemonize
    }

    /// PID file location.
    #[must_use]
    pub fn pid_path(&self) -> &Path {
        self.pid.as_path()
    }

    /// Run-as user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Run-as group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Bootstrap file path, resolved against the configuration directory.
    #[must_use]
    pub fn bootstrap_path(&self) -> PathBuf {
        self.config_dir.join(&self.bootstrap)
    }

    /// Configuration file path, resolved against the configuration directory.
    #[must_use]
    pub fn configuration_path(&self) -> PathBuf {
        self.config_dir.join(&self.configuration)
    }

    /// Directory scanned for environment modules.
    #[must_use]
    pub fn module_dir(&self) -> PathBuf {
        self.config_dir.join(MODULE_DIRECTORY)
    }

    /// Listening endpoint.
    #[must_use]
    pub const fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Number of worker units.
    #[must_use]
    pub const fn workers(&self) -> u16 {
        self.workers
    }

    /// Worker isolation mode.
    #[must_use]
    pub const fn worker_isolation(&self) -> WorkerIsolation {
        self.worker_isolation
    }

    /// Sleep between polls of an empty queue.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bytes read from each connection.
    #[must_use]
    pub const fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    /// Read timeout for handed-off connections.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Queue backpressure policy.
    #[must_use]
    pub const fn queue_policy(&self) -> QueuePolicy {
        self.queue_policy
    }

    /// Send timeout used by [`QueuePolicy::Block`].
    #[must_use]
    pub const fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Optional kernel send buffer size for the handoff queue.
    #[must_use]
    pub const fn queue_buffer_bytes(&self) -> Option<usize> {
        self.queue_buffer_bytes
    }

    /// Grace period granted to each worker during shutdown.
    #[must_use]
    pub const fn worker_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_shutdown_timeout_ms)
    }
}
