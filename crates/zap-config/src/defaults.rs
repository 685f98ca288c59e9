//! Default values shared by the daemon and its tests.

/// Default TCP port the listener binds when no endpoint is configured.
pub const DEFAULT_TCP_PORT: u16 = 10052;

/// Default listener endpoint.
pub const DEFAULT_LISTEN: &str = "tcp://127.0.0.1:10052";

/// Default log file; `-` selects stderr.
pub const DEFAULT_LOG_PATH: &str = "/tmp/zap_proxy.log";

/// Default PID file location.
pub const DEFAULT_PID_PATH: &str = "/tmp/zap_proxy.pid";

/// Default run-as user and group.
pub const DEFAULT_ACCOUNT: &str = "zabbix";

/// Default bootstrap file name consumed by the rule environment.
pub const DEFAULT_BOOTSTRAP: &str = "bootstrap.clp";

/// Default configuration file name consumed by the rule environment.
pub const DEFAULT_CONFIGURATION: &str = "configuration.clp";

/// Default number of worker units.
pub const DEFAULT_WORKERS: u16 = 4;

/// Default sleep between empty queue polls, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default size of the single request read, in bytes.
pub const DEFAULT_READ_BYTES: usize = 1_024;

/// Default read timeout applied to handed-off connections, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Default send timeout used by the blocking queue policy, in milliseconds.
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 250;

/// Default grace period granted to each worker during shutdown, in milliseconds.
pub const DEFAULT_WORKER_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Name of the module directory beneath the configuration directory.
pub const MODULE_DIRECTORY: &str = "zap_modules";
