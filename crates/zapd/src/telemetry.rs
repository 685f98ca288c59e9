//! Structured telemetry initialisation for the daemon.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use zap_config::{Config, LogDestination, LogFormat};

static TELEMETRY_SINK: OnceCell<Sink> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

impl TelemetryHandle {
    /// Flushes buffered log output to its destination.
    ///
    /// Called before the process exits; failures are ignored because there is
    /// nowhere left to report them.
    pub fn flush(self) {
        if let Some(sink) = TELEMETRY_SINK.get() {
            sink.flush();
        }
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to open the log file.
    #[error("failed to open log file {path}: {source}")]
    Open {
        /// Log file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

#[derive(Debug)]
enum Sink {
    Stderr,
    File(Arc<File>),
}

impl Sink {
    fn open(destination: &LogDestination) -> Result<Self, TelemetryError> {
        match destination {
            LogDestination::Stderr => Ok(Self::Stderr),
            LogDestination::File(path) => open_append(path).map(|file| Self::File(Arc::new(file))),
        }
    }

    fn make_writer(&self) -> BoxMakeWriter {
        match self {
            Self::Stderr => BoxMakeWriter::new(io::stderr),
            Self::File(file) => BoxMakeWriter::new(Arc::clone(file)),
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Stderr) && io::stderr().is_terminal()
    }

    fn flush(&self) {
        match self {
            Self::Stderr => {
                let _flushed = io::stderr().flush();
            }
            Self::File(file) => {
                let _synced = file.sync_data();
            }
        }
    }
}

fn open_append(path: &Path) -> Result<File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Records go to the configured log file (opened for append) or to stderr,
/// filtered at the level selected by the `-v` count. Repeated calls are
/// idempotent: the first invocation installs the global subscriber and later
/// invocations return a fresh [`TelemetryHandle`] without touching the global
/// state again.
///
/// # Errors
///
/// Fails when the log file cannot be opened or a subscriber is already
/// installed by someone else.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_SINK
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<Sink, TelemetryError> {
    let filter = EnvFilter::try_new(config.verbosity().filter_directive())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let sink = Sink::open(config.log_destination())?;

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(sink.make_writer())
        .with_ansi(sink.is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn file_sink_appends_to_existing_log() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("zap_proxy.log");
        fs::write(&path, "earlier\n").expect("seed log");

        let sink = Sink::open(&LogDestination::File(path.clone())).expect("open sink");
        let Sink::File(file) = &sink else {
            panic!("expected a file sink");
        };
        (&**file).write_all(b"later\n").expect("append");
        sink.flush();

        assert_eq!(fs::read_to_string(&path).expect("read log"), "earlier\nlater\n");
    }

    #[rstest]
    fn unopenable_log_path_is_reported() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing").join("zap_proxy.log");
        let error = Sink::open(&LogDestination::File(path)).expect_err("open should fail");
        assert!(matches!(error, TelemetryError::Open { .. }));
    }

    #[rstest]
    fn dash_writes_to_stderr() {
        let sink = Sink::open(&LogDestination::Stderr).expect("stderr sink");
        assert!(matches!(sink, Sink::Stderr));
    }
}
