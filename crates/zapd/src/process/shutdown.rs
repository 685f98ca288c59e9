use std::fmt;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;

/// Signals that end a running daemon.
pub(crate) const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Abstraction over shutdown notification mechanisms.
///
/// [`Supervisor::start`](super::Supervisor::start) calls
/// [`install`](Self::install) once worker processes are forked and before the
/// PID file is written; [`Supervisor::serve`](super::Supervisor::serve) later
/// calls [`wait`](Self::wait) on the installed signal.
pub trait ShutdownSignal: Send + 'static {
    /// Registers for notification.
    fn install(&mut self) -> Result<(), ShutdownError> {
        Ok(())
    }

    /// Blocks until shutdown should proceed.
    fn wait(self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
///
/// Handlers are registered by [`ShutdownSignal::install`]. Signals delivered
/// between installation and [`ShutdownSignal::wait`] are queued and end the
/// wait immediately.
#[derive(Default)]
pub struct SystemShutdownSignal {
    signals: Option<Signals>,
}

impl SystemShutdownSignal {
    /// A listener with no handlers registered yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { signals: None }
    }

    /// Whether handlers are registered.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.signals.is_some()
    }
}

impl fmt::Debug for SystemShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemShutdownSignal")
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&mut self) -> Result<(), ShutdownError> {
        if self.signals.is_none() {
            let signals = Signals::new(TERMINATION_SIGNALS)
                .map_err(|source| ShutdownError::Install { source })?;
            debug!(target: PROCESS_TARGET, "termination handlers installed");
            self.signals = Some(signals);
        }
        Ok(())
    }

    fn wait(mut self) -> Result<(), ShutdownError> {
        self.install()?;
        let Some(mut signals) = self.signals.take() else {
            return Ok(());
        };
        if let Some(signal) = signals.forever().next() {
            info!(
                target: PROCESS_TARGET,
                signal,
                "shutdown signal received"
            );
        }
        Ok(())
    }
}
