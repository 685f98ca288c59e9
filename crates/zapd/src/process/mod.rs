//! Process supervision: start-up, PID file tracking and escalating stop.

mod account;
mod daemonizer;
mod errors;
mod files;
mod pid_file;
mod shutdown;
mod signaller;
mod stop;
mod supervisor;

pub use self::account::RunAs;
pub use self::daemonizer::{DaemonizeError, Daemonizer, LaunchMode, SystemDaemonizer};
pub use self::errors::{ConfigError, LifecycleError, StartError};
pub use self::pid_file::{PidFile, PidFileError};
pub use self::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};
#[cfg(test)]
pub(crate) use self::signaller::MockProcessSignaller;
pub use self::signaller::{ProcessSignaller, StopSignal, SystemSignaller};
pub use self::stop::{EscalationStep, StopSchedule};
pub use self::supervisor::{DaemonHandle, DaemonPhase, DaemonState, StopOutcome, Supervisor};

pub(crate) use self::shutdown::TERMINATION_SIGNALS;

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
