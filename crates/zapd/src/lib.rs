//! The ZAP daemon: a lifecycle supervisor in front of a descriptor-handoff
//! worker pool.
//!
//! A single [`transport::SocketListener`] accepts connections and pushes each
//! one, as an open descriptor, onto a [`handoff::HandoffQueue`]. A fixed
//! [`workers::WorkerPool`] polls that queue; exactly one unit receives each
//! connection, reads one request from it and passes the bytes to the
//! [`workers::RequestHandler`] supplied by the [`environment::Environment`].
//!
//! The [`process::Supervisor`] owns the lifecycle around that pipeline:
//!
//! 1. **start** resolves the run-as account, binds the listener, detaches
//!    (unless running in the foreground), spawns the workers, installs the
//!    termination handlers and only then writes the PID file;
//! 2. **stop** signals the process named in the PID file, escalating from
//!    `SIGTERM` to `SIGKILL` on a [`process::StopSchedule`];
//! 3. **restart** stops and, only if that succeeded, starts again.
//!
//! [`run`] wires these together behind the `--cmd` flag.

mod cli;
pub mod environment;
pub mod handoff;
pub mod process;
mod telemetry;
pub mod transport;
pub mod workers;

pub use cli::run;
pub use environment::{Environment, EnvironmentError};
pub use handoff::{ConnectionHandle, HandoffQueue};
pub use process::{
    ConfigError, DaemonPhase, LifecycleError, StartError, StopOutcome, Supervisor,
};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::{BindError, SocketListener};
pub use workers::{HandlerError, RequestHandler, WorkerPool};

#[cfg(test)]
mod tests;
