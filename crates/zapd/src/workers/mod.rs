//! Worker units that pull connections from the handoff queue and serve them.
//!
//! A [`WorkerPool`] owns a fixed number of units. Each unit polls the shared
//! [`crate::handoff::HandoffQueue`], serves at most one connection per poll
//! through a [`RequestHandler`], and sleeps for its poll interval whenever the
//! queue is empty. Units only exit after shutdown has been requested and the
//! queue is found empty, so queued connections are drained first.

mod errors;
mod handler;
mod pool;
mod unit;

pub use self::errors::{ConnectionError, HandlerError, WorkerError};
#[cfg(test)]
pub(crate) use self::handler::MockRequestHandler;
pub use self::handler::RequestHandler;
pub use self::pool::{PoolOptions, ShutdownReport, WorkerPool};
pub use self::unit::{PollOutcome, ServeSettings, Worker, WorkerRecord, WorkerStats};

const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::workers");
