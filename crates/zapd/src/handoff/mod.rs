//! Descriptor handoff between the listener and the worker pool.

mod errors;
mod handle;
mod queue;
#[cfg(test)]
mod queue_tests;

pub use self::errors::{HandoffError, PushError};
pub use self::handle::ConnectionHandle;
pub use self::queue::{HandoffQueue, QueueOptions};

const HANDOFF_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handoff");
