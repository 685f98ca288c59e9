//! Socket listener for the daemon's front-end endpoint.
//!
//! The transport module binds the configured endpoint, accepts connections on
//! a background thread and hands each one to the [`crate::handoff`] queue.

mod errors;
mod listener;
#[cfg(test)]
mod listener_tests;
mod stream;

pub use self::errors::{BindError, ListenerError};
pub use self::listener::{ListenerHandle, ListenerStats, SocketListener};
pub use self::stream::{ConnectionStream, Transport};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
