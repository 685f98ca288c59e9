//! Error types for the worker pool.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while spawning or stopping worker units.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `fork(2)` failed for a process unit.
    #[error("failed to fork worker {id}: {source}")]
    Fork {
        /// Identifier of the unit being spawned.
        id: usize,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The thread backing a thread unit could not be started.
    #[error("failed to spawn worker thread {id}: {source}")]
    Spawn {
        /// Identifier of the unit being spawned.
        id: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The pool was asked for zero units.
    #[error("worker pool needs at least one worker")]
    Empty,
}

/// Failure while serving one connection.
///
/// These never stop a worker; they are logged and the connection is closed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Applying the read timeout failed.
    #[error("failed to configure connection: {source}")]
    Configure {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Reading the request failed or timed out.
    #[error("failed to read request: {source}")]
    Read {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Writing the response failed.
    #[error("failed to write response: {source}")]
    Write {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The request handler reported an error.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The request handler panicked.
    #[error("request handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Error returned by a [`crate::workers::RequestHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler refused the request.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Human-readable reason.
        reason: String,
    },
    /// The execution environment failed while handling the request.
    #[error("environment failure: {source}")]
    Environment {
        /// Underlying environment error.
        #[source]
        source: crate::environment::EnvironmentError,
    },
}
