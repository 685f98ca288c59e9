//! Error types for socket listener operations.

use std::io;
use std::net::SocketAddr;

use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced while binding the passive socket.
///
/// Binding happens before daemonisation, so any of these aborts start-up
/// before a PID file is written.
#[derive(Debug, Error)]
pub enum BindError {
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host being resolved.
        host: String,
        /// Port being resolved.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no usable address.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host being resolved.
        host: String,
        /// Port being resolved.
        port: u16,
    },
    /// The TCP socket could not be bound.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address the bind targeted.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The Unix socket could not be bound.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Another process is accepting on the Unix socket.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// The Unix socket path is occupied by something other than a socket.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: String,
    },
    /// The Unix socket path could not be inspected.
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// Probing an existing Unix socket failed unexpectedly.
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A stale Unix socket file could not be removed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The parent directory of the Unix socket could not be prepared.
    #[error("failed to prepare unix socket directory: {source}")]
    Prepare {
        /// Underlying preparation error.
        #[source]
        source: zap_config::SocketPreparationError,
    },
}

/// Errors surfaced while running the accept loop.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The accept thread could not be started.
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// `accept` failed in a way that retrying cannot fix.
    #[error("fatal accept error on {endpoint}: {source}")]
    Accept {
        /// Endpoint the listener was bound to.
        endpoint: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
