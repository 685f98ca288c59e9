use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading sources into, or executing within, the
/// request environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// A load was requested with neither a file nor inline data.
    #[error("nothing to load: neither a file nor inline data was supplied")]
    NoSource,
    /// The named file could not be read.
    #[error("file {path} not found or not accessible: {source}")]
    Unreadable {
        /// File that was requested.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The named file exists but is empty.
    #[error("file {path} is empty")]
    EmptyFile {
        /// File that was requested.
        path: PathBuf,
    },
    /// The module directory exists but could not be listed.
    #[error("failed to scan module directory {path}: {source}")]
    Catalog {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Execution was requested for an entry point the engine does not know.
    #[error("unknown entry point '{name}'")]
    UnknownEntryPoint {
        /// Requested entry point.
        name: String,
    },
    /// The engine failed while executing an entry point.
    #[error("entry point '{name}' failed: {message}")]
    Execution {
        /// Entry point that failed.
        name: String,
        /// Description reported by the engine.
        message: String,
    },
}
