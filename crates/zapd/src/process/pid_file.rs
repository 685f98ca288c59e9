//! The PID file that records the running daemon.
//!
//! The file holds the decimal PID followed by a newline. It is written
//! atomically with mode 0600 and removed when the daemon shuts down cleanly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LifecycleError;
use super::files::atomic_write;

/// Errors raised while reading a PID file.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// The file exists but could not be read.
    #[error("failed to read pid file '{path}': {source}")]
    Read {
        /// PID file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file does not hold a usable PID.
    #[error("pid file '{path}' does not contain a valid pid: {content:?}")]
    Parse {
        /// PID file path.
        path: PathBuf,
        /// Trimmed file contents.
        content: String,
    },
}

/// Location of the daemon's PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Refers to the PID file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recorded PID; `Ok(None)` when the file does not exist.
    ///
    /// PIDs outside `1..=i32::MAX` are rejected because they would address a
    /// process group rather than a single process.
    pub fn read(&self) -> Result<Option<u32>, PidFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidFileError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let trimmed = content.trim();
        trimmed
            .parse::<u32>()
            .ok()
            .filter(|pid| *pid != 0 && i32::try_from(*pid).is_ok())
            .map(Some)
            .ok_or_else(|| PidFileError::Parse {
                path: self.path.clone(),
                content: trimmed.to_owned(),
            })
    }

    /// Atomically records `pid`.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        atomic_write(&self.path, format!("{pid}\n").as_bytes())
    }

    /// Removes the file; a missing file is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
            _ => Ok(()),
        }
    }
}

/// Removes the PID file when dropped, provided it still names this process.
#[derive(Debug)]
pub(crate) struct PidFileGuard {
    file: PidFile,
    pid: u32,
}

impl PidFileGuard {
    pub(crate) fn write(file: PidFile, pid: u32) -> Result<Self, LifecycleError> {
        file.write(pid).map_err(|source| LifecycleError::PidWrite {
            path: file.path().to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %file.path().display(),
            "pid file written"
        );
        Ok(Self { file, pid })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match self.file.read() {
            Ok(Some(recorded)) if recorded == self.pid => {}
            Ok(_) | Err(_) => return,
        }
        if let Err(error) = self.file.remove() {
            warn!(
                target: PROCESS_TARGET,
                file = %self.file.path().display(),
                error = %error,
                "failed to remove pid file"
            );
        }
    }
}
