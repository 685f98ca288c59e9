//! Capability interfaces an execution engine can provide.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use super::EnvironmentError;

/// Where loadable content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Content read from a file on disk.
    File(PathBuf),
    /// Content supplied directly.
    Inline(Vec<u8>),
}

impl Source {
    /// Picks a source from optional parts, preferring the file.
    ///
    /// Empty inline data counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::NoSource`] when neither part is usable.
    pub fn from_parts(
        file: Option<PathBuf>,
        data: Option<Vec<u8>>,
    ) -> Result<Self, EnvironmentError> {
        match (file, data) {
            (Some(path), _) => Ok(Self::File(path)),
            (None, Some(bytes)) if !bytes.is_empty() => Ok(Self::Inline(bytes)),
            _ => Err(EnvironmentError::NoSource),
        }
    }

    /// Reads the content, enforcing that it is non-empty.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, when it is empty, or when inline
    /// data is empty.
    pub fn read(&self) -> Result<Vec<u8>, EnvironmentError> {
        match self {
            Self::File(path) => read_module(path),
            Self::Inline(bytes) if bytes.is_empty() => Err(EnvironmentError::NoSource),
            Self::Inline(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Inline(bytes) => write!(f, "inline:{} bytes", bytes.len()),
        }
    }
}

fn read_module(path: &Path) -> Result<Vec<u8>, EnvironmentError> {
    let bytes = fs::read(path).map_err(|source| EnvironmentError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(EnvironmentError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    Ok(bytes)
}

/// Accepts program text.
pub trait Loadable {
    /// Loads `source` into the engine.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is unusable or the engine rejects it.
    fn load(&mut self, source: &Source) -> Result<(), EnvironmentError>;
}

/// Runs named entry points.
pub trait Executable {
    /// Executes `entry` with `input`, returning any output it produces.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry point is unknown or fails.
    fn execute(&self, entry: &str, input: &[u8]) -> Result<Option<Vec<u8>>, EnvironmentError>;
}

/// Accepts initial facts.
pub trait FactSource {
    /// Loads facts from `source`, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is unusable or the facts are rejected.
    fn load_facts(&mut self, source: &Source) -> Result<usize, EnvironmentError>;
}

/// An engine offering every capability the environment composes.
pub trait Engine: Loadable + Executable + FactSource + Send + Sync + 'static {}

impl<T> Engine for T where T: Loadable + Executable + FactSource + Send + Sync + 'static {}
