use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
}

/// Errors encountered while parsing a [`LogFormat`] from text.
pub type LogFormatParseError = strum::ParseError;

/// Where log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Standard error stream, selected with `-`.
    Stderr,
    /// Append to the file at the given path.
    File(PathBuf),
}

impl LogDestination {
    /// Returns the file path when logging to a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Stderr => None,
            Self::File(path) => Some(path.as_path()),
        }
    }
}

impl FromStr for LogDestination {
    type Err = Infallible;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input == "-" {
            Ok(Self::Stderr)
        } else {
            Ok(Self::File(PathBuf::from(input)))
        }
    }
}

impl fmt::Display for LogDestination {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stderr => formatter.write_str("-"),
            Self::File(path) => write!(formatter, "{}", path.display()),
        }
    }
}

/// Minimum severity selected by the `-v` count.
///
/// Counts map as 1→critical, 2→error, 3→warning, 4→info, 5→debug. Zero and
/// any count outside that range fall back to info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Verbosity {
    /// Only critical failures.
    Critical,
    /// Errors and above.
    Error,
    /// Warnings and above.
    Warning,
    /// Informational messages and above.
    #[default]
    Info,
    /// Everything including debug output.
    Debug,
}

impl Verbosity {
    /// Maps a repeated `-v` flag count onto a severity threshold.
    #[must_use]
    pub const fn from_count(count: u8) -> Self {
        match count {
            1 => Self::Critical,
            2 => Self::Error,
            3 => Self::Warning,
            4 => Self::Info,
            5 => Self::Debug,
            _ => Self::Info,
        }
    }

    /// Filter directive understood by `tracing-subscriber`.
    ///
    /// `tracing` has no level above `error`, so critical filters the same way
    /// as error.
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}
