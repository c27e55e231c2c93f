//! CLI command implementations.

pub mod bench;
pub mod dump_wal;
pub mod inspect;

use std::str::FromStr;
use thiserror::Error;

/// Errors raised by the commands themselves.
#[derive(Debug, Error)]
pub enum CliError {
    /// Unknown `--format` value.
    #[error("unknown output format '{0}', expected text or json")]
    UnknownFormat(String),

    /// The journal path does not exist.
    #[error("journal not found: {0}")]
    JournalNotFound(String),
}

/// Output format shared by the commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

impl FromStr for OutputFormat {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(CliError::UnknownFormat(other.to_string())),
        }
    }
}
