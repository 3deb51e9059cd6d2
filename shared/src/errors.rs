//! Shared error types for argument and flag handling

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Missing argument at position {index}: expected {expected}")]
    MissingArgument { index: usize, expected: String },

    #[error("Unknown operation: {input} (expected inject or remove)")]
    UnknownOperation { input: String },

    #[error("Unknown fault module: {input}")]
    UnknownModule { input: String },

    #[error("Missing flag --{flag}")]
    MissingFlag { flag: String },

    #[error("Invalid value for --{flag}: {value} ({reason})")]
    InvalidFlag {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("Invalid interval: {input} (expected forms like 1h:2m:3s, 10s or 10)")]
    InvalidInterval { input: String },
}

impl SharedError {
    /// Helper for flag conversion failures
    pub fn invalid_flag(flag: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFlag {
            flag: flag.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
