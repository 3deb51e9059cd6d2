//! Injector-specific error types

use std::fmt;
use std::path::PathBuf;

use nix::errno::Errno;
use shared::SharedError;
use thiserror::Error;

/// Coarse classification used for reporting and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Validation failed before anything was mutated
    Precondition,
    /// An external command or system call failed while acting
    Execution,
    /// Something expected to exist for removal could not be found
    Discovery,
}

impl ErrorKind {
    /// Process exit status reported by the CLI
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Execution => 1,
            ErrorKind::Precondition => 2,
            ErrorKind::Discovery => 3,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::Execution => "execution",
            ErrorKind::Discovery => "discovery",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug)]
pub enum FaultError {
    #[error("Required command not found on PATH: {command}")]
    MissingCommand { command: String },

    #[error("Missing flag --{flag}")]
    MissingFlag { flag: String },

    #[error("Invalid value for --{flag}: {value} ({reason})")]
    InvalidFlag {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("Invalid arguments: {reason}")]
    InvalidArgument { reason: String },

    #[error("Target not found: {target}")]
    TargetAbsent { target: String },

    #[error("Fault {fault_type} is already injected: {detail}")]
    AlreadyInjected { fault_type: String, detail: String },

    #[error("Unknown fault type: {fault_type}")]
    UnknownFault { fault_type: String },

    #[error("Fault {fault_type} belongs to module {expected}, not {requested}")]
    ModuleMismatch {
        fault_type: String,
        expected: String,
        requested: String,
    },

    #[error("Cannot {operation} a fault session in state {state}")]
    InvalidLifecycle { operation: String, state: String },

    #[error("Insufficient space on {path}: need {required} bytes, {available} available")]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("Command failed: {command} (status {status:?}): {output}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Failed to launch {command}: {output}")]
    LaunchFailed { command: String, output: String },

    #[error("I/O error during {operation} on {path}: {source}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send {signal} to pid {pid}: {errno}")]
    Signal {
        pid: i32,
        signal: String,
        errno: Errno,
    },

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Exhaustion round {round} made no progress: {reason}")]
    Exhaustion { round: usize, reason: String },

    #[error("No running instance found for: {search}")]
    ProcessNotFound { search: String },

    #[error("Backup not found: {path}")]
    BackupNotFound { path: PathBuf },

    #[error("Nothing to remove for {fault_type}: {reason}")]
    NothingToRemove { fault_type: String, reason: String },
}

impl FaultError {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaultError::MissingCommand { .. }
            | FaultError::MissingFlag { .. }
            | FaultError::InvalidFlag { .. }
            | FaultError::InvalidArgument { .. }
            | FaultError::TargetAbsent { .. }
            | FaultError::AlreadyInjected { .. }
            | FaultError::UnknownFault { .. }
            | FaultError::ModuleMismatch { .. }
            | FaultError::InvalidLifecycle { .. }
            | FaultError::InsufficientSpace { .. } => ErrorKind::Precondition,

            FaultError::CommandFailed { .. }
            | FaultError::LaunchFailed { .. }
            | FaultError::Io { .. }
            | FaultError::Signal { .. }
            | FaultError::Join(_)
            | FaultError::Exhaustion { .. } => ErrorKind::Execution,

            FaultError::ProcessNotFound { .. }
            | FaultError::BackupNotFound { .. }
            | FaultError::NothingToRemove { .. } => ErrorKind::Discovery,
        }
    }

    /// Helper for I/O failures with path context
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    pub fn invalid_flag(flag: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFlag {
            flag: flag.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn target_absent(target: impl Into<String>) -> Self {
        Self::TargetAbsent { target: target.into() }
    }

    pub fn already_injected(fault_type: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::AlreadyInjected {
            fault_type: fault_type.to_string(),
            detail: detail.into(),
        }
    }

    pub fn nothing_to_remove(fault_type: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::NothingToRemove {
            fault_type: fault_type.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<SharedError> for FaultError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::MissingFlag { flag } => FaultError::MissingFlag { flag },
            SharedError::InvalidFlag { flag, value, reason } => {
                FaultError::InvalidFlag { flag, value, reason }
            }
            other => FaultError::InvalidArgument {
                reason: other.to_string(),
            },
        }
    }
}

pub type FaultResult<T> = Result<T, FaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_distinct_exit_codes() {
        let precondition = FaultError::MissingCommand { command: "dd".into() };
        let execution = FaultError::CommandFailed {
            command: "false".into(),
            status: Some(1),
            output: String::new(),
        };
        let discovery = FaultError::ProcessNotFound { search: "stress-ng".into() };

        assert_eq!(precondition.kind().exit_code(), 2);
        assert_eq!(execution.kind().exit_code(), 1);
        assert_eq!(discovery.kind().exit_code(), 3);
    }

    #[test]
    fn test_shared_flag_errors_keep_their_shape() {
        let err: FaultError = SharedError::MissingFlag { flag: "pid".into() }.into();
        assert!(matches!(err, FaultError::MissingFlag { ref flag } if flag == "pid"));
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let err: FaultError = SharedError::UnknownOperation { input: "zap".into() }.into();
        assert!(matches!(err, FaultError::InvalidArgument { .. }));
    }
}
