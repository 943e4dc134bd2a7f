//! Error types for the hostlink library

use hostlink_ssh::TransportError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for hostlink operations.
///
/// Errors carry rendered messages rather than source errors so that outcomes
/// can be cloned and compared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Credential material unreadable or invalid; never retried
    #[error("Failed to load key {path}: {reason}")]
    KeyLoad {
        /// Key file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Connect failure that is not worth retrying
    #[error("Connection error: {0}")]
    ConnectTransport(String),

    /// Retryable failures kept happening past the deadline
    #[error("Timeout exceeded after {attempts} attempts ({timeout:?})")]
    ConnectTimeoutExceeded {
        /// Configured deadline
        timeout: Duration,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Retryable failures used up every attempt
    #[error("Max retries exceeded ({attempts} attempts)")]
    ConnectRetriesExceeded {
        /// Attempts made
        attempts: u32,
    },

    /// Channel or transport failure while running a command
    #[error("Command `{command}` failed: {reason}")]
    CommandExecution {
        /// Command as sent to the remote host
        command: String,
        /// What went wrong
        reason: String,
    },

    /// Upload or download failure
    #[error("Transfer {from} -> {to} failed: {reason}")]
    FileTransfer {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Interactive shell or local terminal failure
    #[error("Interactive session error: {0}")]
    Interactive(String),

    /// Invalid options or policy
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Fieldless discriminant of [`LinkError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`LinkError::KeyLoad`]
    KeyLoad,
    /// See [`LinkError::ConnectTransport`]
    ConnectTransport,
    /// See [`LinkError::ConnectTimeoutExceeded`]
    ConnectTimeoutExceeded,
    /// See [`LinkError::ConnectRetriesExceeded`]
    ConnectRetriesExceeded,
    /// See [`LinkError::CommandExecution`]
    CommandExecution,
    /// See [`LinkError::FileTransfer`]
    FileTransfer,
    /// See [`LinkError::Interactive`]
    Interactive,
    /// See [`LinkError::Configuration`]
    Configuration,
}

impl LinkError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyLoad { .. } => ErrorKind::KeyLoad,
            Self::ConnectTransport(_) => ErrorKind::ConnectTransport,
            Self::ConnectTimeoutExceeded { .. } => ErrorKind::ConnectTimeoutExceeded,
            Self::ConnectRetriesExceeded { .. } => ErrorKind::ConnectRetriesExceeded,
            Self::CommandExecution { .. } => ErrorKind::CommandExecution,
            Self::FileTransfer { .. } => ErrorKind::FileTransfer,
            Self::Interactive(_) => ErrorKind::Interactive,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub(crate) fn command(command: &str, err: impl std::fmt::Display) -> Self {
        Self::CommandExecution {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn transfer(from: &std::path::Path, to: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::FileTransfer {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

impl From<TransportError> for LinkError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Key { path, reason } => Self::KeyLoad { path, reason },
            TransportError::Configuration(msg) => Self::Configuration(msg),
            other => Self::ConnectTransport(other.to_string()),
        }
    }
}
