//! SSH-specific error types

use thiserror::Error;
use std::io;
use std::path::PathBuf;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Private key could not be read or is not usable
    #[error("Failed to load private key {path}: {reason}")]
    Key {
        /// Path of the key file
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// SSH protocol negotiation (banner, key exchange) failed
    #[error("SSH negotiation failed: {0}")]
    Negotiation(String),

    /// Server rejected our credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Socket-level failure while reaching the host
    #[error("Socket error: {0}")]
    Socket(#[source] io::Error),

    /// Host key did not pass the configured policy
    #[error("Host key verification failed: {0}")]
    HostKey(String),

    /// Channel-level failure on an established session
    #[error("Channel error: {0}")]
    Channel(String),

    /// File transfer subchannel failure
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Fieldless discriminant of [`TransportError`], used to select errors by category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// See [`TransportError::Key`]
    Key,
    /// See [`TransportError::Negotiation`]
    Negotiation,
    /// See [`TransportError::Authentication`]
    Authentication,
    /// See [`TransportError::Socket`]
    Socket,
    /// See [`TransportError::HostKey`]
    HostKey,
    /// See [`TransportError::Channel`]
    Channel,
    /// See [`TransportError::Sftp`]
    Sftp,
    /// See [`TransportError::Io`]
    Io,
    /// See [`TransportError::Configuration`]
    Configuration,
}

impl TransportErrorKind {
    /// Kinds a connect attempt may be retried after.
    ///
    /// Negotiation and authentication failures belong to the same protocol
    /// error family; a freshly booted host often accepts the socket before its
    /// SSH daemon or authorized keys are ready.
    pub const RETRYABLE: [TransportErrorKind; 3] = [
        TransportErrorKind::Negotiation,
        TransportErrorKind::Authentication,
        TransportErrorKind::Socket,
    ];
}

impl TransportError {
    /// Category of this error
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Key { .. } => TransportErrorKind::Key,
            Self::Negotiation(_) => TransportErrorKind::Negotiation,
            Self::Authentication(_) => TransportErrorKind::Authentication,
            Self::Socket(_) => TransportErrorKind::Socket,
            Self::HostKey(_) => TransportErrorKind::HostKey,
            Self::Channel(_) => TransportErrorKind::Channel,
            Self::Sftp(_) => TransportErrorKind::Sftp,
            Self::Io(_) => TransportErrorKind::Io,
            Self::Configuration(_) => TransportErrorKind::Configuration,
        }
    }

    /// Whether a connect attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        TransportErrorKind::RETRYABLE.contains(&self.kind())
    }
}

#[cfg(feature = "ssh2")]
impl From<ssh2::Error> for TransportError {
    fn from(err: ssh2::Error) -> Self {
        Self::Channel(err.to_string())
    }
}
