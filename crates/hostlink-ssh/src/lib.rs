//! # hostlink SSH transport
//!
//! Transport seam for hostlink: the traits a secure remote-shell backend must
//! provide, connection options, key loading and host key checks, plus the
//! libssh2-backed implementation.

#![warn(missing_docs)]

/// Transport abstraction and connection options
pub mod transport;

/// libssh2-backed connection, channels and SFTP
#[cfg(feature = "ssh2")]
pub mod connection;

/// Known-hosts verification
#[cfg(feature = "ssh2")]
pub mod known_hosts;

/// Private key loading
pub mod key;

/// SSH-specific error types
pub mod error;

pub use transport::{
    duration_secs, ConnectOptions, Connector, ExecChannel, FileSubchannel, HostKeyPolicy, ShellChannel,
    TransportHandle,
};
#[cfg(feature = "ssh2")]
pub use connection::{Connection, Ssh2Connector};
pub use key::KeyMaterial;
pub use error::{TransportError, TransportErrorKind};
