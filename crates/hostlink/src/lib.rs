//! # hostlink
//!
//! Provisioning link to remote hosts over SSH.
//!
//! hostlink connects to freshly booted machines with a retry/timeout policy,
//! runs commands with captured or streamed output, moves files over SFTP,
//! runs deployment scripts and bridges the local terminal to a remote shell.
//! Every operation returns an [`Outcome`] so multi-step provisioning reads as
//! one pipeline:
//!
//! ```no_run
//! use hostlink::{ConnectOptions, ConnectionManager};
//!
//! let options = ConnectOptions::new("substance@10.0.0.5", "/home/dev/.substance/id_rsa");
//! let mut manager = ConnectionManager::ssh2();
//! let outcome = manager
//!     .connect(&options, 20, std::time::Duration::from_secs(30))
//!     .bind(|mut session| session.run_script("bootstrap.sh", true));
//! println!("{}", outcome.map(|result| result.exit_code().unwrap_or(-1)));
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use hostlink_ssh as ssh;
pub use hostlink_ssh::{ConnectOptions, HostKeyPolicy};

/// Error types for the hostlink library
pub mod error;

/// Success/failure container and combinators
pub mod outcome;

/// Connection management with retries
pub mod connect;

/// Live sessions
pub mod session;

/// Remote command execution
pub mod command;

/// File upload and download
pub mod transfer;

/// Script deployment
pub mod script;

/// Interactive shell bridging
pub mod interactive;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{ErrorKind, LinkError};
pub use outcome::{Categorized, Outcome};
pub use connect::{ConnectState, ConnectionManager, RetryPolicy};
pub use session::{LinkInfo, LinkSession};
pub use command::{CommandResult, OutputStream};
pub use interactive::TerminalMode;
