//! Transport abstraction and connection options

use crate::{KeyMaterial, TransportError};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
#[cfg(unix)]
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default login name on provisioned hosts
pub const DEFAULT_USERNAME: &str = "substance";

/// Smallest accepted connect or banner timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Opens authenticated sessions to remote hosts.
///
/// One call is one connect attempt; retrying is the caller's business.
pub trait Connector: Send {
    /// Connect and authenticate using already loaded key material
    fn connect(
        &self,
        options: &ConnectOptions,
        key: &KeyMaterial,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// A live, authenticated transport.
///
/// Handles are not safe for concurrent use; every method takes `&mut self`.
pub trait TransportHandle: Send {
    /// Open a session channel for running one command
    fn open_channel(&mut self) -> Result<Box<dyn ExecChannel>, TransportError>;

    /// Open a channel with a pseudo-terminal; the shell is started with
    /// [`ShellChannel::start_shell`]
    fn open_shell(&mut self) -> Result<Box<dyn ShellChannel>, TransportError>;

    /// Open the file transfer subchannel
    fn open_file_subchannel(&mut self) -> Result<Box<dyn FileSubchannel>, TransportError>;

    /// Tear the transport down
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// A channel running a single remote command
pub trait ExecChannel: Send {
    /// Ask the server to forward the local credential agent over this channel
    fn request_agent_forwarding(&mut self) -> Result<(), TransportError>;

    /// Start remote execution of `command`
    fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Whether the remote process has reported completion
    fn is_exit_status_ready(&mut self) -> Result<bool, TransportError>;

    /// Read currently available stdout bytes without blocking; 0 when none are available
    fn recv_stdout(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Read currently available stderr bytes without blocking; 0 when none are available
    fn recv_stderr(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Exit code of the remote process; only meaningful once the exit status is ready
    fn exit_status(&mut self) -> Result<i32, TransportError>;
}

/// An interactive shell channel
pub trait ShellChannel: Send {
    /// Ask the server to forward the local credential agent over this channel
    fn request_agent_forwarding(&mut self) -> Result<(), TransportError>;

    /// Start the remote login shell
    fn start_shell(&mut self) -> Result<(), TransportError>;

    /// Set the read timeout; `Some(Duration::ZERO)` makes reads non-blocking
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Read remote output. `Ok(0)` means the remote side closed the channel;
    /// timeouts surface as `WouldBlock` or `TimedOut`.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send all of `data` to the remote side
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Signal end of local input
    fn send_eof(&mut self) -> Result<(), TransportError>;

    /// An independent reader over the channel's output, for use from another thread
    fn reader(&self) -> Box<dyn Read + Send>;

    /// Descriptor that becomes readable when remote data may be available
    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// File transfer subchannel
pub trait FileSubchannel: Send {
    /// Copy a local file to the remote host, returning the number of bytes written
    fn put(&mut self, local: &Path, remote: &Path) -> Result<u64, TransportError>;

    /// Copy a remote file to the local host, returning the number of bytes written
    fn get(&mut self, remote: &Path, local: &Path) -> Result<u64, TransportError>;
}

/// What to do with a host key that is not in the known-hosts file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Trust unknown hosts silently
    #[default]
    AutoAdd,
    /// Trust unknown hosts but log a warning
    Warn,
    /// Refuse unknown hosts
    Reject,
}

/// Options for one SSH connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Remote hostname or IP
    pub hostname: String,
    /// Remote port (default: 22)
    pub port: u16,
    /// Username
    pub username: String,
    /// Private key used for public key authentication
    pub private_key_path: PathBuf,
    /// Request credential agent forwarding on command and shell channels and
    /// fall back to agent authentication when the key is refused.
    ///
    /// libssh2 only sends the forwarding request; it does not accept the
    /// server's `auth-agent@openssh.com` channel opens, so the agent is not
    /// reachable from the remote side.
    pub agent_forwarding: bool,
    /// Policy for unknown host keys
    pub host_key_policy: HostKeyPolicy,
    /// TCP connect timeout
    #[serde(with = "duration_secs", rename = "connect_timeout_seconds")]
    pub connect_timeout: Duration,
    /// Timeout for the server banner and key exchange
    #[serde(with = "duration_secs", rename = "banner_timeout_seconds")]
    pub banner_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USERNAME.to_string(),
            private_key_path: PathBuf::new(),
            agent_forwarding: true,
            host_key_policy: HostKeyPolicy::AutoAdd,
            connect_timeout: Duration::from_secs(1),
            banner_timeout: Duration::from_secs(1),
        }
    }
}

impl ConnectOptions {
    /// Options for `target` (`[user@]host[:port]`) authenticating with `key_path`
    pub fn new(target: &str, key_path: impl Into<PathBuf>) -> Self {
        let (username, hostname, port) = Self::parse_target(target);
        Self {
            hostname,
            port,
            username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            private_key_path: key_path.into(),
            ..Default::default()
        }
    }

    /// Parse JSON connect info, falling back to defaults for missing fields
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        serde_json::from_str(json)
            .map_err(|e| TransportError::Configuration(format!("invalid connect options: {}", e)))
    }

    /// Parse target string into components
    fn parse_target(target: &str) -> (Option<String>, String, u16) {
        // Format: [user@]host[:port]
        let mut username = None;
        let mut host = target.to_string();
        let mut port = DEFAULT_PORT;

        if let Some(at_pos) = target.find('@') {
            username = Some(target[..at_pos].to_string());
            host = target[at_pos + 1..].to_string();
        }

        if let Some(colon_pos) = host.rfind(':') {
            if let Ok(parsed_port) = host[colon_pos + 1..].parse::<u16>() {
                port = parsed_port;
                host = host[..colon_pos].to_string();
            }
        }

        (username, host, port)
    }

    /// Set the host and port
    pub fn with_host(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = hostname.into();
        self.port = port;
        self
    }

    /// Set the username
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the private key path
    pub fn with_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.private_key_path = key_path.into();
        self
    }

    /// Enable or disable agent forwarding
    pub fn with_agent_forwarding(mut self, enabled: bool) -> Self {
        self.agent_forwarding = enabled;
        self
    }

    /// Set the unknown host key policy
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    /// Set the TCP connect and banner timeouts
    pub fn with_timeouts(mut self, connect: Duration, banner: Duration) -> Self {
        self.connect_timeout = connect;
        self.banner_timeout = banner;
        self
    }

    /// Check the options before a connect attempt
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.hostname.trim().is_empty() {
            return Err(TransportError::Configuration("hostname is empty".to_string()));
        }
        if self.port == 0 {
            return Err(TransportError::Configuration("port must be non-zero".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(TransportError::Configuration("username is empty".to_string()));
        }
        if self.private_key_path.as_os_str().is_empty() {
            return Err(TransportError::Configuration("private key path is not set".to_string()));
        }
        if self.connect_timeout < MIN_TIMEOUT {
            return Err(TransportError::Configuration("connect timeout must be at least 1 ms".to_string()));
        }
        // libssh2 treats a zero timeout as "wait forever"
        if self.banner_timeout < MIN_TIMEOUT {
            return Err(TransportError::Configuration("banner timeout must be at least 1 ms".to_string()));
        }
        Ok(())
    }
}

/// Serde adapter storing a `Duration` as fractional seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as seconds
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    /// Deserialize from non-negative seconds
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
