//! libssh2-backed connection, channels and SFTP

use crate::known_hosts;
use crate::{
    ConnectOptions, Connector, ExecChannel, FileSubchannel, KeyMaterial, ShellChannel, TransportError,
    TransportHandle,
};
use ssh2::{Channel, ErrorCode, Session, Sftp};
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// libssh2 session error codes that describe a broken socket rather than a
/// protocol failure (send, disconnect, socket timeout, recv).
const SOCKET_ERROR_CODES: [i32; 4] = [-7, -13, -30, -43];

/// Terminal type and size requested for interactive shells
const PTY_TERM: &str = "vt100";
const PTY_SIZE: (u32, u32, u32, u32) = (80, 24, 0, 0);

/// Connector producing libssh2 sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Connector;

impl Ssh2Connector {
    /// Create a new connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for Ssh2Connector {
    fn connect(
        &self,
        options: &ConnectOptions,
        key: &KeyMaterial,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        Ok(Box::new(Connection::open(options, key)?))
    }
}

/// An authenticated libssh2 session
pub struct Connection {
    /// libssh2 session
    session: Session,
    /// Socket the session runs over, kept for readiness polling
    socket: TcpStream,
    /// Remote host, for logging
    host: String,
    /// Connection state
    connected: bool,
}

impl Connection {
    /// Dial, handshake, verify the host key and authenticate
    pub fn open(options: &ConnectOptions, key: &KeyMaterial) -> Result<Self, TransportError> {
        options.validate()?;
        debug!("Connecting to {}@{}:{}", options.username, options.hostname, options.port);

        let socket = Self::dial(options)?;
        let mut session = Session::new().map_err(|e| TransportError::Negotiation(e.to_string()))?;
        session.set_tcp_stream(socket.try_clone().map_err(TransportError::Socket)?);
        session.set_timeout(millis(options.banner_timeout).max(1));
        session.handshake().map_err(handshake_error)?;

        known_hosts::verify(&session, &options.hostname, options.port, options.host_key_policy)?;
        Self::authenticate(&session, options, key)?;

        // Blocking calls wait indefinitely from here on
        session.set_timeout(0);

        info!("Connected to {}@{}:{}", options.username, options.hostname, options.port);
        Ok(Self {
            session,
            socket,
            host: options.hostname.clone(),
            connected: true,
        })
    }

    fn dial(options: &ConnectOptions) -> Result<TcpStream, TransportError> {
        let addrs = (options.hostname.as_str(), options.port)
            .to_socket_addrs()
            .map_err(TransportError::Socket)?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, options.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::Socket(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {}", options.hostname))
        })))
    }

    fn authenticate(session: &Session, options: &ConnectOptions, key: &KeyMaterial) -> Result<(), TransportError> {
        let username = options.username.as_str();

        if let Err(e) = session.userauth_pubkey_memory(username, None, key.pem(), None) {
            if !options.agent_forwarding {
                return Err(TransportError::Authentication(e.to_string()));
            }
            debug!("Key authentication for {} failed ({}), trying agent", username, e);
            if let Err(e) = session.userauth_agent(username) {
                return Err(TransportError::Authentication(e.to_string()));
            }
        }

        if !session.authenticated() {
            return Err(TransportError::Authentication(format!(
                "server did not accept credentials for {}",
                username
            )));
        }
        Ok(())
    }
}

impl TransportHandle for Connection {
    fn open_channel(&mut self) -> Result<Box<dyn ExecChannel>, TransportError> {
        let channel = self.session.channel_session()?;
        Ok(Box::new(Ssh2ExecChannel {
            session: self.session.clone(),
            channel,
        }))
    }

    fn open_shell(&mut self) -> Result<Box<dyn ShellChannel>, TransportError> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty(PTY_TERM, None, Some(PTY_SIZE))?;
        let socket = self.socket.try_clone()?;
        Ok(Box::new(Ssh2Shell {
            session: self.session.clone(),
            channel,
            socket,
        }))
    }

    fn open_file_subchannel(&mut self) -> Result<Box<dyn FileSubchannel>, TransportError> {
        let sftp = self
            .session
            .sftp()
            .map_err(|e| TransportError::Sftp(e.to_string()))?;
        Ok(Box::new(Ssh2Sftp { sftp }))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            debug!("Closing SSH connection to {}", self.host);
            self.connected = false;
            self.session.disconnect(None, "closing", None)?;
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Failed to close SSH connection: {}", e);
        }
    }
}

struct Ssh2ExecChannel {
    session: Session,
    channel: Channel,
}

impl ExecChannel for Ssh2ExecChannel {
    fn request_agent_forwarding(&mut self) -> Result<(), TransportError> {
        Ok(self.channel.request_auth_agent_forwarding()?)
    }

    fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        Ok(self.channel.exec(command)?)
    }

    fn is_exit_status_ready(&mut self) -> Result<bool, TransportError> {
        Ok(self.channel.eof())
    }

    fn recv_stdout(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        read_available(&self.session, &mut self.channel, buf)
    }

    fn recv_stderr(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut stderr = self.channel.stderr();
        read_available(&self.session, &mut stderr, buf)
    }

    fn exit_status(&mut self) -> Result<i32, TransportError> {
        self.channel.wait_close()?;
        Ok(self.channel.exit_status()?)
    }
}

struct Ssh2Shell {
    session: Session,
    channel: Channel,
    socket: TcpStream,
}

impl ShellChannel for Ssh2Shell {
    fn request_agent_forwarding(&mut self) -> Result<(), TransportError> {
        Ok(self.channel.request_auth_agent_forwarding()?)
    }

    fn start_shell(&mut self) -> Result<(), TransportError> {
        Ok(self.channel.shell()?)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        match timeout {
            Some(t) if t.is_zero() => self.session.set_blocking(false),
            Some(t) => {
                self.session.set_blocking(true);
                self.session.set_timeout(millis(t).max(1));
            }
            None => {
                self.session.set_blocking(true);
                self.session.set_timeout(0);
            }
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }

    fn send(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.channel.write(data) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => data = &data[n..],
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e),
            }
        }
        self.channel.flush()
    }

    fn send_eof(&mut self) -> Result<(), TransportError> {
        Ok(self.channel.send_eof()?)
    }

    fn reader(&self) -> Box<dyn Read + Send> {
        Box::new(self.channel.stream(0))
    }

    #[cfg(unix)]
    fn readiness_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.socket.as_fd())
    }
}

impl Drop for Ssh2Shell {
    fn drop(&mut self) {
        // Read timeouts are session-wide; later commands expect blocking reads
        self.session.set_blocking(true);
        self.session.set_timeout(0);
    }
}

struct Ssh2Sftp {
    sftp: Sftp,
}

impl FileSubchannel for Ssh2Sftp {
    fn put(&mut self, local: &Path, remote: &Path) -> Result<u64, TransportError> {
        let mut source = File::open(local)?;
        let mut target = self
            .sftp
            .create(remote)
            .map_err(|e| TransportError::Sftp(format!("{}: {}", remote.display(), e)))?;
        Ok(io::copy(&mut source, &mut target)?)
    }

    fn get(&mut self, remote: &Path, local: &Path) -> Result<u64, TransportError> {
        let mut source = self
            .sftp
            .open(remote)
            .map_err(|e| TransportError::Sftp(format!("{}: {}", remote.display(), e)))?;
        let mut target = File::create(local)?;
        Ok(io::copy(&mut source, &mut target)?)
    }
}

/// Read whatever is buffered without waiting for more
fn read_available(session: &Session, reader: &mut impl Read, buf: &mut [u8]) -> Result<usize, TransportError> {
    session.set_blocking(false);
    let result = reader.read(buf);
    session.set_blocking(true);

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(TransportError::Io(e)),
    }
}

fn handshake_error(err: ssh2::Error) -> TransportError {
    match err.code() {
        ErrorCode::Session(code) if SOCKET_ERROR_CODES.contains(&code) => TransportError::Socket(err.into()),
        _ => TransportError::Negotiation(err.to_string()),
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
