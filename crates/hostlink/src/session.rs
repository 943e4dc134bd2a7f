//! Live sessions to remote hosts
//!
//! A [`LinkSession`] is only ever handed out by the
//! [`ConnectionManager`](crate::ConnectionManager) after a successful connect,
//! so holding one means holding an authenticated transport.
//!
//! Sessions are single-owner: they can be moved to another thread but not
//! shared, and every operation takes `&mut self`. Callers that need to share
//! one session between workers must wrap it in a `Mutex` themselves.

use crate::command::{self, CommandResult};
use crate::interactive;
use crate::script;
use crate::transfer;
use crate::Outcome;
use hostlink_ssh::{ConnectOptions, FileSubchannel, KeyMaterial, TransportError, TransportHandle};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Identity of the session a command ran on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Session ID
    pub id: Uuid,
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Username
    pub username: String,
}

/// An authenticated connection to a remote host
pub struct LinkSession {
    /// Unique session ID
    id: Uuid,
    /// Options the session was opened with
    options: ConnectOptions,
    /// Key used to authenticate, shared with the manager's cache
    key: Arc<KeyMaterial>,
    /// Transport handle
    handle: Box<dyn TransportHandle>,
    /// Connection state
    connected: bool,
    /// File transfer subchannel, opened on first use
    sftp: Option<Box<dyn FileSubchannel>>,
}

impl LinkSession {
    pub(crate) fn new(options: ConnectOptions, key: Arc<KeyMaterial>, handle: Box<dyn TransportHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            key,
            handle,
            connected: true,
            sftp: None,
        }
    }

    /// Get the session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where this session is connected to
    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            id: self.id,
            host: self.options.hostname.clone(),
            port: self.options.port,
            username: self.options.username.clone(),
        }
    }

    /// Options the session was opened with
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Key used to authenticate
    pub fn key(&self) -> &Arc<KeyMaterial> {
        &self.key
    }

    /// Check if the session is connected
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn handle_mut(&mut self) -> &mut dyn TransportHandle {
        self.handle.as_mut()
    }

    /// The file transfer subchannel, opened on first use and kept for the
    /// lifetime of the session
    pub(crate) fn file_subchannel(&mut self) -> Result<&mut dyn FileSubchannel, TransportError> {
        let sftp = match self.sftp.take() {
            Some(sftp) => sftp,
            None => {
                debug!("Opening file transfer subchannel for session {}", self.id);
                self.handle.open_file_subchannel()?
            }
        };
        Ok(self.sftp.insert(sftp).as_mut())
    }

    /// Run a command without streaming its output
    pub fn command(&mut self, cmd: &str, sudo: bool) -> Outcome<CommandResult> {
        command::command(self, cmd, sudo)
    }

    /// Run a command, streaming its output to local stdout
    pub fn stream_command(&mut self, cmd: &str, sudo: bool) -> Outcome<CommandResult> {
        command::stream_command(self, cmd, sudo)
    }

    /// Run a command
    pub fn run_command(&mut self, cmd: &str, sudo: bool, stream: bool) -> Outcome<CommandResult> {
        command::run_command(self, cmd, sudo, stream)
    }

    /// Copy a local file to the remote host
    pub fn upload(&mut self, local: impl AsRef<Path>, remote: impl AsRef<Path>) -> Outcome<()> {
        transfer::upload(self, local, remote)
    }

    /// Copy a remote file to the local host
    pub fn download(&mut self, remote: impl AsRef<Path>, local: impl AsRef<Path>) -> Outcome<()> {
        transfer::download(self, remote, local)
    }

    /// Upload a script, make it executable and run it
    pub fn run_script(&mut self, local_script: impl AsRef<Path>, sudo: bool) -> Outcome<CommandResult> {
        script::run_script(self, local_script, sudo)
    }

    /// Bridge the local terminal to a remote shell
    pub fn interactive(&mut self) -> Outcome<()> {
        interactive::interactive(self)
    }

    /// Bridge arbitrary local streams to a remote shell
    pub fn interactive_with_io<R, W>(&mut self, input: R, output: W) -> Outcome<()>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        interactive::interactive_with_io(self, input, output)
    }

    /// Close the session
    pub fn close(mut self) -> Outcome<()> {
        info!("Closing session {} to {}", self.id, self.options.hostname);
        self.sftp = None;
        self.connected = false;
        Outcome::attempt(|| self.handle.disconnect())
    }
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSession")
            .field("id", &self.id)
            .field("host", &self.options.hostname)
            .field("port", &self.options.port)
            .field("username", &self.options.username)
            .field("connected", &self.connected)
            .field("sftp", &self.sftp.is_some())
            .finish()
    }
}
