//! Remote command execution
//!
//! Each command runs on its own channel. Output is collected while polling
//! for the exit status and, when streaming, copied to a local sink as it
//! arrives. A last drain after the exit status is ready picks up whatever
//! arrived between the final poll and process exit.

use crate::error::LinkError;
use crate::session::{LinkInfo, LinkSession};
use crate::Outcome;
use hostlink_ssh::{ExecChannel, TransportError, TransportHandle};
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Prefix used to run a command with elevated privileges
pub const ELEVATION_PREFIX: &str = "sudo";

/// Maximum bytes read per stream per poll
const CHUNK_SIZE: usize = 1024;

const IDLE_BACKOFF_START: Duration = Duration::from_millis(1);
const IDLE_BACKOFF_MAX: Duration = Duration::from_millis(20);

/// Captured output of one remote stream.
///
/// Implements [`Read`] so it can be consumed like the live stream it was
/// captured from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputStream {
    data: Vec<u8>,
    pos: usize,
}

impl OutputStream {
    fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// All captured bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Captured output as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Take the captured bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Read for OutputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    link: LinkInfo,
    command: String,
    stdout: OutputStream,
    stderr: OutputStream,
    exit_code: Option<i32>,
}

impl CommandResult {
    /// Session the command ran on
    pub fn link(&self) -> &LinkInfo {
        &self.link
    }

    /// Command as sent to the remote host, including any elevation prefix
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Captured standard output
    pub fn stdout(&self) -> &OutputStream {
        &self.stdout
    }

    /// Captured standard error
    pub fn stderr(&self) -> &OutputStream {
        &self.stderr
    }

    /// Mutable access to standard output, for reading it as a stream
    pub fn stdout_mut(&mut self) -> &mut OutputStream {
        &mut self.stdout
    }

    /// Mutable access to standard error, for reading it as a stream
    pub fn stderr_mut(&mut self) -> &mut OutputStream {
        &mut self.stderr
    }

    /// Exit code reported by the remote process
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Whether the remote process exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// `command` with the elevation prefix applied when `sudo` is set
pub fn elevate(command: &str, sudo: bool) -> String {
    if sudo {
        format!("{} {}", ELEVATION_PREFIX, command)
    } else {
        command.to_string()
    }
}

/// Run `command`, capturing its output
pub fn command(session: &mut LinkSession, command: &str, sudo: bool) -> Outcome<CommandResult> {
    run_command(session, command, sudo, false)
}

/// Run `command`, copying its output to local stdout as it arrives
pub fn stream_command(session: &mut LinkSession, command: &str, sudo: bool) -> Outcome<CommandResult> {
    run_command(session, command, sudo, true)
}

/// Run `command`; with `stream` set, output is also copied to local stdout
pub fn run_command(session: &mut LinkSession, command: &str, sudo: bool, stream: bool) -> Outcome<CommandResult> {
    if stream {
        run_command_to(session, command, sudo, Some(&mut io::stdout()))
    } else {
        run_command_to(session, command, sudo, None)
    }
}

/// Run `command`, copying its output to `sink` as it arrives
pub fn run_command_to(
    session: &mut LinkSession,
    command: &str,
    sudo: bool,
    sink: Option<&mut dyn Write>,
) -> Outcome<CommandResult> {
    let command = elevate(command, sudo);
    let link = session.info();
    let forward_agent = session.options().agent_forwarding;
    debug!("Running on session {}: {}", link.id, command);

    let mut discard = io::sink();
    let sink: &mut dyn Write = match sink {
        Some(sink) => sink,
        None => &mut discard,
    };

    Outcome::from(execute(session.handle_mut(), &command, forward_agent, sink))
        .map_error(|err| LinkError::command(&command, err))
        .map(|(captured, code)| {
            debug!("Command `{}` exited with {}", command, code);
            CommandResult {
                link,
                command,
                stdout: captured.stdout,
                stderr: captured.stderr,
                exit_code: Some(code),
            }
        })
}

#[derive(Default)]
struct Captured {
    stdout: OutputStream,
    stderr: OutputStream,
}

impl Captured {
    /// Read one chunk from each stream; returns whether anything arrived
    fn drain_once(&mut self, channel: &mut dyn ExecChannel, sink: &mut dyn Write) -> Result<bool, TransportError> {
        let mut buf = [0u8; CHUNK_SIZE];

        let n_out = channel.recv_stdout(&mut buf)?;
        if n_out > 0 {
            self.stdout.push(&buf[..n_out]);
            sink.write_all(&buf[..n_out])?;
        }

        let n_err = channel.recv_stderr(&mut buf)?;
        if n_err > 0 {
            self.stderr.push(&buf[..n_err]);
            sink.write_all(&buf[..n_err])?;
        }

        if n_out + n_err > 0 {
            sink.flush()?;
            return Ok(true);
        }
        Ok(false)
    }
}

fn execute(
    handle: &mut dyn TransportHandle,
    command: &str,
    forward_agent: bool,
    sink: &mut dyn Write,
) -> Result<(Captured, i32), TransportError> {
    let mut channel = handle.open_channel()?;
    if forward_agent {
        if let Err(e) = channel.request_agent_forwarding() {
            warn!("Agent forwarding refused for `{}`: {}", command, e);
        }
    }
    channel.exec(command)?;

    let mut captured = Captured::default();
    let mut idle = IDLE_BACKOFF_START;
    while !channel.is_exit_status_ready()? {
        if captured.drain_once(channel.as_mut(), sink)? {
            idle = IDLE_BACKOFF_START;
        } else {
            thread::sleep(idle);
            idle = (idle * 2).min(IDLE_BACKOFF_MAX);
        }
    }
    while captured.drain_once(channel.as_mut(), sink)? {}

    let code = channel.exit_status()?;
    Ok((captured, code))
}
