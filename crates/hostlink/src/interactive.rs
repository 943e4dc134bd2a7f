//! Interactive shell bridging
//!
//! Connects local input and output to a remote login shell. Which bridge is
//! used is decided once per call by [`TerminalMode`]:
//!
//! * `Raw` puts the local terminal into raw mode and multiplexes the
//!   transport socket and stdin on the calling thread, forwarding every key
//!   press as it happens.
//! * `Threaded` works on any input stream. Input is forwarded one byte at a
//!   time from the calling thread while a background thread copies remote
//!   output.

use crate::error::LinkError;
use crate::session::LinkSession;
use crate::Outcome;
use hostlink_ssh::{ShellChannel, TransportError, TransportHandle};
use std::io::{self, IsTerminal, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const BEGIN_BANNER: &[u8] = b"\r\n*** Begin interactive session.\r\n";
const END_BANNER: &[u8] = b"\r\n*** End of interactive session.\r\n";
const LINE_BUFFERED_BANNER: &[u8] = b"Line-buffered terminal emulation. Press F6 or ^Z to send EOF.\r\n\r\n";
const EOF_BANNER: &[u8] = b"\r\n*** EOF ***\r\n\r\n";

/// Remote bytes read per step in raw mode
const REMOTE_CHUNK: usize = 1024;

/// Remote bytes read per step by the background reader
const READER_CHUNK: usize = 256;

/// How long the background reader blocks before checking whether to stop
const READER_POLL: Duration = Duration::from_millis(100);

/// How long the background reader keeps copying once asked to stop
const READER_DRAIN: Duration = Duration::from_millis(100);

/// How the local side of an interactive session is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    /// Raw terminal, socket and stdin multiplexed on one thread (unix only)
    Raw,
    /// Line-buffered input with a background output thread
    Threaded,
}

impl TerminalMode {
    /// `Raw` on unix when stdin is a terminal, `Threaded` otherwise
    pub fn detect() -> Self {
        if cfg!(unix) && io::stdin().is_terminal() {
            Self::Raw
        } else {
            Self::Threaded
        }
    }
}

/// Bridge the local terminal to a remote shell until either side ends it
pub fn interactive(session: &mut LinkSession) -> Outcome<()> {
    interactive_with(session, TerminalMode::detect())
}

/// Bridge the local terminal to a remote shell using `mode`
pub fn interactive_with(session: &mut LinkSession, mode: TerminalMode) -> Outcome<()> {
    debug!("Starting {:?} interactive session on {}", mode, session.id());
    match mode {
        TerminalMode::Raw => raw_session(session),
        TerminalMode::Threaded => interactive_with_io(session, io::stdin(), io::stdout()),
    }
}

/// Bridge `input` and `output` to a remote shell with the threaded bridge.
///
/// Returns once `input` reaches end of file and the remote output has been
/// copied.
pub fn interactive_with_io<R, W>(session: &mut LinkSession, input: R, output: W) -> Outcome<()>
where
    R: Read,
    W: Write + Send + 'static,
{
    open_shell(session).bind(|channel| Outcome::from(threaded::run(channel, input, output)).map_error(bridge_error))
}

#[cfg(unix)]
fn raw_session(session: &mut LinkSession) -> Outcome<()> {
    open_shell(session).bind(|channel| Outcome::from(raw::run(channel)).map_error(bridge_error))
}

#[cfg(not(unix))]
fn raw_session(session: &mut LinkSession) -> Outcome<()> {
    interactive_with_io(session, io::stdin(), io::stdout())
}

fn bridge_error(err: TransportError) -> LinkError {
    LinkError::Interactive(err.to_string())
}

fn open_shell(session: &mut LinkSession) -> Outcome<Box<dyn ShellChannel>> {
    let forward_agent = session.options().agent_forwarding;
    Outcome::from(start_shell(session.handle_mut(), forward_agent))
        .map_error(|err| LinkError::Interactive(format!("failed to start remote shell: {}", err)))
}

fn start_shell(handle: &mut dyn TransportHandle, forward_agent: bool) -> Result<Box<dyn ShellChannel>, TransportError> {
    let mut channel = handle.open_shell()?;
    if forward_agent {
        if let Err(e) = channel.request_agent_forwarding() {
            warn!("Agent forwarding refused for interactive shell: {}", e);
        }
    }
    channel.start_shell()?;
    Ok(channel)
}

enum Flow {
    Continue,
    Closed,
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Copy one chunk of remote output to `out`
fn pump_remote(channel: &mut dyn ShellChannel, out: &mut dyn Write) -> io::Result<Flow> {
    let mut buf = [0u8; REMOTE_CHUNK];
    match channel.recv(&mut buf) {
        Ok(0) => {
            out.write_all(END_BANNER)?;
            out.flush()?;
            Ok(Flow::Closed)
        }
        Ok(n) => {
            out.write_all(&buf[..n])?;
            out.flush()?;
            Ok(Flow::Continue)
        }
        Err(e) if is_timeout(&e) => Ok(Flow::Continue),
        Err(e) => Err(e),
    }
}

/// Forward one byte of local input
fn pump_local(input: &mut dyn Read, channel: &mut dyn ShellChannel) -> io::Result<Flow> {
    let mut byte = [0u8; 1];
    match input.read(&mut byte) {
        Ok(0) => Ok(Flow::Closed),
        Ok(_) => {
            channel.send(&byte)?;
            Ok(Flow::Continue)
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Flow::Continue),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
mod raw {
    use super::*;
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
    use std::fs::File;
    use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

    /// Upper bound on one readiness wait, in milliseconds
    const READINESS_TIMEOUT_MS: u16 = 50;

    /// Raw terminal mode for as long as the guard lives
    pub(super) struct RawModeGuard {
        fd: OwnedFd,
        saved: Termios,
    }

    impl RawModeGuard {
        pub(super) fn enter(fd: BorrowedFd<'_>) -> io::Result<Self> {
            let owned = fd.try_clone_to_owned()?;
            let saved = tcgetattr(fd)?;
            let mut raw = saved.clone();
            cfmakeraw(&mut raw);
            tcsetattr(fd, SetArg::TCSANOW, &raw)?;
            Ok(Self { fd: owned, saved })
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            if let Err(e) = tcsetattr(&self.fd, SetArg::TCSADRAIN, &self.saved) {
                warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }

    pub(super) fn run(channel: Box<dyn ShellChannel>) -> Result<(), TransportError> {
        let stdin = io::stdin();
        let mut out = io::stdout().lock();
        bridge(channel, stdin.as_fd(), &mut out)
    }

    /// Drive `channel` from the terminal behind `terminal` until either side closes
    pub(super) fn bridge(
        mut channel: Box<dyn ShellChannel>,
        terminal: BorrowedFd<'_>,
        out: &mut dyn Write,
    ) -> Result<(), TransportError> {
        // Unbuffered: a buffered reader would swallow bytes poll() has already reported
        let mut local = File::from(terminal.try_clone_to_owned()?);

        out.write_all(BEGIN_BANNER)?;
        out.flush()?;

        let _raw = RawModeGuard::enter(terminal)?;
        channel.set_read_timeout(Some(Duration::ZERO))?;

        loop {
            let local_ready = wait_for_input(channel.readiness_fd(), local.as_fd())?;
            // libssh2 can hold decrypted data the socket no longer signals, so
            // the channel is read on every pass
            if let Flow::Closed = pump_remote(channel.as_mut(), out)? {
                break;
            }
            if local_ready {
                if let Flow::Closed = pump_local(&mut local, channel.as_mut())? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Wait until the socket or stdin is readable; returns whether stdin is
    fn wait_for_input(remote: Option<BorrowedFd<'_>>, local: BorrowedFd<'_>) -> io::Result<bool> {
        let mut fds = vec![PollFd::new(local, PollFlags::POLLIN)];
        if let Some(remote) = remote {
            fds.push(PollFd::new(remote, PollFlags::POLLIN));
        }
        match poll(&mut fds, PollTimeout::from(READINESS_TIMEOUT_MS)) {
            Ok(_) => Ok(fds[0]
                .revents()
                .is_some_and(|events| events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))),
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

mod threaded {
    use super::*;

    pub(super) fn run<R, W>(mut channel: Box<dyn ShellChannel>, mut input: R, mut output: W) -> Result<(), TransportError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        output.write_all(LINE_BUFFERED_BANNER)?;
        output.flush()?;

        channel.set_read_timeout(Some(READER_POLL))?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(channel.reader(), output, Arc::clone(&stop))?;

        let forwarded = forward_input(&mut input, channel.as_mut());
        if let Err(e) = channel.send_eof() {
            warn!("Failed to send EOF to remote shell: {}", e);
        }
        stop.store(true, Ordering::SeqCst);

        let copied = reader
            .join()
            .map_err(|_| TransportError::Channel("shell reader thread panicked".to_string()))?;
        forwarded?;
        copied?;
        Ok(())
    }

    fn forward_input(input: &mut dyn Read, channel: &mut dyn ShellChannel) -> io::Result<()> {
        loop {
            if let Flow::Closed = pump_local(input, channel)? {
                return Ok(());
            }
        }
    }

    pub(super) fn spawn_reader<W>(
        mut remote: Box<dyn Read + Send>,
        mut output: W,
        stop: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<io::Result<()>>>
    where
        W: Write + Send + 'static,
    {
        thread::Builder::new()
            .name("hostlink-shell-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; READER_CHUNK];
                let mut stopping_since = None;
                loop {
                    // A remote that never goes quiet must not outlive local EOF
                    if stop.load(Ordering::SeqCst) {
                        let since = *stopping_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= READER_DRAIN {
                            debug!("Shell reader stopping with remote output still flowing");
                            return Ok(());
                        }
                    }
                    match remote.read(&mut buf) {
                        Ok(0) => {
                            output.write_all(EOF_BANNER)?;
                            output.flush()?;
                            return Ok(());
                        }
                        Ok(n) => {
                            output.write_all(&buf[..n])?;
                            output.flush()?;
                        }
                        Err(e) if is_timeout(&e) => {
                            if stop.load(Ordering::SeqCst) {
                                return Ok(());
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
            })
    }
}
