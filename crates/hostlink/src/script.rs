//! Script deployment: upload, mark executable, run

use crate::command::{self, CommandResult};
use crate::error::LinkError;
use crate::session::LinkSession;
use crate::transfer;
use crate::Outcome;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Directory scripts are uploaded to
pub const REMOTE_SCRIPT_DIR: &str = "/tmp";

/// Remote path for a script uploaded at `at`: `/tmp/<secs>.<micros>.sh`
pub fn remote_script_path(at: SystemTime) -> PathBuf {
    let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();
    PathBuf::from(format!(
        "{}/{}.{:06}.sh",
        REMOTE_SCRIPT_DIR,
        since_epoch.as_secs(),
        since_epoch.subsec_micros()
    ))
}

/// Upload `local_script`, make it executable and run it, streaming its
/// output to local stdout
pub fn run_script(session: &mut LinkSession, local_script: impl AsRef<Path>, sudo: bool) -> Outcome<CommandResult> {
    run_script_to(session, local_script, sudo, &mut io::stdout())
}

/// Like [`run_script`], streaming the script's output to `sink`
pub fn run_script_to(
    session: &mut LinkSession,
    local_script: impl AsRef<Path>,
    sudo: bool,
    sink: &mut dyn Write,
) -> Outcome<CommandResult> {
    let local_script = local_script.as_ref();
    let remote = remote_script_path(SystemTime::now());
    let remote_cmd = remote.to_string_lossy().into_owned();
    info!("Running script {} on {} as {}", local_script.display(), session.options().hostname, remote_cmd);

    transfer::upload(session, local_script, &remote)
        .then(|| command::command(session, &format!("chmod +x {}", remote_cmd), true))
        .bind(require_success)
        .then(|| command::run_command_to(session, &remote_cmd, sudo, Some(sink)))
}

/// A setup step that ran but exited non-zero stops the pipeline
fn require_success(result: CommandResult) -> Outcome<CommandResult> {
    if result.success() {
        return Outcome::Success(result);
    }
    let status = result
        .exit_code()
        .map_or_else(|| "no exit status".to_string(), |code| format!("exit status {}", code));
    Outcome::Failure(LinkError::command(
        result.command(),
        format!("{}: {}", status, result.stderr().text().trim_end()),
    ))
}
