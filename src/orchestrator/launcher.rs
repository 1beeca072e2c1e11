//! Server process launcher.
//!
//! Opening a FIFO blocks until both ends are present, so the read end that
//! becomes the server's stdin cannot be opened before some writer exists,
//! and the supervisor's own non-blocking writer cannot be opened before a
//! reader exists. A throwaway placeholder writer, opened on a blocking
//! task, breaks that circle:
//!
//! 1. placeholder writer blocks in `open` on a blocking task;
//! 2. the read end is opened, completing the rendezvous, and handed to the
//!    server as stdin;
//! 3. the supervisor opens its persistent writer (a reader now exists)
//!    and drops its own copy of the read end;
//! 4. the placeholder task is joined and its handle closed;
//! 5. after a settle interval the server must still be alive.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::fcntl::OFlag;
use tokio::process::{Child, Command};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::channel::Channel;
use crate::{AppError, Result};

/// Everything needed to start the server process.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    /// Server executable.
    pub executable: &'a Path,
    /// Startup flags.
    pub args: &'a [String],
    /// Working directory of the server.
    pub working_dir: &'a Path,
    /// Delay before the server must still be alive.
    pub settle: Duration,
}

/// Check that the server executable exists.
///
/// # Errors
///
/// Returns `AppError::MissingExecutable` when `path` is not a regular file.
pub fn verify_executable(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(AppError::MissingExecutable(format!(
            "server executable not found at {}",
            path.display()
        )))
    }
}

/// Start the server with its stdin attached to `channel` and open the
/// supervisor's writer on the channel.
///
/// The returned child has `kill_on_drop(true)`: any error after the spawn
/// drops it, so a failed launch never leaves a server running.
///
/// # Errors
///
/// - `AppError::MissingExecutable`: the executable vanished.
/// - `AppError::Channel`: the FIFO ends could not be opened.
/// - `AppError::Launch`: the spawn failed or the server died while settling.
pub async fn launch(channel: &mut Channel, spec: &LaunchSpec<'_>) -> Result<Child> {
    let span = info_span!("launch", executable = %spec.executable.display());
    launch_inner(channel, spec).instrument(span).await
}

async fn launch_inner(channel: &mut Channel, spec: &LaunchSpec<'_>) -> Result<Child> {
    verify_executable(spec.executable)?;

    let path = channel.path().to_path_buf();
    let placeholder = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || OpenOptions::new().write(true).open(path))
    };

    let reader = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || File::open(path))
            .await
            .map_err(|err| AppError::Launch(format!("channel reader task failed: {err}")))?
    };

    let reader = match reader {
        Ok(file) => file,
        Err(err) => {
            release_placeholder(&path);
            // Result is irrelevant; the join only guarantees the task is gone.
            let _ = placeholder.await;
            return Err(AppError::Channel(format!(
                "failed to open read end of {}: {err}",
                path.display()
            )));
        }
    };

    let placeholder = placeholder
        .await
        .map_err(|err| AppError::Launch(format!("placeholder writer task failed: {err}")))?
        .map_err(|err| AppError::Channel(format!("placeholder writer failed: {err}")))?;
    debug!("placeholder writer attached");

    // Our copy of the read end keeps a reader attached until the
    // persistent writer is open, even if the server dies immediately.
    let server_stdin = reader
        .try_clone()
        .map_err(|err| AppError::Channel(format!("failed to share read end: {err}")))?;

    // Own process group: a terminal Ctrl-C reaches only the supervisor,
    // which then stops the server through the channel.
    let mut child = Command::new(spec.executable)
        .args(spec.args)
        .current_dir(spec.working_dir)
        .stdin(Stdio::from(server_stdin))
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Launch(format!(
                "failed to spawn {}: {err}",
                spec.executable.display()
            ))
        })?;

    info!(pid = child.id().unwrap_or(0), "server process spawned");

    channel.open_writer()?;
    drop(reader);
    drop(placeholder);
    debug!("placeholder writer released");

    tokio::time::sleep(spec.settle).await;

    match child.try_wait() {
        Ok(None) => Ok(child),
        Ok(Some(status)) => Err(AppError::Launch(format!(
            "server exited during startup ({status})"
        ))),
        Err(err) => Err(AppError::Launch(format!(
            "cannot query server status: {err}"
        ))),
    }
}

/// Unblock a placeholder writer stuck in `open` by briefly attaching a
/// non-blocking reader.
fn release_placeholder(path: &Path) {
    match OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
    {
        Ok(file) => drop(file),
        Err(err) => warn!(%err, "could not release placeholder writer"),
    }
}
