//! Control channel, the named FIFO the server reads its console input from.
//!
//! The supervisor is the only writer. The FIFO is created once at startup
//! and removed once during teardown; [`Channel::destroy`] is idempotent
//! and never fails so it can run from any exit path.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::net::unix::pipe;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Supervisor-side handle to the control FIFO.
#[derive(Debug)]
pub struct Channel {
    path: PathBuf,
    writer: Option<pipe::Sender>,
    created: bool,
    // Set while the pipe holds the unterminated front of a line.
    mid_line: bool,
}

impl Channel {
    /// Describe a channel at `path` without touching the file system.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            created: false,
            mid_line: false,
        }
    }

    /// FIFO location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the supervisor currently holds a write handle.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Remove any stale object at the channel path and create a fresh FIFO.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the stale object cannot be removed or
    /// `mkfifo` fails.
    pub fn create(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed stale channel"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(AppError::Channel(format!(
                    "cannot remove stale object at {}: {err}",
                    self.path.display()
                )));
            }
        }

        mkfifo(&self.path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|err| {
            AppError::Channel(format!(
                "failed to create fifo at {}: {err}",
                self.path.display()
            ))
        })?;
        self.created = true;

        info!(path = %self.path.display(), "control channel created");
        Ok(())
    }

    /// Open the supervisor's persistent write handle.
    ///
    /// Opening is non-blocking and therefore only succeeds once a reader
    /// holds the other end.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if no reader is attached or the open
    /// fails for any other reason.
    pub fn open_writer(&mut self) -> Result<()> {
        let sender = pipe::OpenOptions::new()
            .open_sender(&self.path)
            .map_err(|err| {
                AppError::Channel(format!(
                    "failed to open writer on {}: {err}",
                    self.path.display()
                ))
            })?;
        self.writer = Some(sender);
        Ok(())
    }

    /// Write one line, terminated by `\n`, into the channel.
    ///
    /// The bytes are written verbatim. Progress is tracked across calls: if
    /// a previous write was cancelled partway through a line, that fragment
    /// is terminated first so it can never run into `line`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` when the writer is closed, or
    /// `AppError::Io` when the write itself fails (e.g. the reader is gone).
    pub async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| AppError::Channel("writer is not open".into()))?;

        if self.mid_line {
            debug!("terminating partially written line");
            write_some(writer, b"\n", &mut self.mid_line).await?;
        }

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        write_some(writer, &buf, &mut self.mid_line).await
    }

    /// Close the write handle and remove the FIFO. Errors are swallowed.
    pub fn destroy(&mut self) {
        drop(self.writer.take());
        self.mid_line = false;

        if !self.created {
            return;
        }
        self.created = false;

        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "control channel removed"),
            Err(err) => debug!(path = %self.path.display(), %err, "channel removal skipped"),
        }
    }
}

/// Write all of `buf`, keeping `mid_line` accurate at every await point so
/// a cancelled write leaves a record of the torn line.
async fn write_some(writer: &pipe::Sender, buf: &[u8], mid_line: &mut bool) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        writer.writable().await?;
        match writer.try_write(&buf[written..]) {
            Ok(n) => {
                written += n;
                *mid_line = buf[..written].last() != Some(&b'\n');
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
