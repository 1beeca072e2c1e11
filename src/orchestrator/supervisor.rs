//! Supervisor context and top-level driver.
//!
//! [`Supervisor`] owns every piece of per-run state: the control channel,
//! the server process, whether local input is still open, and the
//! cancellation token fed by the signal listener. Teardown (channel
//! removal, then state persistence) runs from `Drop`, so it happens exactly
//! once on every exit path, including startup failures.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::launcher::{self, LaunchSpec};
use super::relay::{self, RelayExit};
use super::shutdown::{self, ShutdownOutcome};
use crate::channel::Channel;
use crate::config::{Architecture, ServerLayout, WardenConfig};
use crate::errors::note_best_effort_failure;
use crate::persistence::{PersistReport, Persister};
use crate::{AppError, Result};

/// Polling and escalation intervals for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Liveness polling unit and bounded input wait.
    pub tick: Duration,
    /// Time allowed for a cooperative stop.
    pub grace: Duration,
    /// Startup settle interval.
    pub settle: Duration,
}

impl Timing {
    /// Intervals taken from the configuration.
    #[must_use]
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            tick: config.tick(),
            grace: config.grace_period(),
            settle: config.settle(),
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A termination signal triggered the shutdown sequence.
    Shutdown(ShutdownOutcome),
    /// The server exited on its own (or after a control word).
    Exited(ExitStatus),
}

impl Completion {
    /// Process exit code the supervisor reports for this completion.
    ///
    /// A signal-driven shutdown is always `0`. Otherwise the server's own
    /// code is propagated, with `128 + signal` for a signal death.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Shutdown(_) => 0,
            Self::Exited(status) => status_exit_code(status),
        }
    }
}

fn status_exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code).unwrap_or(1);
    }
    status
        .signal()
        .and_then(|sig| u8::try_from(128 + sig).ok())
        .unwrap_or(1)
}

/// Per-run supervisor state.
#[derive(Debug)]
pub struct Supervisor {
    pub(crate) channel: Channel,
    pub(crate) child: Option<Child>,
    pub(crate) input_active: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) timing: Timing,
    pub(crate) report_failures: bool,
    layout: ServerLayout,
    server_args: Vec<String>,
    persister: Persister,
    torn_down: bool,
}

impl Supervisor {
    /// Build the context for `layout`. Nothing is created on disk until
    /// [`Supervisor::start`]; teardown is armed from this point on.
    #[must_use]
    pub fn new(config: &WardenConfig, layout: ServerLayout, cancel: CancellationToken) -> Self {
        let persister =
            Persister::for_layout(&layout, &config.persist, config.report_best_effort_failures);
        Self {
            channel: Channel::new(&layout.channel_path),
            child: None,
            input_active: true,
            cancel,
            timing: Timing::from_config(config),
            report_failures: config.report_best_effort_failures,
            server_args: config.server_args.clone(),
            layout,
            persister,
            torn_down: false,
        }
    }

    /// Create the control channel and launch the server.
    ///
    /// # Errors
    ///
    /// Propagates fatal channel and launch errors.
    pub async fn start(&mut self) -> Result<()> {
        self.channel.create()?;

        let spec = LaunchSpec {
            executable: &self.layout.executable,
            args: &self.server_args,
            working_dir: &self.layout.working_dir,
            settle: self.timing.settle,
        };
        let child = launcher::launch(&mut self.channel, &spec).await?;
        self.child = Some(child);
        Ok(())
    }

    /// Resolved paths of this run.
    #[must_use]
    pub fn layout(&self) -> &ServerLayout {
        &self.layout
    }

    /// Intervals of this run.
    #[must_use]
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Whether local input is still being read.
    #[must_use]
    pub fn input_active(&self) -> bool {
        self.input_active
    }

    /// Process id of the server while it has not been reaped.
    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Non-blocking liveness check.
    pub fn is_child_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(%status, "server is no longer running");
                false
            }
            Err(err) => {
                warn!(%err, "failed to poll server status");
                false
            }
        }
    }

    /// Write `line` into the channel, bounded by one tick. Failures are
    /// swallowed; returns whether the line was delivered.
    pub async fn forward(&mut self, line: &[u8]) -> bool {
        let tick = self.timing.tick;
        match tokio::time::timeout(tick, self.channel.send_line(line)).await {
            Ok(Ok(())) => {
                debug!(line = %String::from_utf8_lossy(line), "forwarded to server");
                true
            }
            Ok(Err(err)) => {
                note_best_effort_failure(self.report_failures, "forward line", &err);
                false
            }
            Err(_elapsed) => {
                note_best_effort_failure(
                    self.report_failures,
                    "forward line",
                    &"channel write timed out",
                );
                false
            }
        }
    }

    /// Deliver `signal` to the server. Best-effort.
    pub fn signal_child(&self, signal: Signal) {
        let Some(pid) = self.child_pid().and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), signal) {
            note_best_effort_failure(self.report_failures, "signal server", &err);
        } else {
            info!(pid, ?signal, "signal sent to server");
        }
    }

    /// Send `SIGKILL` and reap the server. Best-effort.
    pub async fn kill_child(&mut self) {
        let report = self.report_failures;
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.kill().await {
                note_best_effort_failure(report, "kill server", &err);
            }
        }
    }

    /// Wait for the server to exit and consume its status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` when no server was started, or
    /// `AppError::Io` when waiting fails.
    pub async fn wait_child(&mut self) -> Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| AppError::Launch("server was never started".into()))?;
        Ok(child.wait().await?)
    }

    /// Remove the channel, then persist state. Runs at most once; later
    /// calls return `None`.
    pub fn teardown(&mut self) -> Option<PersistReport> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;

        if self.is_child_alive() {
            if let Some(child) = self.child.as_mut() {
                if let Err(err) = child.start_kill() {
                    note_best_effort_failure(self.report_failures, "kill server", &err);
                }
            }
        }

        self.channel.destroy();
        Some(self.persister.persist())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Run one full supervision cycle.
///
/// Resolves the layout for `arch`, verifies the executable (before
/// anything is created on disk), starts the server, relays `input` until
/// the relay ends, then either runs the shutdown sequence (on
/// cancellation) or waits for the server to exit. Teardown runs when the
/// supervisor context goes out of scope.
///
/// # Errors
///
/// Returns fatal startup errors.
pub async fn supervise(
    config: &WardenConfig,
    arch: Architecture,
    input: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) -> Result<Completion> {
    let layout = ServerLayout::resolve(config, arch);
    launcher::verify_executable(&layout.executable)?;

    let mut supervisor = Supervisor::new(config, layout, cancel);
    let span = info_span!("supervise", arch = arch.dir_name());
    drive(&mut supervisor, input).instrument(span).await
}

/// Start the server and carry the run through to completion.
///
/// # Errors
///
/// Returns fatal startup errors from [`Supervisor::start`].
pub async fn drive(
    supervisor: &mut Supervisor,
    input: mpsc::Receiver<Vec<u8>>,
) -> Result<Completion> {
    supervisor.start().await?;

    match relay::run(supervisor, input).await {
        RelayExit::Cancelled => {
            let outcome = shutdown::coordinate(supervisor).await;
            return Ok(Completion::Shutdown(outcome));
        }
        RelayExit::ControlWord(word) => {
            info!(word = %word, "control word relayed; waiting for server");
        }
        RelayExit::ChildExited => info!("server exited"),
    }

    let cancel = supervisor.cancel.clone();
    let waited = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        status = supervisor.wait_child() => Some(status),
    };

    match waited {
        Some(status) => {
            let status = status?;
            info!(%status, "server process finished");
            Ok(Completion::Exited(status))
        }
        None => Ok(Completion::Shutdown(shutdown::coordinate(supervisor).await)),
    }
}
