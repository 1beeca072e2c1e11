//! Shutdown coordinator.
//!
//! Drives the server from `Running` through a grace period to forced
//! termination:
//!
//! - `Running → GracePeriod`: send `shutdown` into the channel, then poll
//!   liveness once per tick until the grace period runs out.
//! - `GracePeriod → ForceStop`: `SIGTERM`, one tick, then `SIGKILL`.
//! - `→ Exited`: control returns to the driver, which lets the supervisor
//!   context drop and run teardown.
//!
//! Termination signals never run business logic directly; the first one
//! cancels the token shared with the rest of the supervisor and any later
//! ones are logged.

use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::supervisor::Supervisor;

/// Command written into the channel to request a cooperative stop.
pub const SHUTDOWN_COMMAND: &str = "shutdown";

/// States of the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Server running normally.
    Running,
    /// `shutdown` sent; waiting for a cooperative exit.
    GracePeriod,
    /// Grace period elapsed; signals are being sent.
    ForceStop,
    /// Server gone.
    Exited,
}

/// How the server was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The server exited within the grace period.
    Graceful,
    /// The server exited after `SIGTERM`.
    Terminated,
    /// The server had to be killed with `SIGKILL`.
    Killed,
}

fn enter(phase: &mut ShutdownPhase, next: ShutdownPhase) {
    info!(from = ?*phase, to = ?next, "shutdown phase");
    *phase = next;
}

/// Stop the server: cooperative command first, signals after the grace
/// period.
pub async fn coordinate(supervisor: &mut Supervisor) -> ShutdownOutcome {
    let timing = supervisor.timing();
    let started = Instant::now();
    let mut phase = ShutdownPhase::Running;

    enter(&mut phase, ShutdownPhase::GracePeriod);
    supervisor.forward(SHUTDOWN_COMMAND.as_bytes()).await;

    let deadline = started + timing.grace;
    if wait_for_exit(supervisor, deadline, timing.tick).await {
        enter(&mut phase, ShutdownPhase::Exited);
        info!(elapsed_ms = elapsed_ms(started), "server stopped gracefully");
        return ShutdownOutcome::Graceful;
    }

    enter(&mut phase, ShutdownPhase::ForceStop);
    warn!(
        grace_ms = millis(timing.grace),
        "server ignored shutdown command; terminating"
    );
    supervisor.signal_child(Signal::SIGTERM);
    tokio::time::sleep(timing.tick).await;

    let outcome = if supervisor.is_child_alive() {
        warn!("server survived SIGTERM; killing");
        supervisor.kill_child().await;
        ShutdownOutcome::Killed
    } else {
        ShutdownOutcome::Terminated
    };

    enter(&mut phase, ShutdownPhase::Exited);
    info!(elapsed_ms = elapsed_ms(started), ?outcome, "server stopped");
    outcome
}

/// Poll liveness once per tick until `deadline`. Returns `true` once the
/// server is gone.
async fn wait_for_exit(supervisor: &mut Supervisor, deadline: Instant, tick: Duration) -> bool {
    loop {
        if !supervisor.is_child_alive() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(tick.min(deadline - now)).await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    millis(started.elapsed())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Cancel `cancel` when `SIGINT` or `SIGTERM` arrives.
///
/// The listener stays installed for the rest of the run: later signals are
/// logged as repeats while the shutdown sequence is already under way.
#[must_use]
pub fn cancel_on_signal(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        tokio::join!(listen_for_signals(tx), watch_signals(&cancel, rx));
    })
}

const SIGNAL_BUFFER: usize = 4;

/// Consume signal names from `signals`: the first cancels `cancel`, later
/// ones are only logged. Returns the number of signals seen once the
/// source closes.
pub async fn watch_signals(
    cancel: &CancellationToken,
    mut signals: mpsc::Receiver<&'static str>,
) -> usize {
    let mut received = 0;
    while let Some(signal) = signals.recv().await {
        received += 1;
        if received == 1 {
            info!(signal, "termination signal received");
            cancel.cancel();
        } else {
            warn!(
                signal,
                received, "termination signal repeated; shutdown already in progress"
            );
        }
    }
    received
}

async fn listen_for_signals(tx: mpsc::Sender<&'static str>) {
    let mut sigterm = match unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(err) => {
            warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
            None
        }
    };

    loop {
        let signal = match sigterm.as_mut() {
            Some(sigterm) => tokio::select! {
                res = tokio::signal::ctrl_c() => res.ok().map(|()| "SIGINT"),
                res = sigterm.recv() => res.map(|()| "SIGTERM"),
            },
            None => tokio::signal::ctrl_c().await.ok().map(|()| "SIGINT"),
        };
        let Some(signal) = signal else {
            warn!("signal listener stopped");
            return;
        };
        if tx.send(signal).await.is_err() {
            return;
        }
    }
}
