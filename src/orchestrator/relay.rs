//! Command relay: forwards locally typed lines into the control channel.
//!
//! Each iteration checks cancellation and server liveness first, then waits
//! at most one tick for the next input line. The bounded wait keeps the
//! loop from spinning while still noticing a dead server or a termination
//! signal within one tick. Once input reaches end-of-stream the relay keeps
//! running, sleeping one tick per iteration, until the server exits.

use std::io::{BufRead, ErrorKind};

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::supervisor::Supervisor;
use crate::{AppError, Result};

/// Lines that end the relay after being forwarded.
pub const CONTROL_WORDS: [&str; 3] = ["shutdown", "quit", "exit"];

/// Buffered lines between the stdin thread and the relay.
const INPUT_BUFFER: usize = 16;

/// Whether `line` is exactly one of [`CONTROL_WORDS`] (case-sensitive).
#[must_use]
pub fn is_control_word(line: &[u8]) -> bool {
    CONTROL_WORDS.iter().any(|word| word.as_bytes() == line)
}

/// Why the relay loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The server is no longer running.
    ChildExited,
    /// A control word was forwarded; the server is expected to stop itself.
    ControlWord(String),
    /// The cancellation token fired; the shutdown sequence takes over.
    Cancelled,
}

/// Read standard input on a dedicated thread and deliver its lines.
///
/// Blocking reads on stdin cannot be cancelled, so they live on a plain
/// thread that never holds up runtime shutdown. The receiver closes on
/// end-of-input or on a read error.
///
/// # Errors
///
/// Returns `AppError::Io` if the reader thread cannot be spawned.
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel(INPUT_BUFFER);

    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || read_lines(std::io::stdin().lock(), &tx))
        .map_err(|err| AppError::Io(format!("failed to spawn stdin reader: {err}")))?;

    Ok(rx)
}

/// Split `reader` into raw lines and send them to `tx` until end of input,
/// a read error, or the receiver going away. Returns the number of lines
/// sent.
///
/// Lines are bytes, not text: the trailing `\n` (and a `\r` before it) is
/// stripped and everything else is passed through untouched. Must run
/// outside the async runtime.
pub fn read_lines(mut reader: impl BufRead, tx: &mpsc::Sender<Vec<u8>>) -> usize {
    let mut sent = 0;
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return sent,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                if tx.blocking_send(line).is_err() {
                    return sent;
                }
                sent += 1;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                debug!(%err, "input read failed; treating as end of input");
                return sent;
            }
        }
    }
}

/// Relay `input` into the supervisor's channel until the server exits, a
/// control word is forwarded, or the supervisor is cancelled.
pub async fn run(
    supervisor: &mut Supervisor,
    mut input: mpsc::Receiver<Vec<u8>>,
) -> RelayExit {
    let cancel = supervisor.cancel.clone();
    let tick = supervisor.timing.tick;

    loop {
        if cancel.is_cancelled() {
            return RelayExit::Cancelled;
        }
        if !supervisor.is_child_alive() {
            return RelayExit::ChildExited;
        }

        if !supervisor.input_active {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return RelayExit::Cancelled,
                () = tokio::time::sleep(tick) => continue,
            }
        }

        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return RelayExit::Cancelled,
            next = tokio::time::timeout(tick, input.recv()) => next,
        };

        match next {
            Ok(Some(line)) => {
                supervisor.forward(&line).await;
                if is_control_word(&line) {
                    let word = String::from_utf8_lossy(&line).into_owned();
                    info!(word = %word, "control word received");
                    return RelayExit::ControlWord(word);
                }
            }
            Ok(None) => {
                info!("input closed; waiting for server to exit");
                supervisor.input_active = false;
            }
            Err(_elapsed) => {}
        }
    }
}
