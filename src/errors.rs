//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all fatal failure modes.
///
/// Every variant aborts the supervisor with exit code 1. Best-effort
/// runtime failures (forwarding a line, copying a state file) never
/// surface as an `AppError`.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Host architecture has no server build.
    UnsupportedArch(String),
    /// Server executable was not found at the resolved path.
    MissingExecutable(String),
    /// Control channel could not be created or opened.
    Channel(String),
    /// Server process failed to start or died during startup.
    Launch(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::UnsupportedArch(arch) => write!(f, "unsupported architecture: {arch}"),
            Self::MissingExecutable(msg) => write!(f, "missing executable: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Record a swallowed best-effort failure.
///
/// Failures are logged at `debug` unless `report` is set, in which case
/// they are raised to `warn`. Callers always continue afterwards.
pub(crate) fn note_best_effort_failure(report: bool, action: &str, err: &dyn Display) {
    if report {
        tracing::warn!(action, %err, "best-effort step failed");
    } else {
        tracing::debug!(action, %err, "best-effort step failed");
    }
}
