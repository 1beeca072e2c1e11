//! Global configuration parsing, validation, and server layout resolution.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Server build architectures shipped alongside the supervisor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Architecture {
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Arm64,
}

impl Architecture {
    /// Map an architecture name (as reported by `uname -m` or Rust's
    /// `std::env::consts::ARCH`) to a supported build.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnsupportedArch` for anything outside the two
    /// supported builds.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            other => Err(AppError::UnsupportedArch(other.to_owned())),
        }
    }

    /// Architecture of the running host.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnsupportedArch` when the host is not supported.
    pub fn detect() -> Result<Self> {
        Self::from_name(std::env::consts::ARCH)
    }

    /// Directory under the install root holding this build.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }
}

/// Which state artifacts are mirrored out of the server directory on exit.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PersistConfig {
    /// Subdirectory of the server working directory holding its state.
    #[serde(default = "default_state_subdir")]
    pub state_subdir: PathBuf,
    /// Individual database files copied from the state subdirectory.
    #[serde(default = "default_persist_files")]
    pub files: Vec<String>,
    /// Database directory copied recursively from the state subdirectory.
    #[serde(default = "default_persist_directory")]
    pub directory: String,
    /// Shared output directory, relative to the install root.
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            state_subdir: default_state_subdir(),
            files: default_persist_files(),
            directory: default_persist_directory(),
            destination: default_destination(),
        }
    }
}

fn default_state_subdir() -> PathBuf {
    PathBuf::from("state")
}

fn default_persist_files() -> Vec<String> {
    vec!["state.db".into(), "accounts.db".into()]
}

fn default_persist_directory() -> String {
    "db".into()
}

fn default_destination() -> PathBuf {
    PathBuf::from("shared")
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_executable_name() -> String {
    "server".into()
}

fn default_server_args() -> Vec<String> {
    vec!["--headless".into()]
}

fn default_channel_name() -> String {
    "server.fifo".into()
}

fn default_grace_period_ticks() -> u32 {
    10
}

fn default_poll_interval_millis() -> u64 {
    1000
}

fn default_settle_millis() -> u64 {
    1000
}

/// Supervisor configuration parsed from an optional `config.toml`.
///
/// Every field has a default, so an empty document is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WardenConfig {
    /// Directory containing the per-architecture server builds.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    /// File name of the server executable inside the architecture directory.
    #[serde(default = "default_executable_name")]
    pub executable_name: String,
    /// Startup flags passed to the server.
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
    /// File name of the control FIFO, created under the install root.
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
    /// Ticks the server gets to stop on its own before being signalled.
    /// The wall-clock grace period scales with `poll_interval_millis`.
    #[serde(default = "default_grace_period_ticks")]
    pub grace_period_ticks: u32,
    /// Polling unit for liveness checks and bounded input waits.
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Delay after spawning before the server must still be alive.
    #[serde(default = "default_settle_millis")]
    pub settle_millis: u64,
    /// Log swallowed best-effort failures at `warn` instead of `debug`.
    #[serde(default)]
    pub report_best_effort_failures: bool,
    /// State persistence settings.
    #[serde(default)]
    pub persist: PersistConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            executable_name: default_executable_name(),
            server_args: default_server_args(),
            channel_name: default_channel_name(),
            grace_period_ticks: default_grace_period_ticks(),
            poll_interval_millis: default_poll_interval_millis(),
            settle_millis: default_settle_millis(),
            report_best_effort_failures: false,
            persist: PersistConfig::default(),
        }
    }
}

impl WardenConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Polling unit used by the relay and the shutdown coordinator.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }

    /// Grace period before escalating to signals: `grace_period_ticks`
    /// ticks, saturating at [`Duration::MAX`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.tick()
            .checked_mul(self.grace_period_ticks)
            .unwrap_or(Duration::MAX)
    }

    /// Settle interval after spawning the server.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    /// Validate invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_millis == 0 {
            return Err(AppError::Config(
                "poll_interval_millis must be greater than zero".into(),
            ));
        }

        if self.executable_name.trim().is_empty() {
            return Err(AppError::Config("executable_name must not be empty".into()));
        }

        if self.channel_name.trim().is_empty() {
            return Err(AppError::Config("channel_name must not be empty".into()));
        }

        if self.persist.files.is_empty() && self.persist.directory.is_empty() {
            return Err(AppError::Config(
                "persist must name at least one file or a directory".into(),
            ));
        }

        Ok(())
    }
}

/// Concrete paths for one supervised run, derived from the configuration
/// and the selected architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLayout {
    /// Server executable.
    pub executable: PathBuf,
    /// Working directory the server is started in.
    pub working_dir: PathBuf,
    /// Control FIFO path.
    pub channel_path: PathBuf,
    /// Directory the persisted artifacts are read from.
    pub state_dir: PathBuf,
    /// Shared directory the persisted artifacts are written to.
    pub destination: PathBuf,
}

impl ServerLayout {
    /// Resolve all paths for `arch`. Touches nothing on disk.
    #[must_use]
    pub fn resolve(config: &WardenConfig, arch: Architecture) -> Self {
        let working_dir = config.install_root.join(arch.dir_name());
        Self {
            executable: working_dir.join(&config.executable_name),
            channel_path: config.install_root.join(&config.channel_name),
            state_dir: working_dir.join(&config.persist.state_subdir),
            destination: config.install_root.join(&config.persist.destination),
            working_dir,
        }
    }
}
