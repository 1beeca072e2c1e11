#![forbid(unsafe_code)]

//! `server-warden` — server supervisor binary.
//!
//! Launches the server build for the host architecture, relays console
//! lines typed on stdin into its control pipe, and on `SIGINT`/`SIGTERM`
//! stops it gracefully before persisting its state.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use server_warden::config::{Architecture, WardenConfig};
use server_warden::orchestrator::{relay, shutdown, supervise};
use server_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "server-warden", about = "Server process supervisor", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the install root containing the per-architecture builds.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Run the build for this architecture instead of the host's.
    #[arg(long)]
    arch: Option<String>,

    /// Ticks the server gets to stop before it is signalled.
    #[arg(long, env = "WARDEN_GRACE_PERIOD")]
    grace_period: Option<u32>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("server-warden: {err}");
        return ExitCode::from(1);
    }

    match bootstrap(&args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(%err, "supervisor failed");
            ExitCode::from(1)
        }
    }
}

fn bootstrap(args: &Cli) -> Result<u8> {
    let config = load_config(args)?;
    let arch = match args.arch.as_deref() {
        Some(name) => Architecture::from_name(name)?,
        None => Architecture::detect()?,
    };
    info!(arch = arch.dir_name(), "server-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(&config, arch))
}

fn load_config(args: &Cli) -> Result<WardenConfig> {
    let mut config = match &args.config {
        Some(path) => WardenConfig::load_from_path(path)?,
        None => WardenConfig::default(),
    };

    if let Some(root) = &args.root {
        config.install_root.clone_from(root);
    }
    if let Some(grace) = args.grace_period {
        config.grace_period_ticks = grace;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: &WardenConfig, arch: Architecture) -> Result<u8> {
    let cancel = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());
    let input = relay::spawn_stdin_reader()?;

    let completion = supervise(config, arch, input, cancel).await;
    signals.abort();

    let completion = completion?;
    info!(?completion, "server-warden shut down");
    Ok(completion.exit_code())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
