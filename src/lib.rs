#![forbid(unsafe_code)]

//! `server-warden` — supervisor for a long-running server process that
//! reads its console commands from a named pipe.

#[cfg(not(unix))]
compile_error!("server-warden drives its server through a named pipe and POSIX signals and only builds for unix targets");

pub mod channel;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod persistence;

pub use config::WardenConfig;
pub use errors::{AppError, Result};
