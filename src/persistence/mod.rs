//! Persistence layer modules.
//!
//! The server keeps its databases inside its own working directory; on
//! exit they are mirrored into a shared location that survives upgrades
//! of the per-architecture build directories.

pub mod mirror;

pub use mirror::{PersistReport, Persister};
