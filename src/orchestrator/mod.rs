//! Server orchestration modules.
//!
//! Covers launching the server behind its control channel, relaying
//! local input, the shutdown sequence, and the supervisor context that
//! ties them together.

pub mod launcher;
pub mod relay;
pub mod shutdown;
pub mod supervisor;

pub use supervisor::{supervise, Completion, Supervisor};
