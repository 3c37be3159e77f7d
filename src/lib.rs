//! Configurator - applies on-disk configuration artifacts to platform services.
//!
//! Each pass walks one or more configuration directories, hands every
//! artifact that is not already applied to a handler that talks to the
//! owning service, and records completion as timestamp stamps so unchanged
//! artifacts are skipped after a restart.

pub mod artifact;
pub mod bus;
pub mod cache;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod plan;
pub mod runner;
pub mod scanner;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use artifact::{ConfigKind, PassOutcome, RunMode};
pub use error::{ConfigError, Result, Status};
