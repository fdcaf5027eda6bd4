//! Gastos Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the gastos workspace members.
//!
//! - **Logging**: one `tracing` subscriber setup for every binary, configurable
//!   from the environment.
//!
//! # Example
//!
//! ```no_run
//! use gastos_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("pipeline starting");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
