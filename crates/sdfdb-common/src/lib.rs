//! sdfdb common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient pieces shared by the sdfdb workspace members:
//!
//! - **Logging**: `tracing` subscriber setup (console, rolling file, JSON)
//! - **Environment**: typed lookups of configuration variables
//! - **Errors**: the error type returned by the environment lookups
//!
//! # Example
//!
//! ```no_run
//! use sdfdb_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
