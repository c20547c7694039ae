//! chemsync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment helpers and logging setup used by every
//! chemsync workspace member.
//!
//! # Example
//!
//! ```no_run
//! use chemsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{ChemsyncError, Result};
