//! Error reporting and logging facade for Pipewatch.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with [`logging`](LogConfig) and
//! [`sentry`](SentryConfig) configuration. Both implement `serde` traits, so they are read straight
//! from the configuration file.
//!
//! ```
//! # #[cfg(feature = "init")] {
//! use pipewatch_log::{LogConfig, SentryConfig};
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! pipewatch_log::init(&log_config, &SentryConfig::default());
//! # }
//! ```
//!
//! # Logging
//!
//! Use the five logging macros [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`]. They
//! are re-exported from `tracing` and accept structured fields before the message.
//!
//! ## Conventions
//!
//! Log messages start lowercase and end without punctuation. Choose the log level according to
//! these rules:
//!
//! - [`error!`] for bugs and invalid behavior. This is also reported to Sentry if enabled.
//! - [`warn!`] for degraded results, such as a failed environment or an incomplete listing.
//! - [`info!`] for messages relevant to the operator, such as the invocation summary.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! Every log about a failed scope carries the identifying key as a field and the error as
//! `error`:
//!
//! ```
//! use std::error::Error;
//! use std::io;
//!
//! let err = io::Error::other("connection reset");
//! pipewatch_log::warn!(
//!     environment = "prod-airflow",
//!     error = &err as &dyn Error,
//!     "failed to list dags",
//! );
//! ```
//!
//! # Testing
//!
//! For unit testing, call [`init_test!`] at the beginning of a test. It routes logs to the test
//! runner's output and enables all levels for the calling crate.
//!
//! ```
//! # #[cfg(feature = "test")]
//! pipewatch_log::init_test!();
//! ```

#![warn(missing_docs)]

mod config;
pub use config::*;

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
