//! Common functionality for pipewatch.
//!
//! This crate contains the pieces shared by every collector:
//!
//!  - [`time`]: normalization of upstream timestamps into UTC instants at the ingestion boundary.
//!  - [`window`]: the observation window calculator.
//!  - string based serde helpers, see [`impl_str_serde`].
#![warn(missing_docs)]
#![allow(clippy::derive_partial_eq_without_eq)]

mod macros;

pub mod time;
pub mod window;

pub use self::window::{ObservationWindow, WindowError, WindowPolicy};
