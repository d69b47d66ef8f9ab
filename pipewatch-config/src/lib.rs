//! Configuration for the pipewatch collectors.
//!
//! Configuration is read from an optional YAML file named by `PIPEWATCH_CONFIG` and then
//! overridden by environment variables, see [`OverridableConfig`]. Every section has defaults, so
//! an empty file and no variables yield a valid configuration for the batch job collectors.
//!
//! ```yaml
//! collectors: [dpu_cost, job_status, run_summary, dag_status]
//! workflow:
//!   environments: [prod-airflow]
//! limits:
//!   max_workers: 10
//! rates:
//!   default: 0.44
//!   G.1X: 0.44
//!   G.2X: 0.88
//! ```
//!
//! Invalid configuration fails the whole invocation, see [`ConfigError`].
#![warn(missing_docs)]

mod config;
mod env_override;

pub use self::config::*;
pub use self::env_override::*;
