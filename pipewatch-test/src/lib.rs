//! Helpers for testing the collectors.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`pipewatch_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - Prefer the in-memory fakes in [`fakes`] for orchestration logic. Use the servers in [`mock`]
//!    to exercise the HTTP clients end to end.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     pipewatch_test::setup();
//!
//!     pipewatch_log::debug!("hello, world!");
//! }
//! ```

#![allow(clippy::derive_partial_eq_without_eq)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use pipewatch_config::{Config, OverridableConfig};
use pipewatch_jobs::{JobRunRecord, RunStatus};

pub mod fakes;
pub mod mock;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    pipewatch_log::init_test!();
}

/// Returns a UTC instant on the 30th of June 2024.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, hour, minute, 0)
        .single()
        .expect("valid fixture time")
}

/// Creates a job run without resource accounting.
pub fn job_run(job: &str, run_id: &str, started_on: DateTime<Utc>, status: RunStatus) -> JobRunRecord {
    JobRunRecord::new(job, run_id, started_on, status)
}

/// Creates a job run that reports its resource time directly.
pub fn costed_run(
    job: &str,
    run_id: &str,
    started_on: DateTime<Utc>,
    status: RunStatus,
    dpu_seconds: f64,
) -> JobRunRecord {
    JobRunRecord {
        dpu_seconds: Some(dpu_seconds),
        ..JobRunRecord::new(job, run_id, started_on, status)
    }
}

/// Creates a DAG run of an environment.
pub fn dag_run(
    environment: &str,
    dag_id: &str,
    run_id: &str,
    started_on: DateTime<Utc>,
    status: RunStatus,
) -> JobRunRecord {
    JobRunRecord {
        environment: Some(environment.to_owned()),
        ..JobRunRecord::new(dag_id, run_id, started_on, status)
    }
}

/// Parses a configuration from YAML without environment overrides.
pub fn config(yaml: &str) -> Arc<Config> {
    let config = Config::from_yaml_str(yaml, OverridableConfig::default())
        .expect("valid test configuration");
    Arc::new(config)
}
