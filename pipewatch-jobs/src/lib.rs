//! Job run records and the aggregation engine.
//!
//! Records are normalized before they reach this crate: every [`JobRunRecord`] carries a UTC start
//! instant, so the [`filter`] never compares timestamps of different representations.
//!
//! The flow within one invocation is:
//!
//! 1. [`filter_runs`] narrows fetched records to the observation window.
//! 2. An aggregate folds the remaining records: [`JobAggregates`] for per-job status counts and
//!    costs, [`RunSummary`] for fleet-wide counters, [`EnvironmentAggregate`] for DAG runs of one
//!    workflow environment.
//! 3. The aggregates are handed to the metric shaper and discarded afterwards.
#![warn(missing_docs)]

mod aggregate;
mod cost;
mod environment;
mod filter;
mod record;

pub use self::aggregate::*;
pub use self::cost::*;
pub use self::environment::*;
pub use self::filter::*;
pub use self::record::*;
