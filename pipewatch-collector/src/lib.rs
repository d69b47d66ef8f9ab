//! Collection of pipeline telemetry in periodic invocations.
//!
//! An invocation computes an observation window per collector, lists jobs and runs from the
//! upstream APIs, filters and aggregates the runs, shapes the aggregates into metric points and
//! publishes them to the metrics backend:
//!
//! ```text
//! trigger -> window -> fetch (paginated) -> filter -> aggregate -> shape -> sink
//! ```
//!
//! The upstream services are reached through the [`JobSource`], [`WorkflowSource`] and
//! [`MetricSink`](pipewatch_metrics::MetricSink) traits. [`Orchestrator`] drives one invocation
//! with bounded concurrency and a time budget, and returns an [`InvocationReport`].
#![warn(missing_docs)]

mod http;
mod orchestrator;
mod pagination;
mod report;
mod shaper;
mod sink;
mod statsd;
mod upstream;

pub use self::http::*;
pub use self::orchestrator::*;
pub use self::pagination::*;
pub use self::report::*;
pub use self::shaper::*;
pub use self::sink::*;
pub use self::upstream::*;
