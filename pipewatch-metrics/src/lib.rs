//! Metric points as published to the monitoring backend.
//!
//! A [`MetricPoint`] is a named value with a unit, a set of [`Dimensions`] and an optional explicit
//! timestamp. Collectors push points into a [`MetricBatch`], which deduplicates points by name and
//! dimensions, and then [`flush`] the batch to a [`MetricSink`] in calls of bounded size.
#![warn(missing_docs)]

mod batch;
mod point;
mod sink;

pub use self::batch::*;
pub use self::point::*;
pub use self::sink::*;
