use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobRunRecord, WorkerClass};

/// Worker classes that must have an explicit rate.
pub const REQUIRED_TIERS: &[WorkerClass] = &[WorkerClass::G1X, WorkerClass::G2X];

const SECONDS_PER_HOUR: f64 = 3600.0;

/// An error returned for an unusable rate table.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RateError {
    /// A required tier has no rate.
    #[error("missing rate for worker class {0}")]
    MissingTier(String),
    /// A rate is negative or not a finite number.
    #[error("invalid rate {rate} for {class}")]
    InvalidRate {
        /// The worker class, or `default`.
        class: String,
        /// The offending rate.
        rate: f64,
    },
}

/// Currency per resource-hour for each worker class.
///
/// Serialized as a flat map of worker class to rate, plus a `default` entry used for every class
/// without its own rate:
///
/// ```yaml
/// default: 0.44
/// G.1X: 0.44
/// G.2X: 0.88
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RateTable {
    /// Rate for worker classes without an explicit entry.
    #[serde(default = "default_rate")]
    pub default: f64,
    /// Rates keyed by worker class name.
    #[serde(flatten)]
    pub workers: BTreeMap<String, f64>,
}

fn default_rate() -> f64 {
    0.44
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            default: default_rate(),
            workers: BTreeMap::from([("G.1X".to_owned(), 0.44), ("G.2X".to_owned(), 0.88)]),
        }
    }
}

impl RateTable {
    /// Returns the rate for a worker class, falling back to the default rate.
    pub fn rate(&self, class: &WorkerClass) -> f64 {
        self.workers
            .get(class.as_str())
            .copied()
            .unwrap_or(self.default)
    }

    /// Checks that all required tiers are present and every rate is a non-negative number.
    pub fn validate(&self) -> Result<(), RateError> {
        for tier in REQUIRED_TIERS {
            if !self.workers.contains_key(tier.as_str()) {
                return Err(RateError::MissingTier(tier.to_string()));
            }
        }

        let all = std::iter::once(("default", self.default))
            .chain(self.workers.iter().map(|(k, v)| (k.as_str(), *v)));

        for (class, rate) in all {
            if !rate.is_finite() || rate < 0.0 {
                return Err(RateError::InvalidRate {
                    class: class.to_owned(),
                    rate,
                });
            }
        }

        Ok(())
    }
}

/// Resource time and estimated cost of a single run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CostEstimate {
    /// Resource time in seconds.
    pub dpu_seconds: f64,
    /// Estimated cost, rounded to cents.
    pub cost: f64,
}

/// Rounds half away from zero to two decimal places.
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Estimates resource time and cost of a run.
///
/// A directly reported resource time is billed as is. Otherwise the resource time is derived as
/// execution time times allocated capacity, with missing fields counting as zero. The cost is
/// rounded to cents per run, before any summation.
pub fn estimate_cost(record: &JobRunRecord, rates: &RateTable) -> CostEstimate {
    let rate = rates.rate(&record.worker_class);

    match record.dpu_seconds {
        Some(dpu_seconds) => CostEstimate {
            dpu_seconds,
            cost: round_cents(rate * (dpu_seconds / SECONDS_PER_HOUR)),
        },
        None => {
            let execution_time = record.execution_time.unwrap_or(0.0);
            let capacity = record.allocated_capacity.unwrap_or(0.0);

            CostEstimate {
                dpu_seconds: execution_time * capacity,
                cost: round_cents(rate * (execution_time / SECONDS_PER_HOUR) * capacity),
            }
        }
    }
}
