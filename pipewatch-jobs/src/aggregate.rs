use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::Serialize;

use crate::{CostEstimate, JobRunRecord, RateTable, RunStatus, estimate_cost};

/// Run counts by status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Runs in progress.
    pub running: u64,
    /// Successful runs.
    pub succeeded: u64,
    /// Failed runs.
    pub failed: u64,
    /// Canceled runs.
    pub canceled: u64,
}

impl StatusCounts {
    /// Increments the bucket for `status`.
    ///
    /// Returns `false` for unrecognized states, which increment nothing.
    pub fn record(&mut self, status: &RunStatus) -> bool {
        let bucket = match status {
            RunStatus::Running => &mut self.running,
            RunStatus::Succeeded => &mut self.succeeded,
            RunStatus::Failed => &mut self.failed,
            RunStatus::Canceled => &mut self.canceled,
            RunStatus::Other(_) => return false,
        };

        *bucket += 1;
        true
    }

    /// Adds all counts of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.running += other.running;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.canceled += other.canceled;
    }
}

/// Accumulated status counts and costs of one job within one invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct JobAggregate {
    /// Counts by status.
    pub counts: StatusCounts,
    /// Cumulative resource time in seconds.
    pub dpu_seconds: f64,
    /// Cumulative estimated cost, summed from per-run rounded costs.
    pub cost: f64,
    /// Number of runs folded into this aggregate, including unrecognized states.
    pub runs: u64,
}

impl JobAggregate {
    fn add_cost(&mut self, estimate: CostEstimate) {
        self.dpu_seconds += estimate.dpu_seconds;
        self.cost += estimate.cost;
    }

    fn merge(&mut self, other: &Self) {
        self.counts.merge(&other.counts);
        self.dpu_seconds += other.dpu_seconds;
        self.cost += other.cost;
        self.runs += other.runs;
    }
}

/// Per-job aggregates, keyed and iterated by job name.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobAggregates {
    jobs: BTreeMap<String, JobAggregate>,
}

impl JobAggregates {
    /// Creates an empty set of aggregates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates aggregates with a zeroed entry for every given job.
    ///
    /// Seeded jobs report zero counts even when none of their runs fall into the window.
    pub fn seeded<I, S>(jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jobs: jobs
                .into_iter()
                .map(|job| (job.into(), JobAggregate::default()))
                .collect(),
        }
    }

    fn entry(&mut self, job: &str) -> &mut JobAggregate {
        self.jobs.entry(job.to_owned()).or_default()
    }

    /// Counts the status of a record.
    pub fn insert(&mut self, record: &JobRunRecord) {
        let aggregate = self.entry(&record.job);
        aggregate.runs += 1;
        aggregate.counts.record(&record.status);
    }

    /// Counts the status of a record and accumulates its resource time and cost.
    pub fn insert_costed(&mut self, record: &JobRunRecord, rates: &RateTable) {
        let estimate = estimate_cost(record, rates);
        self.insert(record);
        self.entry(&record.job).add_cost(estimate);
    }

    /// Folds all aggregates of `other` into this one.
    pub fn merge(&mut self, other: Self) {
        for (job, aggregate) in other.jobs {
            match self.jobs.entry(job) {
                btree_map::Entry::Vacant(entry) => {
                    entry.insert(aggregate);
                }
                btree_map::Entry::Occupied(mut entry) => entry.get_mut().merge(&aggregate),
            }
        }
    }

    /// Returns the aggregate of a job.
    pub fn get(&self, job: &str) -> Option<&JobAggregate> {
        self.jobs.get(job)
    }

    /// Iterates all jobs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobAggregate)> {
        self.jobs.iter().map(|(job, aggregate)| (job.as_str(), aggregate))
    }

    /// Returns the number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns `true` if no job has an aggregate.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl<'a> Extend<&'a JobRunRecord> for JobAggregates {
    fn extend<T: IntoIterator<Item = &'a JobRunRecord>>(&mut self, iter: T) {
        for record in iter {
            self.insert(record);
        }
    }
}

/// Fleet-wide run counters across all jobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// All runs in the window, including unrecognized states.
    pub total: u64,
    /// Counts by status.
    pub counts: StatusCounts,
}

impl RunSummary {
    /// Counts one run.
    pub fn record(&mut self, record: &JobRunRecord) {
        self.total += 1;
        self.counts.record(&record.status);
    }

    /// Adds all counters of `other`.
    pub fn merge(&mut self, other: &Self) {
        self.total += other.total;
        self.counts.merge(&other.counts);
    }

    /// Percentage of successful runs, or `0` if there were no runs.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.counts.succeeded as f64 / self.total as f64 * 100.0
    }
}

impl<'a> FromIterator<&'a JobRunRecord> for RunSummary {
    fn from_iter<T: IntoIterator<Item = &'a JobRunRecord>>(iter: T) -> Self {
        let mut summary = Self::default();
        for record in iter {
            summary.record(record);
        }
        summary
    }
}
