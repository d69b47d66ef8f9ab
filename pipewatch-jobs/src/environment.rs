use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{JobRunRecord, RunStatus};

/// Success and failure counts of the in-window runs of one DAG.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DagCounts {
    /// All in-window runs, including states other than success and failure.
    pub runs: u64,
    /// Successful runs.
    pub success: u64,
    /// Failed runs.
    pub failed: u64,
}

impl DagCounts {
    /// Counts one run.
    pub fn record(&mut self, record: &JobRunRecord) {
        self.runs += 1;
        match record.status {
            RunStatus::Succeeded => self.success += 1,
            RunStatus::Failed => self.failed += 1,
            _ => (),
        }
    }

    fn add(&mut self, other: &Self) {
        self.runs += other.runs;
        self.success += other.success;
        self.failed += other.failed;
    }
}

impl<'a> FromIterator<&'a JobRunRecord> for DagCounts {
    fn from_iter<T: IntoIterator<Item = &'a JobRunRecord>>(iter: T) -> Self {
        let mut counts = Self::default();
        for record in iter {
            counts.record(record);
        }
        counts
    }
}

/// How per-DAG values are derived from the DAG counts of an environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DagCountMode {
    /// Each DAG reports the running total of all DAGs up to and including itself, folded in
    /// DAG-id order.
    #[default]
    Cumulative,
    /// Each DAG reports only its own counts.
    PerDag,
}

/// DAG run counts of one workflow environment.
///
/// Only DAGs with at least one in-window run are part of the aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnvironmentAggregate {
    environment: String,
    dags: BTreeMap<String, DagCounts>,
}

impl EnvironmentAggregate {
    /// Creates an empty aggregate for an environment.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            dags: BTreeMap::new(),
        }
    }

    /// Returns the environment name.
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Adds the counts of one DAG.
    ///
    /// Counts without any run are ignored. Adding the same DAG twice sums its counts.
    pub fn insert(&mut self, dag_id: impl Into<String>, counts: DagCounts) {
        if counts.runs == 0 {
            return;
        }

        self.dags.entry(dag_id.into()).or_default().add(&counts);
    }

    /// Returns `true` if no DAG had an in-window run.
    pub fn is_empty(&self) -> bool {
        self.dags.is_empty()
    }

    /// Returns the number of DAGs with in-window runs.
    pub fn len(&self) -> usize {
        self.dags.len()
    }

    /// Returns the totals over all DAGs of this environment.
    pub fn totals(&self) -> DagCounts {
        let mut totals = DagCounts::default();
        for counts in self.dags.values() {
            totals.add(counts);
        }
        totals
    }

    /// Returns the value to report for each DAG in DAG-id order.
    pub fn dag_values(&self, mode: DagCountMode) -> Vec<(&str, DagCounts)> {
        let mut running = DagCounts::default();

        self.dags
            .iter()
            .map(|(dag_id, counts)| {
                let value = match mode {
                    DagCountMode::PerDag => *counts,
                    DagCountMode::Cumulative => {
                        running.add(counts);
                        running
                    }
                };
                (dag_id.as_str(), value)
            })
            .collect()
    }
}
