use chrono::{DateTime, Utc};
use pipewatch_jobs::{DagCountMode, EnvironmentAggregate, JobAggregates, RunSummary, round_cents};
use pipewatch_metrics::{DimensionError, Dimensions, MetricBatch, MetricPoint, MetricUnit};

/// Namespace of all batch job metrics.
pub const JOB_NAMESPACE: &str = "GlueCM";
/// Namespace of all workflow metrics.
pub const WORKFLOW_NAMESPACE: &str = "AmazonMWAA";

const DIM_JOB: &str = "JobName";
const DIM_STATUS: &str = "Status";
const DIM_ENVIRONMENT: &str = "EnvironmentName";
const DIM_DAG: &str = "DAG_ID";

fn point(
    name: &str,
    value: f64,
    unit: MetricUnit,
    dimensions: &[(&str, &str)],
) -> Result<MetricPoint, DimensionError> {
    let mut dims = Dimensions::new();
    for (key, value) in dimensions {
        dims.push(*key, *value)?;
    }

    Ok(MetricPoint::new(name, value, unit).with_dimensions(dims))
}

/// Converts aggregates into a batch of metric points for one namespace.
///
/// A point that fails validation is logged with its scope and left out, the remaining points are
/// still shaped.
#[derive(Debug)]
pub struct MetricShaper {
    batch: MetricBatch,
    rejected: usize,
}

impl MetricShaper {
    /// Creates a shaper producing points in `namespace`.
    pub fn new(namespace: &str) -> Self {
        Self {
            batch: MetricBatch::new(namespace),
            rejected: 0,
        }
    }

    fn push(&mut self, scope: &str, point: Result<MetricPoint, DimensionError>) {
        let result = point.and_then(|point| self.batch.push(point));

        if let Err(error) = result {
            pipewatch_log::error!(
                namespace = self.batch.namespace(),
                scope,
                error = &error as &dyn std::error::Error,
                "dropping invalid metric point",
            );
            self.rejected += 1;
        }
    }

    /// Adds resource time and cost per job.
    pub fn dpu_cost(&mut self, aggregates: &JobAggregates) {
        for (job, aggregate) in aggregates.iter() {
            let dims = [(DIM_JOB, job)];
            self.push(
                job,
                point("DPU_Seconds", aggregate.dpu_seconds, MetricUnit::Seconds, &dims),
            );
            self.push(
                job,
                point("DPU_Cost", round_cents(aggregate.cost), MetricUnit::None, &dims),
            );
        }
    }

    /// Adds running, succeeded and failed counts per job.
    pub fn job_status(&mut self, aggregates: &JobAggregates) {
        for (job, aggregate) in aggregates.iter() {
            let counts = aggregate.counts;
            for (status, value) in [
                ("Running", counts.running),
                ("Succeeded", counts.succeeded),
                ("Failed", counts.failed),
            ] {
                self.push(
                    job,
                    point(
                        "JobStatusCount",
                        value as f64,
                        MetricUnit::Count,
                        &[(DIM_JOB, job), (DIM_STATUS, status)],
                    ),
                );
            }
        }
    }

    /// Adds the fleet-wide run counters, stamped with `timestamp`.
    pub fn run_summary(&mut self, summary: &RunSummary, timestamp: DateTime<Utc>) {
        let counts = summary.counts;
        let values = [
            ("Glue.TotalRuns", summary.total as f64, MetricUnit::Count),
            ("Glue.RunningJobs", counts.running as f64, MetricUnit::Count),
            ("Glue.CanceledJobs", counts.canceled as f64, MetricUnit::Count),
            ("Glue.SuccessfulRuns", counts.succeeded as f64, MetricUnit::Count),
            ("Glue.FailedRuns", counts.failed as f64, MetricUnit::Count),
            ("Glue.RunSuccessRate", summary.success_rate(), MetricUnit::Percent),
        ];

        for (name, value, unit) in values {
            let point = point(name, value, unit, &[]).map(|p| p.with_timestamp(timestamp));
            self.push("summary", point);
        }
    }

    /// Adds per-DAG and per-environment success and failure counts.
    ///
    /// Environments without any DAG run add nothing.
    pub fn dag_status(&mut self, environment: &EnvironmentAggregate, mode: DagCountMode) {
        let env = environment.environment();

        for (dag_id, counts) in environment.dag_values(mode) {
            let dims = [(DIM_ENVIRONMENT, env), (DIM_DAG, dag_id)];
            self.push(
                dag_id,
                point("DAGRuns.Success", counts.success as f64, MetricUnit::Count, &dims),
            );
            self.push(
                dag_id,
                point("DAGRuns.Failed", counts.failed as f64, MetricUnit::Count, &dims),
            );
        }

        if environment.is_empty() {
            return;
        }

        let totals = environment.totals();
        let dims = [(DIM_ENVIRONMENT, env)];
        self.push(
            env,
            point(
                "DAGRuns.EnvironmentSuccess",
                totals.success as f64,
                MetricUnit::Count,
                &dims,
            ),
        );
        self.push(
            env,
            point(
                "DAGRuns.EnvironmentFailed",
                totals.failed as f64,
                MetricUnit::Count,
                &dims,
            ),
        );
    }

    /// Returns the number of points left out as invalid.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Returns the shaped batch.
    pub fn finish(self) -> MetricBatch {
        self.batch
    }
}
