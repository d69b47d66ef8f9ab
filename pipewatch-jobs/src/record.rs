use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// The state of a job or DAG run as reported upstream.
///
/// The batch job API reports uppercase states (`SUCCEEDED`), the workflow console lowercase ones
/// (`success`). Both map onto the same variants. Any other state is kept verbatim in
/// [`RunStatus::Other`] and does not count towards any status bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The run is in progress.
    Running,
    /// The run finished successfully.
    Succeeded,
    /// The run failed.
    Failed,
    /// The run was canceled.
    Canceled,
    /// Any other upstream state, such as `STARTING`, `TIMEOUT` or `queued`.
    Other(String),
}

impl RunStatus {
    /// Maps an upstream state string onto a status.
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "succeeded" | "success" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" => Self::Canceled,
            _ => Self::Other(state.to_owned()),
        }
    }

    /// Returns the canonical name of this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Other(state) => state,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

pipewatch_common::impl_str_serde!(RunStatus, "a run state");

/// The worker tier a batch job run was billed at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum WorkerClass {
    /// The default tier, used when no worker type is reported.
    #[default]
    Standard,
    /// The `G.1X` premium tier.
    G1X,
    /// The `G.2X` premium tier.
    G2X,
    /// Any other worker type, billed at the default rate unless configured.
    Other(String),
}

impl WorkerClass {
    /// Maps an upstream worker type onto a class.
    pub fn parse(worker_type: &str) -> Self {
        match worker_type {
            "" | "Standard" => Self::Standard,
            "G.1X" => Self::G1X,
            "G.2X" => Self::G2X,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Returns the upstream name of this worker class, which is also its key in rate tables.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Standard => "Standard",
            Self::G1X => "G.1X",
            Self::G2X => "G.2X",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for WorkerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerClass {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

pipewatch_common::impl_str_serde!(WorkerClass, "a worker type");

/// One execution attempt of a named job or DAG.
///
/// Records are read-only and live for a single invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct JobRunRecord {
    /// Name of the job or identifier of the DAG.
    pub job: String,
    /// Identifier of the run.
    pub run_id: String,
    /// When the run started.
    pub started_on: DateTime<Utc>,
    /// The reported state.
    pub status: RunStatus,
    /// Elapsed execution time in seconds.
    pub execution_time: Option<f64>,
    /// Allocated capacity units.
    pub allocated_capacity: Option<f64>,
    /// Resource time in seconds, if reported directly.
    pub dpu_seconds: Option<f64>,
    /// The worker tier.
    pub worker_class: WorkerClass,
    /// The owning environment for multi-environment deployments.
    pub environment: Option<String>,
}

impl JobRunRecord {
    /// Creates a record without resource accounting.
    pub fn new(
        job: impl Into<String>,
        run_id: impl Into<String>,
        started_on: DateTime<Utc>,
        status: RunStatus,
    ) -> Self {
        Self {
            job: job.into(),
            run_id: run_id.into(),
            started_on,
            status,
            execution_time: None,
            allocated_capacity: None,
            dpu_seconds: None,
            worker_class: WorkerClass::Standard,
            environment: None,
        }
    }
}
