use std::fmt;

use pipewatch_common::{ObservationWindow, WindowError};
use pipewatch_config::CollectorKind;
use pipewatch_metrics::FlushOutcome;
use serde::Serialize;

/// A unit of upstream work that succeeds or fails independently of others.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum Scope {
    /// The listing of all batch jobs.
    Jobs,
    /// The run listing of one batch job.
    Job {
        /// The job name.
        job: String,
    },
    /// The console session and DAG listing of one workflow environment.
    Environment {
        /// The environment name.
        environment: String,
    },
    /// The run listing of one DAG.
    Dag {
        /// The environment name.
        environment: String,
        /// The DAG id.
        dag_id: String,
    },
}

impl Scope {
    /// Returns `jobs` for batch job scopes and `dags` for workflow scopes.
    pub fn family(&self) -> &'static str {
        match self {
            Self::Jobs | Self::Job { .. } => "jobs",
            Self::Environment { .. } | Self::Dag { .. } => "dags",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jobs => f.write_str("job listing"),
            Self::Job { job } => write!(f, "job '{job}'"),
            Self::Environment { environment } => write!(f, "environment '{environment}'"),
            Self::Dag {
                environment,
                dag_id,
            } => write!(f, "dag '{dag_id}' in environment '{environment}'"),
        }
    }
}

/// How a scope contributed to an invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeOutcome {
    /// All data was fetched.
    Succeeded,
    /// Partial data was fetched and included.
    Degraded,
    /// The scope contributed nothing.
    Failed,
    /// The scope was not started because the time budget ran out.
    Skipped,
}

/// A scope that did not succeed, with the reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScopeIssue {
    /// The affected scope.
    #[serde(flatten)]
    pub scope: Scope,
    /// The outcome of the scope.
    pub outcome: ScopeOutcome,
    /// Human readable reason.
    pub reason: String,
}

/// Number of scopes per outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScopeTally {
    /// Scopes that succeeded.
    pub succeeded: usize,
    /// Scopes that contributed partial data.
    pub degraded: usize,
    /// Scopes that contributed nothing.
    pub failed: usize,
    /// Scopes that were never started.
    pub skipped: usize,
}

impl ScopeTally {
    /// Returns the number of scopes that contributed data.
    pub fn contributed(&self) -> usize {
        self.succeeded + self.degraded
    }

    /// Returns the number of scopes of any outcome.
    pub fn total(&self) -> usize {
        self.succeeded + self.degraded + self.failed + self.skipped
    }
}

/// Shaped output of one collector.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CollectorReport {
    /// The collector.
    pub collector: CollectorKind,
    /// The observation window the collector applied.
    pub window: ObservationWindow,
    /// Number of metric points shaped.
    pub points: usize,
    /// Number of points left out as invalid.
    pub rejected: usize,
}

/// Totals of all emission calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EmissionReport {
    /// Number of calls to the metrics backend.
    pub calls: usize,
    /// Points in successful calls.
    pub sent: usize,
    /// Points in failed calls.
    pub failed: usize,
}

impl EmissionReport {
    /// Adds the outcome of flushing one batch.
    pub fn add(&mut self, outcome: FlushOutcome) {
        self.calls += outcome.calls;
        self.sent += outcome.sent;
        self.failed += outcome.failed;
    }
}

/// Summary of one invocation, returned as the body of the trigger response.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InvocationReport {
    /// Output per collector, in execution order.
    pub collectors: Vec<CollectorReport>,
    /// Scope counts per outcome.
    pub scopes: ScopeTally,
    /// Every scope that did not succeed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ScopeIssue>,
    /// Emission totals.
    pub emission: EmissionReport,
    /// `true` if the time budget ran out before all scopes finished.
    pub deadline_exceeded: bool,
}

impl InvocationReport {
    /// Records the outcome of a scope.
    ///
    /// A reason is only kept for scopes that did not succeed.
    pub fn record(&mut self, scope: Scope, outcome: ScopeOutcome, reason: impl fmt::Display) {
        let bucket = match outcome {
            ScopeOutcome::Succeeded => {
                self.scopes.succeeded += 1;
                return;
            }
            ScopeOutcome::Degraded => &mut self.scopes.degraded,
            ScopeOutcome::Failed => &mut self.scopes.failed,
            ScopeOutcome::Skipped => &mut self.scopes.skipped,
        };
        *bucket += 1;

        self.issues.push(ScopeIssue {
            scope,
            outcome,
            reason: reason.to_string(),
        });
    }

    /// Returns the issues of one outcome.
    pub fn issues(&self, outcome: ScopeOutcome) -> impl Iterator<Item = &ScopeIssue> {
        self.issues
            .iter()
            .filter(move |issue| issue.outcome == outcome)
    }

    /// Returns `true` if at least one scope ran and none of them contributed data.
    pub fn is_unavailable(&self) -> bool {
        self.scopes.total() > 0 && self.scopes.contributed() == 0
    }

    /// Returns a one-line summary for logs.
    pub fn summary(&self) -> String {
        let ScopeTally {
            succeeded,
            degraded,
            failed,
            skipped,
        } = self.scopes;

        format!(
            "{succeeded} scopes succeeded, {degraded} degraded, {failed} failed, {skipped} skipped; \
             {} points sent, {} failed",
            self.emission.sent, self.emission.failed,
        )
    }
}

/// An error that fails a whole invocation.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The trigger requested a collector that is not enabled.
    #[error("collector '{0}' is not enabled")]
    CollectorDisabled(CollectorKind),
    /// No valid observation window could be computed.
    #[error("invalid observation window for collector '{collector}'")]
    Window {
        /// The collector whose window failed.
        collector: CollectorKind,
        /// The window error.
        #[source]
        source: WindowError,
    },
    /// Every upstream scope failed or was skipped.
    #[error("no upstream scope could be collected")]
    Unavailable(Box<InvocationReport>),
}

impl InvocationError {
    /// Returns `true` for errors caused by configuration rather than upstream services.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }

    /// Returns the report of an invocation that ran, if any.
    pub fn report(&self) -> Option<&InvocationReport> {
        match self {
            Self::Unavailable(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use similar_asserts::assert_eq;

    use super::*;

    fn job(name: &str) -> Scope {
        Scope::Job {
            job: name.to_owned(),
        }
    }

    #[test]
    fn test_record_outcomes() {
        let mut report = InvocationReport::default();
        report.record(Scope::Jobs, ScopeOutcome::Succeeded, "");
        report.record(job("etl-1"), ScopeOutcome::Succeeded, "");
        report.record(job("etl-2"), ScopeOutcome::Failed, "connection refused");
        report.record(job("etl-3"), ScopeOutcome::Skipped, "deadline reached");

        assert_eq!(
            report.scopes,
            ScopeTally {
                succeeded: 2,
                degraded: 0,
                failed: 1,
                skipped: 1,
            }
        );
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues(ScopeOutcome::Failed).count(), 1);
        assert!(!report.is_unavailable());
    }

    #[test]
    fn test_unavailable() {
        let mut report = InvocationReport::default();
        assert!(!report.is_unavailable());

        report.record(Scope::Jobs, ScopeOutcome::Failed, "connection refused");
        assert!(report.is_unavailable());

        report.record(
            Scope::Environment {
                environment: "prod".to_owned(),
            },
            ScopeOutcome::Degraded,
            "page limit",
        );
        assert!(!report.is_unavailable());
    }

    #[test]
    fn test_scope_display() {
        let scope = Scope::Dag {
            environment: "prod".to_owned(),
            dag_id: "extract".to_owned(),
        };
        assert_eq!(scope.to_string(), "dag 'extract' in environment 'prod'");
        assert_eq!(scope.family(), "dags");
        assert_eq!(Scope::Jobs.family(), "jobs");
    }

    #[test]
    fn test_serialize_report() {
        let start = Utc.with_ymd_and_hms(2024, 6, 30, 9, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 30, 10, 30, 0).unwrap();

        let mut report = InvocationReport {
            collectors: vec![CollectorReport {
                collector: CollectorKind::DpuCost,
                window: ObservationWindow::new(start, end).unwrap(),
                points: 2,
                rejected: 0,
            }],
            ..Default::default()
        };
        report.record(Scope::Jobs, ScopeOutcome::Succeeded, "");
        report.record(job("etl-2"), ScopeOutcome::Failed, "request timed out");
        report.emission.add(FlushOutcome {
            calls: 1,
            sent: 2,
            failed: 0,
        });

        insta::assert_json_snapshot!(report, @r###"
        {
          "collectors": [
            {
              "collector": "dpu_cost",
              "window": {
                "start": "2024-06-30T09:30:00Z",
                "end": "2024-06-30T10:30:00Z"
              },
              "points": 2,
              "rejected": 0
            }
          ],
          "scopes": {
            "succeeded": 1,
            "degraded": 0,
            "failed": 1,
            "skipped": 0
          },
          "issues": [
            {
              "scope": "job",
              "job": "etl-2",
              "outcome": "failed",
              "reason": "request timed out"
            }
          ],
          "emission": {
            "calls": 1,
            "sent": 2,
            "failed": 0
          },
          "deadline_exceeded": false
        }
        "###);
    }
}
