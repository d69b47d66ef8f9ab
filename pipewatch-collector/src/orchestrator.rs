use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use pipewatch_common::ObservationWindow;
use pipewatch_config::{CollectorKind, Config};
use pipewatch_jobs::{
    DagCounts, EnvironmentAggregate, JobAggregates, JobRunRecord, RunSummary, filter_runs,
};
use pipewatch_metrics::{MetricSink, flush};
use pipewatch_log::InlineError;
use pipewatch_statsd::metric;
use tokio::time::Instant;

use crate::statsd::{CollectorCounters, CollectorTimers};
use crate::{
    CollectorReport, ConsoleSession, InvocationError, InvocationReport, JOB_NAMESPACE, JobSource,
    Listing, MetricShaper, Scope, ScopeOutcome, WORKFLOW_NAMESPACE, WorkflowSource,
};

/// Runs of every job whose run listing contributed data, sorted by job name.
type FetchedRuns = Vec<(String, Vec<JobRunRecord>)>;

/// Parameters of a single invocation.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// The trigger time that all observation windows derive from.
    pub now: DateTime<Utc>,
    /// No new upstream work starts after this instant.
    pub deadline: Instant,
    /// Restricts the invocation to these collectors, otherwise all configured ones run.
    pub collectors: Option<Vec<CollectorKind>>,
}

impl Invocation {
    /// Creates an invocation of all configured collectors.
    pub fn new(now: DateTime<Utc>, deadline: Instant) -> Self {
        Self {
            now,
            deadline,
            collectors: None,
        }
    }

    /// Restricts the invocation to the given collectors.
    pub fn with_collectors(mut self, collectors: Vec<CollectorKind>) -> Self {
        self.collectors = Some(collectors);
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("time budget exhausted")]
struct BudgetExhausted;

/// Result of a unit of work started under the invocation deadline.
enum Bounded<T> {
    Done(T),
    TimedOut,
    Skipped,
}

/// Runs `future` unless the deadline has passed, and abandons it once the deadline passes.
async fn bounded<F: Future>(deadline: Instant, future: F) -> Bounded<F::Output> {
    if Instant::now() >= deadline {
        return Bounded::Skipped;
    }

    match tokio::time::timeout_at(deadline, future).await {
        Ok(output) => Bounded::Done(output),
        Err(_) => Bounded::TimedOut,
    }
}

fn log_failure(scope: &Scope, error: &(dyn Error + 'static)) {
    match scope {
        Scope::Jobs => pipewatch_log::warn!(error, "failed to list jobs"),
        Scope::Job { job } => pipewatch_log::warn!(job = %job, error, "failed to list job runs"),
        Scope::Environment { environment } => pipewatch_log::warn!(
            environment = %environment,
            error,
            "failed to list dags",
        ),
        Scope::Dag {
            environment,
            dag_id,
        } => pipewatch_log::warn!(
            environment = %environment,
            dag_id = %dag_id,
            error,
            "failed to list dag runs",
        ),
    }
}

fn fail(report: &mut InvocationReport, scope: Scope, tag: &str, error: &(dyn Error + 'static)) {
    log_failure(&scope, error);
    metric!(
        counter(CollectorCounters::ScopeFailed) += 1,
        collector = scope.family(),
        reason = tag,
    );
    report.record(scope, ScopeOutcome::Failed, InlineError(error));
}

/// Records the outcome of a listing and returns `true` if it contributed data.
fn record_listing<T>(report: &mut InvocationReport, scope: Scope, listing: &Listing<T>) -> bool {
    match listing.incomplete() {
        None => {
            report.record(scope, ScopeOutcome::Succeeded, "");
            true
        }
        Some(incomplete) if listing.is_failed() => {
            fail(report, scope, "failed", incomplete);
            false
        }
        Some(incomplete) => {
            report.record(scope, ScopeOutcome::Degraded, InlineError(incomplete));
            true
        }
    }
}

/// Records the outcome of a bounded listing and returns it if it contributed data.
fn record_bounded<T>(
    report: &mut InvocationReport,
    scope: Scope,
    result: Bounded<Listing<T>>,
) -> Option<Listing<T>> {
    match result {
        Bounded::Done(listing) => record_listing(report, scope, &listing).then_some(listing),
        Bounded::TimedOut => {
            report.deadline_exceeded = true;
            fail(report, scope, "timeout", &BudgetExhausted);
            None
        }
        Bounded::Skipped => {
            report.deadline_exceeded = true;
            pipewatch_log::warn!(scope = %scope, "time budget exhausted, skipping scope");
            metric!(
                counter(CollectorCounters::ScopeFailed) += 1,
                collector = scope.family(),
                reason = "skipped",
            );
            report.record(scope, ScopeOutcome::Skipped, BudgetExhausted);
            None
        }
    }
}

/// Drives invocations: computes windows, fetches and aggregates runs, and publishes metrics.
///
/// Upstream work is split into scopes (the job listing, each job, each workflow environment and
/// each DAG) that run with bounded concurrency. A failing scope is logged and contributes nothing,
/// the invocation carries on with the remaining ones. Every task returns its own result and only
/// the orchestrator merges them, so no state is shared between concurrent tasks.
pub struct Orchestrator {
    config: Arc<Config>,
    jobs: Arc<dyn JobSource>,
    workflow: Arc<dyn WorkflowSource>,
    sink: Arc<dyn MetricSink>,
}

impl Orchestrator {
    /// Creates an orchestrator over the given upstream services.
    pub fn new(
        config: Arc<Config>,
        jobs: Arc<dyn JobSource>,
        workflow: Arc<dyn WorkflowSource>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            config,
            jobs,
            workflow,
            sink,
        }
    }

    /// Runs one invocation.
    ///
    /// Shaped metrics are published even if the deadline passed while collecting. Fails on
    /// configuration errors, and if not a single scope contributed data.
    pub async fn run(&self, invocation: Invocation) -> Result<InvocationReport, InvocationError> {
        let started = Instant::now();
        let deadline = invocation
            .deadline
            .min(started + self.config.invocation_timeout());

        let collectors = self.select(invocation.collectors.as_deref())?;
        let windows = collectors
            .iter()
            .map(|&collector| {
                self.config
                    .window(collector)
                    .window(invocation.now)
                    .map(|window| (collector, window))
                    .map_err(|source| InvocationError::Window { collector, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = InvocationReport::default();

        let fetched = if windows.iter().any(|(collector, _)| collector.uses_job_api()) {
            self.fetch_jobs(deadline, &mut report).await
        } else {
            None
        };

        let mut batches = Vec::with_capacity(windows.len());
        for &(collector, window) in &windows {
            let shaper = match collector {
                CollectorKind::DpuCost => self.shape_dpu_cost(fetched.as_ref(), &window),
                CollectorKind::JobStatus => self.shape_job_status(fetched.as_ref(), &window),
                CollectorKind::RunSummary => {
                    self.shape_run_summary(fetched.as_ref(), &window, invocation.now)
                }
                CollectorKind::DagStatus => {
                    let environments = self.collect_dags(&window, deadline, &mut report).await;
                    self.shape_dag_status(&environments)
                }
            };

            let rejected = shaper.rejected();
            let batch = shaper.finish();
            pipewatch_log::debug!(
                collector = collector.as_str(),
                points = batch.len(),
                "shaped metrics",
            );

            report.collectors.push(CollectorReport {
                collector,
                window,
                points: batch.len(),
                rejected,
            });
            batches.push(batch);
        }

        let max_per_call = self.config.max_points_per_call();
        for batch in batches.iter().filter(|batch| !batch.is_empty()) {
            let outcome = flush(self.sink.as_ref(), batch, max_per_call).await;
            report.emission.add(outcome);
        }

        metric!(timer(CollectorTimers::InvocationDuration) = started.elapsed());
        pipewatch_log::info!("invocation finished: {}", report.summary());

        if report.is_unavailable() {
            return Err(InvocationError::Unavailable(Box::new(report)));
        }

        Ok(report)
    }

    /// Returns the collectors to run, in configuration order unless restricted.
    fn select(
        &self,
        requested: Option<&[CollectorKind]>,
    ) -> Result<Vec<CollectorKind>, InvocationError> {
        let enabled = self.config.collectors();
        let requested = match requested {
            Some(requested) if !requested.is_empty() => requested,
            _ => return Ok(enabled),
        };

        let mut selected = Vec::with_capacity(requested.len());
        for &collector in requested {
            if !enabled.contains(&collector) {
                return Err(InvocationError::CollectorDisabled(collector));
            }
            if !selected.contains(&collector) {
                selected.push(collector);
            }
        }

        Ok(selected)
    }

    /// Lists all jobs and their runs once for all batch job collectors.
    ///
    /// Returns `None` if the job listing itself contributed nothing.
    async fn fetch_jobs(
        &self,
        deadline: Instant,
        report: &mut InvocationReport,
    ) -> Option<FetchedRuns> {
        let listing = bounded(deadline, self.jobs.list_jobs()).await;
        let mut jobs = record_bounded(report, Scope::Jobs, listing)?.into_items();
        jobs.sort_unstable();
        jobs.dedup();

        let mut results: Vec<_> = stream::iter(jobs)
            .map(|job| async move {
                let listing = bounded(deadline, self.jobs.list_runs(&job)).await;
                (job, listing)
            })
            .buffer_unordered(self.config.max_workers())
            .collect()
            .await;
        results.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        let mut fetched = Vec::with_capacity(results.len());
        for (job, listing) in results {
            let scope = Scope::Job { job: job.clone() };
            if let Some(listing) = record_bounded(report, scope, listing) {
                fetched.push((job, listing.into_items()));
            }
        }

        Some(fetched)
    }

    fn shape_dpu_cost(
        &self,
        fetched: Option<&FetchedRuns>,
        window: &ObservationWindow,
    ) -> MetricShaper {
        let mut aggregates = JobAggregates::new();
        for (_, runs) in fetched.into_iter().flatten() {
            for record in filter_runs(runs, window) {
                aggregates.insert_costed(record, self.config.rates());
            }
        }

        let mut shaper = MetricShaper::new(JOB_NAMESPACE);
        shaper.dpu_cost(&aggregates);
        shaper
    }

    fn shape_job_status(
        &self,
        fetched: Option<&FetchedRuns>,
        window: &ObservationWindow,
    ) -> MetricShaper {
        let fetched = fetched.map(Vec::as_slice).unwrap_or_default();

        let mut aggregates = JobAggregates::seeded(fetched.iter().map(|(job, _)| job.as_str()));
        for (_, runs) in fetched {
            aggregates.extend(filter_runs(runs, window));
        }

        let mut shaper = MetricShaper::new(JOB_NAMESPACE);
        shaper.job_status(&aggregates);
        shaper
    }

    fn shape_run_summary(
        &self,
        fetched: Option<&FetchedRuns>,
        window: &ObservationWindow,
        now: DateTime<Utc>,
    ) -> MetricShaper {
        let mut shaper = MetricShaper::new(JOB_NAMESPACE);

        // Without a job listing there is nothing to summarize, not even zeros.
        if let Some(fetched) = fetched {
            let runs = fetched.iter().flat_map(|(_, runs)| runs);
            let summary: RunSummary = filter_runs(runs, window).collect();
            shaper.run_summary(&summary, now);
        }

        shaper
    }

    /// Opens a console session and lists the DAGs of one environment.
    async fn open_environment(
        &self,
        environment: &str,
    ) -> (Option<ConsoleSession>, Listing<String>) {
        match self.workflow.open_session(environment).await {
            Ok(session) => {
                let dags = self.workflow.list_dags(&session).await;
                (Some(session), dags)
            }
            Err(error) => (None, Listing::failed("session", error)),
        }
    }

    /// Collects DAG run counts of all configured environments.
    ///
    /// Sessions and DAG listings are acquired per environment first, then the runs of all DAGs
    /// across environments are listed through a single bounded pool.
    async fn collect_dags(
        &self,
        window: &ObservationWindow,
        deadline: Instant,
        report: &mut InvocationReport,
    ) -> Vec<EnvironmentAggregate> {
        let environments = self.config.environments();
        let max_workers = self.config.max_workers();

        let mut opened: Vec<_> = stream::iter(environments.iter().enumerate())
            .map(|(index, environment)| async move {
                let result = bounded(deadline, self.open_environment(environment)).await;
                (index, result)
            })
            .buffer_unordered(max_workers)
            .collect()
            .await;
        opened.sort_unstable_by_key(|(index, _)| *index);

        let mut tasks = Vec::new();
        for (index, result) in opened {
            let scope = Scope::Environment {
                environment: environments[index].clone(),
            };

            let (session, listing) = match result {
                Bounded::Done((session, listing)) => (session, Bounded::Done(listing)),
                Bounded::TimedOut => (None, Bounded::TimedOut),
                Bounded::Skipped => (None, Bounded::Skipped),
            };

            let Some(dags) = record_bounded(report, scope, listing) else {
                continue;
            };
            let Some(session) = session else {
                continue;
            };

            let session = Arc::new(session);
            for dag_id in dags.into_items() {
                tasks.push((index, Arc::clone(&session), dag_id));
            }
        }

        let mut results: Vec<_> = stream::iter(tasks)
            .map(|(index, session, dag_id)| async move {
                let listing = bounded(
                    deadline,
                    self.workflow.list_dag_runs(&session, &dag_id, window),
                )
                .await;
                (index, dag_id, listing)
            })
            .buffer_unordered(max_workers)
            .collect()
            .await;
        results.sort_unstable_by(|(i, a, _), (j, b, _)| i.cmp(j).then_with(|| a.cmp(b)));

        let mut aggregates: Vec<_> = environments
            .iter()
            .map(EnvironmentAggregate::new)
            .collect();

        for (index, dag_id, listing) in results {
            let scope = Scope::Dag {
                environment: environments[index].clone(),
                dag_id: dag_id.clone(),
            };

            if let Some(listing) = record_bounded(report, scope, listing) {
                let counts: DagCounts = filter_runs(listing.items(), window).collect();
                aggregates[index].insert(dag_id, counts);
            }
        }

        aggregates
    }

    fn shape_dag_status(&self, environments: &[EnvironmentAggregate]) -> MetricShaper {
        let mut shaper = MetricShaper::new(WORKFLOW_NAMESPACE);
        for environment in environments {
            shaper.dag_status(environment, self.config.dag_count_mode());
        }
        shaper
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use pipewatch_config::OverridableConfig;
    use pipewatch_metrics::{MetricPoint, SinkError};
    use similar_asserts::assert_eq;

    use super::*;
    use crate::ConsoleError;

    struct Idle;

    #[async_trait]
    impl JobSource for Idle {
        async fn list_jobs(&self) -> Listing<String> {
            Listing::complete(Vec::new())
        }

        async fn list_runs(&self, _job: &str) -> Listing<JobRunRecord> {
            Listing::complete(Vec::new())
        }
    }

    #[async_trait]
    impl WorkflowSource for Idle {
        async fn open_session(&self, _environment: &str) -> Result<ConsoleSession, ConsoleError> {
            Err(ConsoleError::MissingSession)
        }

        async fn list_dags(&self, _session: &ConsoleSession) -> Listing<String> {
            Listing::complete(Vec::new())
        }

        async fn list_dag_runs(
            &self,
            _session: &ConsoleSession,
            _dag_id: &str,
            _window: &ObservationWindow,
        ) -> Listing<JobRunRecord> {
            Listing::complete(Vec::new())
        }
    }

    #[async_trait]
    impl MetricSink for Idle {
        async fn put_metrics(&self, _: &str, _: &[&MetricPoint]) -> Result<(), SinkError> {
            Ok(())
        }
    }

    fn orchestrator(yaml: &str) -> Orchestrator {
        let config = Config::from_yaml_str(yaml, OverridableConfig::default()).unwrap();
        Orchestrator::new(
            Arc::new(config),
            Arc::new(Idle),
            Arc::new(Idle),
            Arc::new(Idle),
        )
    }

    #[test]
    fn test_select_collectors() {
        let orchestrator = orchestrator("collectors: [job_status, dpu_cost]");

        assert_eq!(
            orchestrator.select(None).unwrap(),
            [CollectorKind::JobStatus, CollectorKind::DpuCost]
        );
        assert_eq!(
            orchestrator.select(Some(&[])).unwrap(),
            [CollectorKind::JobStatus, CollectorKind::DpuCost]
        );
        assert_eq!(
            orchestrator
                .select(Some(&[CollectorKind::DpuCost, CollectorKind::DpuCost]))
                .unwrap(),
            [CollectorKind::DpuCost]
        );
        assert!(matches!(
            orchestrator.select(Some(&[CollectorKind::DagStatus])),
            Err(InvocationError::CollectorDisabled(CollectorKind::DagStatus))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_skips_after_deadline() {
        let deadline = Instant::now();
        assert!(matches!(
            bounded(deadline, async { 1 }).await,
            Bounded::Skipped
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let deadline = Instant::now() + Duration::from_secs(1);
        let slow = tokio::time::sleep(Duration::from_secs(5));
        assert!(matches!(bounded(deadline, slow).await, Bounded::TimedOut));

        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(matches!(
            bounded(deadline, async { 1 }).await,
            Bounded::Done(1)
        ));
    }

    #[test]
    fn test_reason_includes_sources() {
        let listing = Listing::<()>::failed("GetJobs", std::io::Error::other("connection reset"));
        let incomplete = listing.incomplete().unwrap();
        assert_eq!(
            InlineError(incomplete).to_string(),
            "listing GetJobs incomplete after 0 pages: request failed: connection reset"
        );
    }

    #[tokio::test]
    async fn test_failed_environment_is_unavailable() {
        let orchestrator = orchestrator(
            "collectors: [dag_status]\nworkflow:\n  environments: [prod-airflow]",
        );
        let invocation = Invocation::new(Utc::now(), Instant::now() + Duration::from_secs(60));

        let error = orchestrator.run(invocation).await.unwrap_err();
        let report = error.report().unwrap();

        assert!(!error.is_config());
        assert_eq!(report.scopes.failed, 1);
        assert_eq!(
            report.issues[0].reason,
            "listing session incomplete after 0 pages: request failed: \
             web console login did not set a session cookie"
        );
    }

    #[tokio::test]
    async fn test_no_jobs_is_not_unavailable() {
        let orchestrator = orchestrator("");
        let invocation = Invocation::new(Utc::now(), Instant::now() + Duration::from_secs(60));

        let report = orchestrator.run(invocation).await.unwrap();

        assert_eq!(report.scopes.succeeded, 1);
        assert_eq!(report.collectors.len(), 3);
        // Only the run summary has points, all zero.
        assert_eq!(report.emission.sent, 6);
    }
}
