//! In-memory upstream services.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipewatch_collector::{
    ConsoleError, ConsoleSession, IncompleteReason, JobSource, Listing, ListingIncomplete,
    WorkflowSource,
};
use pipewatch_common::ObservationWindow;
use pipewatch_jobs::JobRunRecord;
use pipewatch_metrics::{MetricPoint, MetricSink, SinkError};
use url::Url;

/// Scripted behavior of one listing.
#[derive(Clone, Debug)]
pub enum FakeListing<T> {
    /// Returns all items.
    Complete(Vec<T>),
    /// Returns the items, marked incomplete after reaching the page limit.
    Partial(Vec<T>),
    /// Fails before the first page with the given message.
    Fail(String),
    /// Returns all items after a delay.
    Slow(Duration, Vec<T>),
    /// Never completes.
    Hang,
}

impl<T: Clone> FakeListing<T> {
    async fn resolve(&self, listing: &'static str) -> Listing<T> {
        match self {
            Self::Complete(items) => Listing::complete(items.clone()),
            Self::Partial(items) => Listing::partial(
                items.clone(),
                ListingIncomplete {
                    listing,
                    pages: 1,
                    reason: IncompleteReason::PageLimit(1),
                },
            ),
            Self::Fail(message) => Listing::failed(listing, io::Error::other(message.clone())),
            Self::Slow(delay, items) => {
                tokio::time::sleep(*delay).await;
                Listing::complete(items.clone())
            }
            Self::Hang => std::future::pending().await,
        }
    }
}

/// A scripted batch job service.
///
/// Jobs are listed in the order they were added, unless the job listing is overridden.
#[derive(Debug, Default)]
pub struct FakeJobs {
    jobs: Vec<String>,
    listing: Option<FakeListing<String>>,
    runs: BTreeMap<String, FakeListing<JobRunRecord>>,
    requested: Mutex<Vec<String>>,
}

impl FakeJobs {
    /// Creates a service without jobs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a job with completely listed runs.
    pub fn job(self, job: &str, runs: Vec<JobRunRecord>) -> Self {
        self.job_with(job, FakeListing::Complete(runs))
    }

    /// Adds a job with a scripted run listing.
    pub fn job_with(mut self, job: &str, runs: FakeListing<JobRunRecord>) -> Self {
        self.jobs.push(job.to_owned());
        self.runs.insert(job.to_owned(), runs);
        self
    }

    /// Overrides the job listing.
    pub fn listing(mut self, listing: FakeListing<String>) -> Self {
        self.listing = Some(listing);
        self
    }

    /// Returns the jobs whose runs were requested, in request order.
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl JobSource for FakeJobs {
    async fn list_jobs(&self) -> Listing<String> {
        match &self.listing {
            Some(listing) => listing.resolve("GetJobs").await,
            None => Listing::complete(self.jobs.clone()),
        }
    }

    async fn list_runs(&self, job: &str) -> Listing<JobRunRecord> {
        self.requested.lock().push(job.to_owned());

        match self.runs.get(job) {
            Some(runs) => runs.resolve("GetJobRuns").await,
            None => Listing::complete(Vec::new()),
        }
    }
}

/// A scripted workflow environment.
#[derive(Clone, Debug, Default)]
pub struct FakeEnvironment {
    unreachable: bool,
    dags: Option<FakeListing<String>>,
    runs: BTreeMap<String, FakeListing<JobRunRecord>>,
}

impl FakeEnvironment {
    /// Creates an environment without DAGs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment whose console login fails.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Adds a DAG with completely listed runs.
    pub fn dag(self, dag_id: &str, runs: Vec<JobRunRecord>) -> Self {
        self.dag_with(dag_id, FakeListing::Complete(runs))
    }

    /// Adds a DAG with a scripted run listing.
    pub fn dag_with(mut self, dag_id: &str, runs: FakeListing<JobRunRecord>) -> Self {
        self.runs.insert(dag_id.to_owned(), runs);
        self
    }

    /// Overrides the DAG listing.
    pub fn dags(mut self, listing: FakeListing<String>) -> Self {
        self.dags = Some(listing);
        self
    }
}

/// A scripted workflow service.
#[derive(Debug, Default)]
pub struct FakeWorkflow {
    environments: BTreeMap<String, FakeEnvironment>,
    sessions: Mutex<Vec<String>>,
}

impl FakeWorkflow {
    /// Creates a service without environments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an environment.
    pub fn environment(mut self, name: &str, environment: FakeEnvironment) -> Self {
        self.environments.insert(name.to_owned(), environment);
        self
    }

    /// Returns the environments a session was opened for.
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl WorkflowSource for FakeWorkflow {
    async fn open_session(&self, environment: &str) -> Result<ConsoleSession, ConsoleError> {
        self.sessions.lock().push(environment.to_owned());

        match self.environments.get(environment) {
            Some(env) if !env.unreachable => Ok(ConsoleSession {
                environment: environment.to_owned(),
                base: Url::parse("https://console.invalid/").expect("valid url"),
                cookie: format!("session-{environment}"),
            }),
            _ => Err(ConsoleError::MissingSession),
        }
    }

    async fn list_dags(&self, session: &ConsoleSession) -> Listing<String> {
        let Some(environment) = self.environments.get(&session.environment) else {
            return Listing::complete(Vec::new());
        };

        match &environment.dags {
            Some(listing) => listing.resolve("dags").await,
            None => Listing::complete(environment.runs.keys().cloned().collect()),
        }
    }

    async fn list_dag_runs(
        &self,
        session: &ConsoleSession,
        dag_id: &str,
        _window: &ObservationWindow,
    ) -> Listing<JobRunRecord> {
        let runs = self
            .environments
            .get(&session.environment)
            .and_then(|environment| environment.runs.get(dag_id));

        match runs {
            Some(runs) => runs.resolve("dag_runs").await,
            None => Listing::complete(Vec::new()),
        }
    }
}

/// A single captured emission call.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedCall {
    /// The namespace of the call.
    pub namespace: String,
    /// The points of the call.
    pub points: Vec<MetricPoint>,
}

#[derive(Debug, Default)]
struct SinkState {
    calls: Vec<CapturedCall>,
    failing: bool,
}

/// A metric sink that records every call.
#[derive(Clone, Debug, Default)]
pub struct CapturingSink {
    state: Arc<Mutex<SinkState>>,
}

impl CapturingSink {
    /// Creates a sink that accepts all calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that records and then rejects all calls.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.state.lock().failing = true;
        sink
    }

    /// Returns all calls in order.
    pub fn calls(&self) -> Vec<CapturedCall> {
        self.state.lock().calls.clone()
    }

    /// Returns all points of a namespace in emission order.
    pub fn points(&self, namespace: &str) -> Vec<MetricPoint> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.namespace == namespace)
            .flat_map(|call| call.points.iter().cloned())
            .collect()
    }

    /// Returns the value of the point with the given name and exactly the given dimensions.
    pub fn value(&self, name: &str, dimensions: &[(&str, &str)]) -> Option<f64> {
        let state = self.state.lock();
        let point = state
            .calls
            .iter()
            .flat_map(|call| &call.points)
            .find(|point| {
                point.name == name
                    && point.dimensions.len() == dimensions.len()
                    && dimensions
                        .iter()
                        .all(|(key, value)| point.dimensions.get(key) == Some(*value))
            })?;
        Some(point.value)
    }
}

#[async_trait]
impl MetricSink for CapturingSink {
    async fn put_metrics(&self, namespace: &str, points: &[&MetricPoint]) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.calls.push(CapturedCall {
            namespace: namespace.to_owned(),
            points: points.iter().map(|point| (*point).clone()).collect(),
        });

        if state.failing {
            return Err(SinkError::Rejected {
                status: 503,
                message: "ServiceUnavailable".to_owned(),
            });
        }

        Ok(())
    }
}
