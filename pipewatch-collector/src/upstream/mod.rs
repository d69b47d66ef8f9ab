//! Clients of the upstream job and workflow services.

use async_trait::async_trait;
use pipewatch_common::ObservationWindow;
use pipewatch_jobs::JobRunRecord;
use pipewatch_statsd::metric;
use serde::de::DeserializeOwned;

use crate::Listing;
use crate::statsd::CollectorCounters;

mod console;
mod glue;

pub use self::console::*;
pub use self::glue::*;

/// The batch job service.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Lists the names of all jobs.
    async fn list_jobs(&self) -> Listing<String>;

    /// Lists the runs of a job.
    ///
    /// The upstream returns runs regardless of any window, the caller applies the run filter.
    async fn list_runs(&self, job: &str) -> Listing<JobRunRecord>;
}

/// An authenticated session with the web console of one workflow environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleSession {
    /// The environment this session belongs to.
    pub environment: String,
    /// Base URL of the web server, such as `https://abc.airflow.example.com/`.
    pub base: url::Url,
    /// Value of the `session` cookie.
    pub cookie: String,
}

/// The workflow orchestration service.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// Acquires a console session for an environment.
    async fn open_session(&self, environment: &str) -> Result<ConsoleSession, ConsoleError>;

    /// Lists the ids of all DAGs of the session's environment.
    async fn list_dags(&self, session: &ConsoleSession) -> Listing<String>;

    /// Lists the runs of a DAG that started in the window.
    ///
    /// Records carry the session's environment.
    async fn list_dag_runs(
        &self,
        session: &ConsoleSession,
        dag_id: &str,
        window: &ObservationWindow,
    ) -> Listing<JobRunRecord>;
}

/// Deserializes the items of a page one by one.
///
/// Items that do not match `T` are counted and passed to `on_malformed`, and the remaining items
/// of the page are kept.
fn parse_items<T, F>(items: Vec<serde_json::Value>, mut on_malformed: F) -> Vec<T>
where
    T: DeserializeOwned,
    F: FnMut(&serde_json::Error),
{
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                metric!(counter(CollectorCounters::RecordsDropped) += 1);
                on_malformed(&error);
                None
            }
        })
        .collect()
}
