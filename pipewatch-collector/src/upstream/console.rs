use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipewatch_common::ObservationWindow;
use pipewatch_common::time::format_timestamp;
use pipewatch_config::Config;
use pipewatch_jobs::{JobRunRecord, RunStatus};
use pipewatch_statsd::metric;
use reqwest::header;
use serde::Deserialize;
use url::Url;

use crate::statsd::CollectorCounters;
use crate::upstream::parse_items;
use crate::{ConsoleSession, HttpClient, HttpError, Listing, Page, WorkflowSource, collect_pages};

/// Name of the cookie carrying the console session.
const SESSION_COOKIE: &str = "session";

type BoxError = Box<dyn Error + Send + Sync>;

/// An error acquiring a web console session.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// The web login token could not be created.
    #[error("could not create web login token")]
    Token(#[source] HttpError),
    /// The token response named a host that does not form a valid URL.
    #[error("invalid web server hostname '{0}'")]
    InvalidHost(String),
    /// The login request failed.
    #[error("web console login failed")]
    Login(#[source] HttpError),
    /// The login succeeded but did not set a session cookie.
    #[error("web console login did not set a session cookie")]
    MissingSession,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebLoginToken {
    web_server_hostname: String,
    web_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

#[derive(Debug, Deserialize)]
struct DagCollection {
    #[serde(default)]
    dags: Vec<serde_json::Value>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct Dag {
    dag_id: String,
}

#[derive(Debug, Deserialize)]
struct DagRunCollection {
    #[serde(default)]
    dag_runs: Vec<serde_json::Value>,
    #[serde(default, rename = "_links")]
    links: Links,
}

#[derive(Debug, Deserialize)]
struct DagRun {
    dag_run_id: Option<String>,
    #[serde(default, deserialize_with = "pipewatch_common::time::deserialize_opt")]
    start_date: Option<DateTime<Utc>>,
    state: Option<String>,
}

impl DagRun {
    fn into_record(self, environment: &str, dag_id: &str) -> Option<JobRunRecord> {
        let run_id = self.dag_run_id.unwrap_or_default();

        let Some(started_on) = self.start_date else {
            pipewatch_log::debug!(
                environment,
                dag_id,
                run_id = %run_id,
                "dropping dag run without start date"
            );
            metric!(counter(CollectorCounters::RecordsDropped) += 1);
            return None;
        };

        let status = RunStatus::parse(self.state.as_deref().unwrap_or_default());
        Some(JobRunRecord {
            environment: Some(environment.to_owned()),
            ..JobRunRecord::new(dag_id, run_id, started_on, status)
        })
    }
}

fn dag_ids(environment: &str, dags: Vec<serde_json::Value>) -> Vec<String> {
    parse_items(dags, |error| {
        pipewatch_log::debug!(environment, error = error as &dyn Error, "dropping malformed dag");
    })
    .into_iter()
    .map(|dag: Dag| dag.dag_id)
    .collect()
}

fn dag_records(
    environment: &str,
    dag_id: &str,
    runs: Vec<serde_json::Value>,
) -> Vec<JobRunRecord> {
    parse_items(runs, |error| {
        pipewatch_log::debug!(
            environment,
            dag_id,
            error = error as &dyn Error,
            "dropping malformed dag run"
        );
    })
    .into_iter()
    .filter_map(|run: DagRun| run.into_record(environment, dag_id))
    .collect()
}

/// Appends path segments to a base URL, percent-encoding each segment.
fn with_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Client of the workflow service and its per-environment web consoles.
///
/// A session is acquired by exchanging a web login token for a `session` cookie, which is then
/// sent explicitly with every API request of that environment.
#[derive(Clone, Debug)]
pub struct ConsoleClient {
    http: HttpClient,
    token_endpoint: Url,
    scheme: String,
    page_size: u32,
    max_pages: usize,
}

impl ConsoleClient {
    /// Creates a client that requests login tokens from `token_endpoint`.
    pub fn new(http: HttpClient, token_endpoint: Url, max_pages: usize) -> Self {
        Self {
            http,
            token_endpoint,
            scheme: "https".to_owned(),
            page_size: 300,
            max_pages,
        }
    }

    /// Creates a client from the configuration.
    pub fn from_config(http: HttpClient, config: &Config) -> Self {
        Self {
            scheme: config.workflow_scheme().to_owned(),
            page_size: config.dag_page_size(),
            ..Self::new(http, config.workflow_endpoint().clone(), config.max_pages())
        }
    }

    async fn get_page<T>(
        &self,
        operation: &'static str,
        session: &ConsoleSession,
        url: Url,
    ) -> Result<T, HttpError>
    where
        T: serde::de::DeserializeOwned,
    {
        let request = self
            .http
            .get(url)
            .header(header::COOKIE, format!("{SESSION_COOKIE}={}", session.cookie));

        self.http.send(operation, request).await?.json().await
    }

    fn page_url(&self, cursor: Option<String>, first: &Url) -> Result<Url, BoxError> {
        match cursor {
            Some(cursor) => Ok(Url::parse(&cursor)?),
            None => Ok(first.clone()),
        }
    }
}

#[async_trait]
impl WorkflowSource for ConsoleClient {
    async fn open_session(&self, environment: &str) -> Result<ConsoleSession, ConsoleError> {
        let token_url = with_segments(&self.token_endpoint, &["webtoken", environment]);
        let token: WebLoginToken = self
            .http
            .send("webtoken", self.http.post(token_url))
            .await
            .map_err(ConsoleError::Token)?
            .json()
            .await
            .map_err(ConsoleError::Token)?;

        let host = token.web_server_hostname;
        let base = Url::parse(&format!("{}://{host}/", self.scheme))
            .ok()
            .filter(|url| url.host().is_some() && url.path() == "/")
            .ok_or_else(|| ConsoleError::InvalidHost(host.clone()))?;

        let login = self
            .http
            .post(with_segments(&base, &["aws_mwaa", "login"]))
            .form(&[("token", token.web_token.as_str())]);

        let response = self
            .http
            .send("login", login)
            .await
            .map_err(ConsoleError::Login)?;

        let cookie = response
            .cookie(SESSION_COOKIE)
            .ok_or(ConsoleError::MissingSession)?;

        pipewatch_log::debug!(environment, host = %host, "acquired web console session");

        Ok(ConsoleSession {
            environment: environment.to_owned(),
            base,
            cookie,
        })
    }

    async fn list_dags(&self, session: &ConsoleSession) -> Listing<String> {
        let mut first = with_segments(&session.base, &["api", "v1", "dags"]);
        first
            .query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string());

        collect_pages("dags", self.max_pages, |cursor| {
            let first = &first;
            async move {
                let url = self.page_url(cursor, first)?;
                let page: DagCollection = self.get_page("dags", session, url).await?;

                let ids = dag_ids(&session.environment, page.dags);
                let href = page.links.next.map(|link| link.href);
                Ok::<_, BoxError>(Page::with_link(ids, &session.base, href.as_deref()))
            }
        })
        .await
    }

    async fn list_dag_runs(
        &self,
        session: &ConsoleSession,
        dag_id: &str,
        window: &ObservationWindow,
    ) -> Listing<JobRunRecord> {
        let mut first = with_segments(&session.base, &["api", "v1", "dags", dag_id, "dagRuns"]);
        first
            .query_pairs_mut()
            .append_pair("start_date_gte", &format_timestamp(window.start()))
            .append_pair("end_date_lte", &format_timestamp(window.end()))
            .append_pair("limit", &self.page_size.to_string());

        let environment = session.environment.as_str();

        collect_pages("dag_runs", self.max_pages, |cursor| {
            let first = &first;
            async move {
                let url = self.page_url(cursor, first)?;
                let page: DagRunCollection = self.get_page("dag_runs", session, url).await?;

                let records = dag_records(environment, dag_id, page.dag_runs);
                let href = page.links.next.map(|link| link.href);
                Ok::<_, BoxError>(Page::with_link(records, &session.base, href.as_deref()))
            }
        })
        .await
    }
}
