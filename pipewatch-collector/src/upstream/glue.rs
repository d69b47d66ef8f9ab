use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipewatch_config::Config;
use pipewatch_jobs::{JobRunRecord, RunStatus, WorkerClass};
use pipewatch_statsd::metric;
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::statsd::CollectorCounters;
use crate::upstream::parse_items;
use crate::{HttpClient, HttpError, JobSource, Listing, Page, collect_pages};

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetJobsRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetJobsResponse {
    #[serde(default)]
    jobs: Vec<serde_json::Value>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JobSummary {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetJobRunsRequest<'a> {
    job_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetJobRunsResponse {
    #[serde(default)]
    job_runs: Vec<serde_json::Value>,
    next_token: Option<String>,
}

/// A job run as returned by the job API.
///
/// Timestamps are normalized to UTC here, so no other representation reaches the run filter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JobRun {
    id: Option<String>,
    job_name: Option<String>,
    #[serde(default, deserialize_with = "pipewatch_common::time::deserialize_opt")]
    started_on: Option<DateTime<Utc>>,
    job_run_state: Option<String>,
    execution_time: Option<f64>,
    allocated_capacity: Option<f64>,
    #[serde(rename = "DPUSeconds")]
    dpu_seconds: Option<f64>,
    worker_type: Option<String>,
}

impl JobRun {
    /// Converts into a record, or `None` if the run has no start time.
    fn into_record(self, job: &str) -> Option<JobRunRecord> {
        let run_id = self.id.unwrap_or_default();

        let Some(started_on) = self.started_on else {
            pipewatch_log::debug!(job, run_id = %run_id, "dropping job run without start time");
            metric!(counter(CollectorCounters::RecordsDropped) += 1);
            return None;
        };

        let status = RunStatus::parse(self.job_run_state.as_deref().unwrap_or_default());
        let worker_class = WorkerClass::parse(self.worker_type.as_deref().unwrap_or_default());

        Some(JobRunRecord {
            execution_time: self.execution_time,
            allocated_capacity: self.allocated_capacity,
            dpu_seconds: self.dpu_seconds,
            worker_class,
            ..JobRunRecord::new(
                self.job_name.unwrap_or_else(|| job.to_owned()),
                run_id,
                started_on,
                status,
            )
        })
    }
}

fn job_names(jobs: Vec<serde_json::Value>) -> Vec<String> {
    parse_items(jobs, |error| {
        pipewatch_log::debug!(error = error as &dyn Error, "dropping malformed job");
    })
    .into_iter()
    .map(|job: JobSummary| job.name)
    .collect()
}

fn job_records(job: &str, runs: Vec<serde_json::Value>) -> Vec<JobRunRecord> {
    parse_items(runs, |error| {
        pipewatch_log::debug!(job, error = error as &dyn Error, "dropping malformed job run");
    })
    .into_iter()
    .filter_map(|run: JobRun| run.into_record(job))
    .collect()
}

/// Client of the batch job API.
///
/// Requests are sent unsigned to the configured endpoint, which is expected to sign and forward
/// them.
#[derive(Clone, Debug)]
pub struct GlueClient {
    http: HttpClient,
    endpoint: Url,
    max_results: Option<u32>,
    max_pages: usize,
}

impl GlueClient {
    /// Creates a client for an endpoint.
    pub fn new(http: HttpClient, endpoint: Url, max_pages: usize) -> Self {
        Self {
            http,
            endpoint,
            max_results: None,
            max_pages,
        }
    }

    /// Creates a client from the configuration.
    pub fn from_config(http: HttpClient, config: &Config) -> Self {
        Self {
            max_results: config.glue_max_results(),
            ..Self::new(http, config.glue_endpoint().clone(), config.max_pages())
        }
    }

    async fn call<B, T>(&self, operation: &'static str, body: &B) -> Result<T, HttpError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let request = self
            .http
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("AWSGlue.{operation}"))
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(serde_json::to_vec(body)?);

        self.http.send(operation, request).await?.json().await
    }
}

#[async_trait]
impl JobSource for GlueClient {
    async fn list_jobs(&self) -> Listing<String> {
        collect_pages("GetJobs", self.max_pages, |cursor| async move {
            let request = GetJobsRequest {
                next_token: cursor.as_deref(),
                max_results: self.max_results,
            };
            let response: GetJobsResponse = self.call("GetJobs", &request).await?;

            let names = job_names(response.jobs);
            Ok::<_, HttpError>(Page::with_token(names, response.next_token))
        })
        .await
    }

    async fn list_runs(&self, job: &str) -> Listing<JobRunRecord> {
        collect_pages("GetJobRuns", self.max_pages, |cursor| async move {
            let request = GetJobRunsRequest {
                job_name: job,
                next_token: cursor.as_deref(),
                max_results: self.max_results,
            };
            let response: GetJobRunsResponse = self.call("GetJobRuns", &request).await?;

            let records = job_records(job, response.job_runs);
            Ok::<_, HttpError>(Page::with_token(records, response.next_token))
        })
        .await
    }
}
