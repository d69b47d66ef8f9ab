//! Translation between triggers and invocations.
//!
//! A trigger event is any JSON object. Only an optional `collectors` list is read, which restricts
//! the invocation to the named collectors:
//!
//! ```json
//! {"collectors": ["job_status", "run_summary"]}
//! ```
//!
//! The result is returned in the shape of an HTTP response, with the invocation report as body:
//!
//! ```json
//! {"statusCode": 200, "body": "{\"collectors\":[...],\"scopes\":{...},...}"}
//! ```

use std::error::Error;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pipewatch_collector::{Invocation, InvocationError, InvocationReport, Orchestrator};
use pipewatch_config::{CollectorKind, Config};
use pipewatch_lambda::{LambdaInvocation, RuntimeApi};
use pipewatch_log::InlineError;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// The fields of a trigger event that pipewatch reads.
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
struct TriggerEvent {
    collectors: Option<Vec<CollectorKind>>,
}

impl TriggerEvent {
    fn parse(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        if payload.is_null() {
            return Ok(Self::default());
        }

        Self::deserialize(payload)
    }
}

/// Result of a trigger in the shape of an HTTP response.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    status_code: u16,
    body: String,
}

impl TriggerResponse {
    fn ok(report: &InvocationReport) -> Self {
        Self {
            status_code: 200,
            body: response_body(report),
        }
    }

    fn failed(error: String, report: Option<&InvocationReport>) -> Self {
        #[derive(Serialize)]
        struct FailureBody<'a> {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            report: Option<&'a InvocationReport>,
        }

        Self {
            status_code: 500,
            body: response_body(&FailureBody { error, report }),
        }
    }

    fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Serializes a response body, falling back to a plain error object.
fn response_body<T: Serialize>(body: &T) -> String {
    serde_json::to_string(body).unwrap_or_else(|error| {
        pipewatch_log::error!(
            error = &error as &dyn Error,
            "failed to serialize invocation result"
        );
        format!(
            r#"{{"error":"failed to serialize invocation result: {}"}}"#,
            error.to_string().replace(['"', '\\'], "'")
        )
    })
}

/// Runs one invocation for a trigger event.
async fn invoke(
    orchestrator: &Orchestrator,
    payload: &serde_json::Value,
    now: DateTime<Utc>,
    deadline: Instant,
) -> TriggerResponse {
    let event = match TriggerEvent::parse(payload) {
        Ok(event) => event,
        Err(error) => {
            pipewatch_log::error!(error = &error as &dyn Error, "invalid trigger event");
            return TriggerResponse::failed(format!("invalid trigger event: {error}"), None);
        }
    };

    let mut invocation = Invocation::new(now, deadline);
    if let Some(collectors) = event.collectors {
        invocation = invocation.with_collectors(collectors);
    }

    match orchestrator.run(invocation).await {
        Ok(report) => TriggerResponse::ok(&report),
        Err(error) => {
            if error.is_config() {
                pipewatch_log::error!(error = &error as &dyn Error, "invocation failed");
            } else {
                pipewatch_log::warn!(error = &error as &dyn Error, "invocation failed");
            }
            failure(&error)
        }
    }
}

fn failure(error: &InvocationError) -> TriggerResponse {
    TriggerResponse::failed(InlineError(error).to_string(), error.report())
}

/// Returns the instant after which no new upstream work starts.
///
/// The margin is kept free for publishing results before the runtime stops the process. The
/// budget never exceeds `limit`.
fn budget_deadline(remaining: Duration, margin: Duration, limit: Duration) -> Instant {
    Instant::now() + remaining.saturating_sub(margin).min(limit)
}

/// Runs a single invocation of all configured collectors and returns the exit code.
pub async fn run_once(config: &Config, orchestrator: &Orchestrator) -> i32 {
    let timeout = config.invocation_timeout();
    let deadline = budget_deadline(timeout, Duration::ZERO, timeout);
    let response = invoke(orchestrator, &serde_json::Value::Null, Utc::now(), deadline).await;

    pipewatch_log::debug!(body = %response.body, "invocation result");

    if response.is_success() { 0 } else { 1 }
}

/// Serves triggers from the runtime until it stops the process.
pub async fn serve(api: &RuntimeApi, config: &Config, orchestrator: &Orchestrator) -> Result<i32> {
    pipewatch_log::info!("waiting for triggers from the function runtime");

    loop {
        let invocation: LambdaInvocation = api
            .next_invocation()
            .await
            .context("failed to receive the next trigger")?;

        let now = Utc::now();
        let deadline = budget_deadline(
            invocation.remaining(now),
            config.deadline_margin(),
            config.invocation_timeout(),
        );

        let response = invoke(orchestrator, &invocation.payload, now, deadline).await;

        if let Err(error) = api.respond(&invocation.request_id, &response).await {
            pipewatch_log::error!(
                request_id = %invocation.request_id,
                error = &error as &dyn Error,
                "failed to report invocation result",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pipewatch_jobs::RunStatus;
    use pipewatch_test::fakes::{CapturingSink, FakeJobs, FakeListing, FakeWorkflow};
    use pipewatch_test::{at, config, job_run};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    fn orchestrator(jobs: FakeJobs) -> Orchestrator {
        Orchestrator::new(
            config(""),
            Arc::new(jobs),
            Arc::new(FakeWorkflow::new()),
            Arc::new(CapturingSink::new()),
        )
    }

    fn in_a_minute() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_parse_event() {
        assert_eq!(TriggerEvent::parse(&json!(null)).unwrap(), TriggerEvent::default());

        // Scheduled events carry fields of their own.
        let scheduled = json!({
            "version": "0",
            "detail-type": "Scheduled Event",
            "source": "aws.events",
        });
        assert_eq!(TriggerEvent::parse(&scheduled).unwrap(), TriggerEvent::default());

        let event = TriggerEvent::parse(&json!({"collectors": ["dag_status", "dpu_cost"]})).unwrap();
        assert_eq!(
            event.collectors,
            Some(vec![CollectorKind::DagStatus, CollectorKind::DpuCost])
        );

        assert!(TriggerEvent::parse(&json!({"collectors": ["throughput"]})).is_err());
    }

    #[test]
    fn test_serialize_response() {
        let response = TriggerResponse::failed("no collectors".to_owned(), None);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"statusCode":500,"body":"{\"error\":\"no collectors\"}"}"#
        );
    }

    #[test]
    fn test_unserializable_body() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("broken \"value\""))
            }
        }

        let body = response_body(&Broken);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            parsed["error"],
            "failed to serialize invocation result: broken 'value'"
        );
    }

    #[test]
    fn test_failure_includes_sources() {
        let error = InvocationError::Window {
            collector: CollectorKind::DpuCost,
            source: pipewatch_common::WindowError::NonPositiveWidth(0),
        };

        let response = failure(&error);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(
            body["error"],
            "invalid observation window for collector 'dpu_cost': \
             window width must be positive, got 0 minutes"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_margin() {
        let start = Instant::now();
        let limit = Duration::from_secs(300);
        assert_eq!(
            budget_deadline(Duration::from_secs(60), Duration::from_secs(5), limit),
            start + Duration::from_secs(55)
        );
        assert_eq!(
            budget_deadline(Duration::from_secs(2), Duration::from_secs(5), limit),
            start
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_capped() {
        let start = Instant::now();
        let limit = Duration::from_secs(300);
        assert_eq!(
            budget_deadline(Duration::MAX, Duration::from_secs(5), limit),
            start + limit
        );
    }

    #[tokio::test]
    async fn test_invoke_success() {
        pipewatch_test::setup();

        let jobs = FakeJobs::new().job(
            "etl-1",
            vec![job_run("etl-1", "jr_1", at(10, 30), RunStatus::Succeeded)],
        );
        let response = invoke(&orchestrator(jobs), &json!({}), at(11, 0), in_a_minute()).await;

        assert!(response.is_success());
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["scopes"]["succeeded"], 2);
        assert_eq!(body["collectors"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_invoke_disabled_collector() {
        pipewatch_test::setup();

        let payload = json!({"collectors": ["dag_status"]});
        let orchestrator = orchestrator(FakeJobs::new());
        let response = invoke(&orchestrator, &payload, at(11, 0), in_a_minute()).await;

        assert_eq!(
            response,
            TriggerResponse {
                status_code: 500,
                body: r#"{"error":"collector 'dag_status' is not enabled"}"#.to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn test_invoke_unavailable() {
        pipewatch_test::setup();

        let jobs = FakeJobs::new().listing(FakeListing::Fail("connection refused".to_owned()));
        let response = invoke(&orchestrator(jobs), &json!(null), at(11, 0), in_a_minute()).await;

        assert!(!response.is_success());
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["error"], "no upstream scope could be collected");
        assert_eq!(body["report"]["scopes"]["failed"], 1);
        assert_eq!(body["report"]["issues"][0]["scope"], "jobs");
    }
}
