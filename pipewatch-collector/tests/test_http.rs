use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use pipewatch_collector::{
    ConsoleClient, ConsoleError, GlueClient, HttpClient, HttpMetricSink, IncompleteReason,
    Invocation, JobSource, Orchestrator, StatusCode, WorkflowSource,
};
use pipewatch_common::ObservationWindow;
use pipewatch_jobs::RunStatus;
use pipewatch_metrics::{MetricPoint, MetricSink, MetricUnit, SinkError};
use pipewatch_test::mock::{
    ConsoleData, GlueData, MockConsole, MockGlue, MockMetrics, TokenMode,
};
use pipewatch_test::{at, config};
use serde_json::{Value, json};
use similar_asserts::assert_eq;
use tokio::time::Instant;

fn http() -> HttpClient {
    HttpClient::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap()
}

fn names(jobs: &[&str]) -> Vec<String> {
    jobs.iter().map(|job| (*job).to_owned()).collect()
}

fn glue_run(id: &str, started_on: i64, state: &str) -> Value {
    json!({
        "Id": id,
        "StartedOn": started_on,
        "JobRunState": state,
    })
}

fn dag_run(id: &str, start_date: &str, state: &str) -> Value {
    json!({
        "dag_run_id": id,
        "start_date": start_date,
        "state": state,
    })
}

#[tokio::test]
async fn test_glue_follows_tokens() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["a", "b", "c", "d", "e"]),
        runs: BTreeMap::from([(
            "a".to_owned(),
            vec![
                glue_run("jr_1", 1_719_741_600, "SUCCEEDED"),
                glue_run("jr_2", 1_719_742_500, "FAILED"),
                glue_run("jr_3", 1_719_743_400, "RUNNING"),
            ],
        )]),
        page_size: 2,
        ..Default::default()
    })
    .await;

    let client = GlueClient::new(http(), glue.url(), 10);

    let jobs = client.list_jobs().await;
    assert!(jobs.incomplete().is_none());
    assert_eq!(jobs.pages(), 3);
    assert_eq!(jobs.items(), ["a", "b", "c", "d", "e"]);

    let runs = client.list_runs("a").await;
    assert!(runs.incomplete().is_none());
    assert_eq!(runs.pages(), 2);

    let statuses: Vec<_> = runs.items().iter().map(|run| run.status.clone()).collect();
    assert_eq!(
        statuses,
        [RunStatus::Succeeded, RunStatus::Failed, RunStatus::Running]
    );
    assert_eq!(runs.items()[2].started_on, at(10, 30));

    let tokens: Vec<_> = glue
        .requests()
        .into_iter()
        .filter(|(target, _)| target == "AWSGlue.GetJobs")
        .map(|(_, body)| body["NextToken"].clone())
        .collect();
    assert_eq!(tokens, [Value::Null, json!("2"), json!("4")]);
}

#[tokio::test]
async fn test_glue_malformed_run_keeps_page() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["a"]),
        runs: BTreeMap::from([(
            "a".to_owned(),
            vec![
                glue_run("jr_1", 1_719_741_600, "SUCCEEDED"),
                json!({"Id": "jr_2", "StartedOn": "not-a-date", "JobRunState": "FAILED"}),
                json!({"StartedOn": 1_719_742_500, "JobRunState": "FAILED"}),
            ],
        )]),
        page_size: 10,
        ..Default::default()
    })
    .await;

    let runs = GlueClient::new(http(), glue.url(), 10).list_runs("a").await;

    assert!(runs.incomplete().is_none());
    let statuses: Vec<_> = runs.items().iter().map(|run| run.status.clone()).collect();
    assert_eq!(statuses, [RunStatus::Succeeded, RunStatus::Failed]);
}

#[tokio::test]
async fn test_glue_repeated_token() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["a", "b", "c"]),
        page_size: 2,
        tokens: TokenMode::Repeat,
        ..Default::default()
    })
    .await;

    let jobs = GlueClient::new(http(), glue.url(), 10).list_jobs().await;

    let incomplete = jobs.incomplete().unwrap();
    assert!(matches!(incomplete.reason, IncompleteReason::TokenLoop));
    assert!(!jobs.is_failed());
    assert_eq!(jobs.pages(), 2);
    assert_eq!(glue.requests().len(), 2);
}

#[tokio::test]
async fn test_glue_page_limit() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["a"]),
        page_size: 1,
        tokens: TokenMode::Endless,
        ..Default::default()
    })
    .await;

    let jobs = GlueClient::new(http(), glue.url(), 3).list_jobs().await;

    let incomplete = jobs.incomplete().unwrap();
    assert!(matches!(incomplete.reason, IncompleteReason::PageLimit(3)));
    assert_eq!(jobs.pages(), 3);
    assert_eq!(jobs.items(), ["a"]);
    assert_eq!(glue.requests().len(), 3);
}

#[tokio::test]
async fn test_glue_server_error() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["a"]),
        page_size: 10,
        failing: BTreeSet::from(["a".to_owned()]),
        ..Default::default()
    })
    .await;

    let runs = GlueClient::new(http(), glue.url(), 10).list_runs("a").await;

    assert!(runs.is_failed());
    assert!(runs.items().is_empty());
    assert!(matches!(
        runs.incomplete().unwrap().reason,
        IncompleteReason::RequestFailed(_)
    ));
}

fn console_data() -> ConsoleData {
    let prod = BTreeMap::from([
        (
            "extract".to_owned(),
            vec![
                dag_run("scheduled__1", "2024-06-30T10:40:00+00:00", "success"),
                dag_run("scheduled__2", "2024-06-30T10:50:00+00:00", "success"),
                dag_run("manual__3", "2024-06-30T10:55:00+00:00", "running"),
            ],
        ),
        (
            "load".to_owned(),
            vec![dag_run("scheduled__1", "2024-06-30T10:45:00+00:00", "failed")],
        ),
    ]);

    ConsoleData {
        environments: BTreeMap::from([("prod".to_owned(), prod)]),
        page_size: 2,
    }
}

fn console_config(console: &MockConsole) -> Arc<pipewatch_config::Config> {
    config(&format!(
        "
collectors: [dag_status]
workflow:
  token_endpoint: {}
  scheme: http
  page_size: 2
  environments: [prod]
",
        console.url()
    ))
}

#[tokio::test]
async fn test_console_session_and_links() {
    pipewatch_test::setup();

    let console = MockConsole::start(console_data()).await;
    let client = ConsoleClient::from_config(http(), &console_config(&console));

    let session = client.open_session("prod").await.unwrap();
    assert_eq!(session.environment, "prod");
    assert_eq!(session.cookie, "session-prod");
    assert_eq!(session.base, console.url());

    let dags = client.list_dags(&session).await;
    assert!(dags.incomplete().is_none());
    assert_eq!(dags.items(), ["extract", "load"]);

    let window = ObservationWindow::new(at(10, 30), at(11, 0)).unwrap();
    let runs = client.list_dag_runs(&session, "extract", &window).await;
    assert!(runs.incomplete().is_none());
    assert_eq!(runs.pages(), 2);
    assert_eq!(runs.items().len(), 3);
    assert!(runs.items().iter().all(|run| run.job == "extract"));
    assert!(
        runs.items()
            .iter()
            .all(|run| run.environment.as_deref() == Some("prod"))
    );

    assert_eq!(
        console.requests(),
        [
            "/webtoken/prod",
            "/aws_mwaa/login",
            "/api/v1/dags",
            "/api/v1/dags/extract/dagRuns",
            "/api/v1/dags/extract/dagRuns",
        ]
    );
}

#[tokio::test]
async fn test_console_unknown_environment() {
    pipewatch_test::setup();

    let console = MockConsole::start(console_data()).await;
    let client = ConsoleClient::from_config(http(), &console_config(&console));

    let error = client.open_session("staging").await.unwrap_err();
    let ConsoleError::Token(error) = error else {
        panic!("expected token error, got {error:?}");
    };
    assert_eq!(error.status(), Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn test_sink_publishes_points() {
    pipewatch_test::setup();

    let metrics = MockMetrics::start().await;
    let sink = HttpMetricSink::new(http(), metrics.url());

    let points = [
        MetricPoint::new("Glue.TotalRuns", 10.0, MetricUnit::Count),
        MetricPoint::new("Glue.RunSuccessRate", 70.0, MetricUnit::Percent),
    ];
    let refs: Vec<_> = points.iter().collect();
    sink.put_metrics("GlueCM", &refs).await.unwrap();

    assert_eq!(
        metrics.calls(),
        [json!({
            "Namespace": "GlueCM",
            "MetricData": [
                {"MetricName": "Glue.TotalRuns", "Value": 10.0, "Unit": "Count"},
                {"MetricName": "Glue.RunSuccessRate", "Value": 70.0, "Unit": "Percent"},
            ],
        })]
    );
}

#[tokio::test]
async fn test_sink_rejected() {
    pipewatch_test::setup();

    let metrics = MockMetrics::start_with_status(StatusCode::BAD_REQUEST).await;
    let sink = HttpMetricSink::new(http(), metrics.url());

    let point = MetricPoint::new("Glue.TotalRuns", 1.0, MetricUnit::Count);
    let error = sink.put_metrics("GlueCM", &[&point]).await.unwrap_err();

    assert!(matches!(
        error,
        SinkError::Rejected { status: 400, ref message } if message == "Throttling"
    ));
}

#[tokio::test]
async fn test_invocation_over_http() {
    pipewatch_test::setup();

    let glue = MockGlue::start(GlueData {
        jobs: names(&["etl-1", "etl-2"]),
        runs: BTreeMap::from([(
            "etl-1".to_owned(),
            vec![
                json!({
                    "Id": "jr_1",
                    "StartedOn": 1_719_743_400,
                    "JobRunState": "SUCCEEDED",
                    "DPUSeconds": 1800.0,
                }),
                glue_run("jr_2", 1_719_744_300, "FAILED"),
            ],
        )]),
        page_size: 1,
        failing: BTreeSet::from(["etl-2".to_owned()]),
        ..Default::default()
    })
    .await;
    let console = MockConsole::start(console_data()).await;
    let metrics = MockMetrics::start().await;

    let config = config(&format!(
        "
collectors: [dpu_cost, job_status, run_summary, dag_status]
glue:
  endpoint: {}
workflow:
  token_endpoint: {}
  scheme: http
  page_size: 2
  environments: [prod]
sink:
  endpoint: {}
",
        glue.url(),
        console.url(),
        metrics.url(),
    ));

    let http = HttpClient::from_config(&config).unwrap();
    let orchestrator = Orchestrator::new(
        config.clone(),
        Arc::new(GlueClient::from_config(http.clone(), &config)),
        Arc::new(ConsoleClient::from_config(http.clone(), &config)),
        Arc::new(HttpMetricSink::from_config(http, &config)),
    );

    let invocation = Invocation::new(at(11, 0), Instant::now() + Duration::from_secs(30));
    let report = orchestrator.run(invocation).await.unwrap();

    // job listing, etl-1, prod, extract and load
    assert_eq!(report.scopes.succeeded, 5);
    assert_eq!(report.scopes.failed, 1);
    assert_eq!(report.emission.failed, 0);

    let calls = metrics.calls();
    let namespaces: Vec<_> = calls
        .iter()
        .map(|call| call["Namespace"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(namespaces, ["GlueCM", "GlueCM", "GlueCM", "AmazonMWAA"]);

    assert_eq!(
        calls[0]["MetricData"],
        json!([
            {
                "MetricName": "DPU_Seconds",
                "Value": 1800.0,
                "Unit": "Seconds",
                "Dimensions": [{"Name": "JobName", "Value": "etl-1"}],
            },
            {
                "MetricName": "DPU_Cost",
                "Value": 0.22,
                "Unit": "None",
                "Dimensions": [{"Name": "JobName", "Value": "etl-1"}],
            },
        ])
    );

    let environment_totals: Vec<_> = calls[3]["MetricData"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|point| point["Dimensions"].as_array().unwrap().len() == 1)
        .map(|point| (point["MetricName"].clone(), point["Value"].clone()))
        .collect();
    assert_eq!(
        environment_totals,
        [
            (json!("DAGRuns.EnvironmentSuccess"), json!(2.0)),
            (json!("DAGRuns.EnvironmentFailed"), json!(1.0)),
        ]
    );
}
