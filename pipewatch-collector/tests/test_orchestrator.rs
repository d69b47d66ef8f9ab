use std::sync::Arc;
use std::time::Duration;

use pipewatch_collector::{
    Invocation, InvocationError, InvocationReport, JOB_NAMESPACE, Orchestrator, Scope,
    ScopeOutcome, WORKFLOW_NAMESPACE,
};
use pipewatch_config::{CollectorKind, Config};
use pipewatch_jobs::RunStatus;
use pipewatch_test::fakes::{CapturingSink, FakeEnvironment, FakeJobs, FakeListing, FakeWorkflow};
use pipewatch_test::{at, config, costed_run, dag_run, job_run};
use similar_asserts::assert_eq;
use tokio::time::Instant;

fn orchestrator(
    config: Arc<Config>,
    jobs: FakeJobs,
    workflow: FakeWorkflow,
    sink: &CapturingSink,
) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(jobs),
        Arc::new(workflow),
        Arc::new(sink.clone()),
    )
}

fn invocation() -> Invocation {
    Invocation::new(at(11, 0), Instant::now() + Duration::from_secs(60))
}

fn scenario_jobs() -> FakeJobs {
    FakeJobs::new()
        .job(
            "etl-1",
            vec![
                costed_run("etl-1", "jr_1", at(10, 30), RunStatus::Succeeded, 1800.0),
                job_run("etl-1", "jr_2", at(10, 45), RunStatus::Failed),
            ],
        )
        .job(
            "etl-2",
            vec![job_run("etl-2", "jr_3", at(8, 0), RunStatus::Succeeded)],
        )
}

fn status(sink: &CapturingSink, job: &str, status: &str) -> Option<f64> {
    sink.value("JobStatusCount", &[("JobName", job), ("Status", status)])
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    pipewatch_test::setup();

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), scenario_jobs(), FakeWorkflow::new(), &sink);
    let report = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(sink.value("DPU_Seconds", &[("JobName", "etl-1")]), Some(1800.0));
    assert_eq!(sink.value("DPU_Cost", &[("JobName", "etl-1")]), Some(0.22));
    assert_eq!(sink.value("DPU_Seconds", &[("JobName", "etl-2")]), None);
    assert_eq!(sink.value("DPU_Cost", &[("JobName", "etl-2")]), None);

    assert_eq!(status(&sink, "etl-1", "Succeeded"), Some(1.0));
    assert_eq!(status(&sink, "etl-1", "Failed"), Some(1.0));
    assert_eq!(status(&sink, "etl-1", "Running"), Some(0.0));
    assert_eq!(status(&sink, "etl-2", "Succeeded"), Some(0.0));

    assert_eq!(sink.value("Glue.TotalRuns", &[]), Some(2.0));
    assert_eq!(sink.value("Glue.SuccessfulRuns", &[]), Some(1.0));
    assert_eq!(sink.value("Glue.FailedRuns", &[]), Some(1.0));
    assert_eq!(sink.value("Glue.RunSuccessRate", &[]), Some(50.0));

    insta::assert_json_snapshot!(report, @r###"
    {
      "collectors": [
        {
          "collector": "dpu_cost",
          "window": {
            "start": "2024-06-30T10:00:00Z",
            "end": "2024-06-30T11:00:00Z"
          },
          "points": 2,
          "rejected": 0
        },
        {
          "collector": "job_status",
          "window": {
            "start": "2024-06-30T10:00:00Z",
            "end": "2024-06-30T11:00:00Z"
          },
          "points": 6,
          "rejected": 0
        },
        {
          "collector": "run_summary",
          "window": {
            "start": "2024-06-30T10:00:00Z",
            "end": "2024-06-30T11:00:00Z"
          },
          "points": 6,
          "rejected": 0
        }
      ],
      "scopes": {
        "succeeded": 3,
        "degraded": 0,
        "failed": 0,
        "skipped": 0
      },
      "emission": {
        "calls": 3,
        "sent": 14,
        "failed": 0
      },
      "deadline_exceeded": false
    }
    "###);
}

#[tokio::test]
async fn test_jobs_share_one_fetch() {
    pipewatch_test::setup();

    let sink = CapturingSink::new();
    let jobs = Arc::new(scenario_jobs());
    let orchestrator = Orchestrator::new(
        config(""),
        jobs.clone(),
        Arc::new(FakeWorkflow::new()),
        Arc::new(sink.clone()),
    );
    orchestrator.run(invocation()).await.unwrap();

    let mut requested = jobs.requested();
    requested.sort();
    assert_eq!(requested, ["etl-1", "etl-2"]);
}

#[tokio::test]
async fn test_failed_job_contributes_nothing() {
    pipewatch_test::setup();

    let jobs = FakeJobs::new()
        .job_with("etl-1", FakeListing::Fail("connection reset".to_owned()))
        .job(
            "etl-2",
            vec![job_run("etl-2", "jr_1", at(10, 15), RunStatus::Succeeded)],
        );

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), jobs, FakeWorkflow::new(), &sink);
    let report = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(report.scopes.succeeded, 2);
    assert_eq!(report.scopes.failed, 1);

    let issue = &report.issues[0];
    assert_eq!(
        issue.scope,
        Scope::Job {
            job: "etl-1".to_owned()
        }
    );
    assert_eq!(issue.outcome, ScopeOutcome::Failed);
    assert_eq!(
        issue.reason,
        "listing GetJobRuns incomplete after 0 pages: request failed: connection reset"
    );

    // No zeros are reported for a job that could not be listed.
    assert_eq!(status(&sink, "etl-1", "Succeeded"), None);
    assert_eq!(status(&sink, "etl-2", "Succeeded"), Some(1.0));
    assert_eq!(sink.value("Glue.TotalRuns", &[]), Some(1.0));
}

#[tokio::test]
async fn test_incomplete_listing_is_degraded() {
    pipewatch_test::setup();

    let jobs = FakeJobs::new().job_with(
        "etl-1",
        FakeListing::Partial(vec![job_run("etl-1", "jr_1", at(10, 15), RunStatus::Failed)]),
    );

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), jobs, FakeWorkflow::new(), &sink);
    let report = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(report.scopes.degraded, 1);
    assert_eq!(report.issues(ScopeOutcome::Degraded).count(), 1);
    assert_eq!(status(&sink, "etl-1", "Failed"), Some(1.0));
}

#[tokio::test]
async fn test_unavailable_job_api() {
    pipewatch_test::setup();

    let jobs = FakeJobs::new()
        .job("etl-1", Vec::new())
        .listing(FakeListing::Fail("AccessDeniedException".to_owned()));

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), jobs, FakeWorkflow::new(), &sink);
    let error = orchestrator.run(invocation()).await.unwrap_err();

    let InvocationError::Unavailable(report) = error else {
        panic!("expected unavailable error");
    };
    assert_eq!(report.scopes.failed, 1);
    assert_eq!(report.issues[0].scope, Scope::Jobs);

    // Neither zeros nor an empty summary are emitted.
    assert!(sink.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_time_budget() {
    pipewatch_test::setup();

    let jobs = FakeJobs::new()
        .job(
            "etl-1",
            vec![job_run("etl-1", "jr_1", at(10, 15), RunStatus::Succeeded)],
        )
        .job_with("etl-2", FakeListing::Hang)
        .job(
            "etl-3",
            vec![job_run("etl-3", "jr_2", at(10, 20), RunStatus::Succeeded)],
        );

    let sink = CapturingSink::new();
    let config = config("limits:\n  max_workers: 1");
    let orchestrator = orchestrator(config, jobs, FakeWorkflow::new(), &sink);

    let deadline = Instant::now() + Duration::from_secs(10);
    let report = orchestrator
        .run(Invocation::new(at(11, 0), deadline))
        .await
        .unwrap();

    assert!(report.deadline_exceeded);
    assert_eq!(report.scopes.succeeded, 2);
    assert_eq!(report.scopes.failed, 1);
    assert_eq!(report.scopes.skipped, 1);

    let outcomes: Vec<_> = report
        .issues
        .iter()
        .map(|issue| (issue.scope.to_string(), issue.outcome))
        .collect();
    assert_eq!(
        outcomes,
        [
            ("job 'etl-2'".to_owned(), ScopeOutcome::Failed),
            ("job 'etl-3'".to_owned(), ScopeOutcome::Skipped),
        ]
    );

    // Completed work is still flushed.
    assert_eq!(status(&sink, "etl-1", "Succeeded"), Some(1.0));
    assert_eq!(status(&sink, "etl-3", "Succeeded"), None);
}

fn scenario_workflow() -> FakeWorkflow {
    FakeWorkflow::new()
        .environment(
            "prod",
            FakeEnvironment::new()
                .dag(
                    "extract",
                    vec![
                        dag_run("prod", "extract", "r1", at(10, 40), RunStatus::Succeeded),
                        dag_run("prod", "extract", "r2", at(10, 50), RunStatus::Succeeded),
                        dag_run("prod", "extract", "r3", at(10, 0), RunStatus::Failed),
                    ],
                )
                .dag(
                    "load",
                    vec![dag_run("prod", "load", "r4", at(10, 45), RunStatus::Failed)],
                )
                .dag(
                    "idle",
                    vec![dag_run("prod", "idle", "r5", at(9, 0), RunStatus::Failed)],
                ),
        )
        .environment("dev", FakeEnvironment::new())
        .environment("broken", FakeEnvironment::unreachable())
}

const DAG_CONFIG: &str = "
collectors: [dag_status]
workflow:
  environments: [prod, dev, broken]
";

fn dag_values(sink: &CapturingSink) -> Vec<(String, String, f64)> {
    sink.points(WORKFLOW_NAMESPACE)
        .into_iter()
        .map(|point| {
            let dims = point
                .dimensions
                .iter()
                .map(|dim| dim.value.as_str())
                .collect::<Vec<_>>()
                .join("/");
            (point.name, dims, point.value)
        })
        .collect()
}

#[tokio::test]
async fn test_dag_status_cumulative() {
    pipewatch_test::setup();

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(
        config(DAG_CONFIG),
        FakeJobs::new(),
        scenario_workflow(),
        &sink,
    );
    let report = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(
        dag_values(&sink),
        [
            ("DAGRuns.Success".to_owned(), "prod/extract".to_owned(), 2.0),
            ("DAGRuns.Failed".to_owned(), "prod/extract".to_owned(), 0.0),
            ("DAGRuns.Success".to_owned(), "prod/load".to_owned(), 2.0),
            ("DAGRuns.Failed".to_owned(), "prod/load".to_owned(), 1.0),
            ("DAGRuns.EnvironmentSuccess".to_owned(), "prod".to_owned(), 2.0),
            ("DAGRuns.EnvironmentFailed".to_owned(), "prod".to_owned(), 1.0),
        ]
    );

    // prod, dev and three dags of prod succeed, broken fails.
    assert_eq!(report.scopes.succeeded, 5);
    assert_eq!(report.scopes.failed, 1);
    assert_eq!(
        report.issues[0].scope,
        Scope::Environment {
            environment: "broken".to_owned()
        }
    );
}

#[tokio::test]
async fn test_dag_status_per_dag() {
    pipewatch_test::setup();

    let sink = CapturingSink::new();
    let config = config(&format!("{DAG_CONFIG}  count_mode: per_dag\n"));
    let orchestrator = orchestrator(config, FakeJobs::new(), scenario_workflow(), &sink);
    orchestrator.run(invocation()).await.unwrap();

    let load = [("EnvironmentName", "prod"), ("DAG_ID", "load")];
    assert_eq!(sink.value("DAGRuns.Success", &load), Some(0.0));
    assert_eq!(sink.value("DAGRuns.Failed", &load), Some(1.0));
    assert_eq!(
        sink.value("DAGRuns.EnvironmentSuccess", &[("EnvironmentName", "prod")]),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_failed_dag_listing_is_isolated() {
    pipewatch_test::setup();

    let workflow = FakeWorkflow::new().environment(
        "prod",
        FakeEnvironment::new()
            .dag(
                "extract",
                vec![dag_run("prod", "extract", "r1", at(10, 40), RunStatus::Succeeded)],
            )
            .dag_with("load", FakeListing::Fail("503 Service Unavailable".to_owned())),
    );

    let sink = CapturingSink::new();
    let config = config("collectors: [dag_status]\nworkflow:\n  environments: [prod]");
    let orchestrator = orchestrator(config, FakeJobs::new(), workflow, &sink);
    let report = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(report.scopes.failed, 1);
    assert_eq!(
        report.issues[0].scope,
        Scope::Dag {
            environment: "prod".to_owned(),
            dag_id: "load".to_owned(),
        }
    );
    assert_eq!(
        sink.value(
            "DAGRuns.EnvironmentSuccess",
            &[("EnvironmentName", "prod")]
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_selected_collectors_only() {
    pipewatch_test::setup();

    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), scenario_jobs(), FakeWorkflow::new(), &sink);
    let invocation = invocation().with_collectors(vec![CollectorKind::RunSummary]);
    let report = orchestrator.run(invocation).await.unwrap();

    assert_eq!(report.collectors.len(), 1);
    assert_eq!(sink.points(JOB_NAMESPACE).len(), 6);
    assert!(sink.points(JOB_NAMESPACE).iter().all(|p| p.name.starts_with("Glue.")));
}

#[tokio::test]
async fn test_disabled_collector_is_config_error() {
    let sink = CapturingSink::new();
    let orchestrator = orchestrator(config(""), scenario_jobs(), FakeWorkflow::new(), &sink);
    let invocation = invocation().with_collectors(vec![CollectorKind::DagStatus]);

    let error = orchestrator.run(invocation).await.unwrap_err();
    assert!(error.is_config());
    assert_eq!(error.to_string(), "collector 'dag_status' is not enabled");
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_batches_respect_call_limit() {
    pipewatch_test::setup();

    let jobs = ["a", "b", "c", "d"]
        .into_iter()
        .fold(FakeJobs::new(), |jobs, job| jobs.job(job, Vec::new()));

    let sink = CapturingSink::new();
    let config = config("collectors: [job_status]\nsink:\n  max_points_per_call: 5");
    let orchestrator = orchestrator(config, jobs, FakeWorkflow::new(), &sink);
    let report = orchestrator.run(invocation()).await.unwrap();

    let sizes: Vec<_> = sink.calls().iter().map(|call| call.points.len()).collect();
    assert_eq!(sizes, [5, 5, 2]);
    assert_eq!(report.emission.calls, 3);
    assert_eq!(report.emission.sent, 12);
}

#[tokio::test]
async fn test_failed_emission_is_reported() {
    pipewatch_test::setup();

    let sink = CapturingSink::failing();
    let orchestrator = orchestrator(config(""), scenario_jobs(), FakeWorkflow::new(), &sink);
    let report: InvocationReport = orchestrator.run(invocation()).await.unwrap();

    assert_eq!(report.emission.sent, 0);
    assert_eq!(report.emission.failed, 14);
    assert_eq!(sink.calls().len(), 3);
}

#[test]
fn test_scope_failures_are_counted() {
    let captures = pipewatch_statsd::with_capturing_test_client(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let jobs = FakeJobs::new()
                .job_with("etl-1", FakeListing::Fail("connection reset".to_owned()))
                .job("etl-2", Vec::new());

            let sink = CapturingSink::new();
            let orchestrator = orchestrator(config(""), jobs, FakeWorkflow::new(), &sink);
            orchestrator.run(invocation()).await.unwrap();
        });
    });

    let failures: Vec<_> = captures
        .iter()
        .filter(|line| line.starts_with("invocation.scope.failed"))
        .collect();
    assert_eq!(
        failures,
        ["invocation.scope.failed:1|c|#collector:jobs,reason:failed"]
    );
}
