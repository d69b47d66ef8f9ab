//! Mock HTTP servers of the upstream services, listening on an ephemeral local port.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

/// A running mock server, shut down on drop.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Binds an ephemeral port and serves the router built for that address.
    pub async fn start(router: impl FnOnce(SocketAddr) -> Router) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let router = router(addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .expect("serve mock server");
        });

        Self { addr, handle }
    }

    /// Returns the address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the root URL of the server.
    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("valid mock url")
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Returns the page of `items` starting at `offset` and the offset of the next page.
fn paginate<T: Clone>(items: &[T], offset: usize, size: usize) -> (Vec<T>, Option<usize>) {
    let size = size.max(1);
    let end = items.len().min(offset.saturating_add(size));
    let page = items.get(offset..end).unwrap_or_default().to_vec();
    let next = (end < items.len()).then_some(end);
    (page, next)
}

/// Pagination behavior of the mock job API.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenMode {
    /// Tokens advance through the data and end on the last page.
    #[default]
    Regular,
    /// Every job listing page returns the same token.
    Repeat,
    /// Every job listing page returns a new token, the listing never ends.
    Endless,
}

/// Data served by [`MockGlue`].
#[derive(Clone, Debug, Default)]
pub struct GlueData {
    /// Job names.
    pub jobs: Vec<String>,
    /// Raw job runs per job name, in the wire format of the job API.
    pub runs: BTreeMap<String, Vec<Value>>,
    /// Items per page.
    pub page_size: usize,
    /// Pagination behavior of the job listing.
    pub tokens: TokenMode,
    /// Jobs whose run listing fails with a server error.
    pub failing: BTreeSet<String>,
}

/// A mock of the batch job API.
#[derive(Debug)]
pub struct MockGlue {
    server: MockServer,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockGlue {
    /// Starts the mock with the given data.
    pub async fn start(data: GlueData) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = (Arc::new(data), Arc::clone(&requests));

        let server = MockServer::start(move |_| {
            Router::new()
                .route("/", post(glue_handler))
                .with_state(state)
        })
        .await;

        Self { server, requests }
    }

    /// Returns the endpoint to configure.
    pub fn url(&self) -> Url {
        self.server.url()
    }

    /// Returns all requests as pairs of target and body.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().clone()
    }
}

type GlueState = (Arc<GlueData>, Arc<Mutex<Vec<(String, Value)>>>);

async fn glue_handler(
    State((data, requests)): State<GlueState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    let request: Value = serde_json::from_slice(&body).unwrap_or_default();
    requests.lock().push((target.clone(), request.clone()));

    let offset = request["NextToken"]
        .as_str()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0);

    match target.as_str() {
        "AWSGlue.GetJobs" => {
            let (page, next) = paginate(&data.jobs, offset, data.page_size);
            let next = match data.tokens {
                TokenMode::Regular => next.map(|offset| offset.to_string()),
                TokenMode::Repeat => Some("again".to_owned()),
                TokenMode::Endless => Some((offset + data.page_size.max(1)).to_string()),
            };

            let jobs: Vec<_> = page.iter().map(|name| json!({ "Name": name })).collect();
            Json(json!({ "Jobs": jobs, "NextToken": next })).into_response()
        }
        "AWSGlue.GetJobRuns" => {
            let job = request["JobName"].as_str().unwrap_or_default();
            if data.failing.contains(job) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "InternalServiceException")
                    .into_response();
            }

            let runs = data.runs.get(job).map(Vec::as_slice).unwrap_or_default();
            let (page, next) = paginate(runs, offset, data.page_size);
            let next = next.map(|offset| offset.to_string());
            Json(json!({ "JobRuns": page, "NextToken": next })).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, "UnknownOperationException").into_response(),
    }
}

/// Data served by [`MockConsole`].
#[derive(Clone, Debug, Default)]
pub struct ConsoleData {
    /// Raw DAG runs per environment and DAG id, in the wire format of the console API.
    pub environments: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    /// Items per page.
    pub page_size: usize,
}

/// A mock of the workflow service and its web consoles.
///
/// The same server issues login tokens and serves the console API of every environment. The
/// session cookie tells the environments apart.
#[derive(Debug)]
pub struct MockConsole {
    server: MockServer,
    requests: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
struct ConsoleState {
    data: Arc<ConsoleData>,
    host: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ConsoleState {
    fn environment(&self, headers: &HeaderMap) -> Option<&BTreeMap<String, Vec<Value>>> {
        let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
        let environment = cookie.strip_prefix("session=session-")?;
        self.data.environments.get(environment)
    }
}

impl MockConsole {
    /// Starts the mock with the given data.
    pub async fn start(data: ConsoleData) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let data = Arc::new(data);
        let log = Arc::clone(&requests);

        let server = MockServer::start(move |addr| {
            let state = ConsoleState {
                data,
                host: addr.to_string(),
                requests: log,
            };

            Router::new()
                .route("/webtoken/{environment}", post(webtoken_handler))
                .route("/aws_mwaa/login", post(login_handler))
                .route("/api/v1/dags", get(dags_handler))
                .route("/api/v1/dags/{dag_id}/dagRuns", get(dag_runs_handler))
                .with_state(state)
        })
        .await;

        Self { server, requests }
    }

    /// Returns the token endpoint to configure.
    pub fn url(&self) -> Url {
        self.server.url()
    }

    /// Returns the paths and queries of all requests.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

async fn webtoken_handler(
    State(state): State<ConsoleState>,
    Path(environment): Path<String>,
) -> Response {
    state.requests.lock().push(format!("/webtoken/{environment}"));

    if !state.data.environments.contains_key(&environment) {
        return (StatusCode::NOT_FOUND, "ResourceNotFoundException").into_response();
    }

    Json(json!({
        "WebServerHostname": state.host,
        "WebToken": format!("token-{environment}"),
    }))
    .into_response()
}

async fn login_handler(
    State(state): State<ConsoleState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.requests.lock().push("/aws_mwaa/login".to_owned());

    let Some(environment) = form
        .get("token")
        .and_then(|token| token.strip_prefix("token-"))
    else {
        return StatusCode::FORBIDDEN.into_response();
    };

    let cookie = format!("session=session-{environment}; Path=/; HttpOnly");
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], "").into_response()
}

fn page_params(query: &HashMap<String, String>) -> (usize, usize) {
    let offset = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
    (offset, limit)
}

fn links(path: &str, limit: usize, next: Option<usize>) -> Value {
    match next {
        Some(offset) => json!({ "next": { "href": format!("{path}?limit={limit}&offset={offset}") } }),
        None => json!({}),
    }
}

async fn dags_handler(
    State(state): State<ConsoleState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.requests.lock().push("/api/v1/dags".to_owned());

    let Some(dags) = state.environment(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let (offset, limit) = page_params(&query);
    let limit = limit.min(state.data.page_size.max(1));
    let ids: Vec<_> = dags.keys().cloned().collect();
    let (page, next) = paginate(&ids, offset, limit);

    let dags: Vec<_> = page.iter().map(|id| json!({ "dag_id": id })).collect();
    Json(json!({
        "dags": dags,
        "total_entries": ids.len(),
        "_links": links("/api/v1/dags", limit, next),
    }))
    .into_response()
}

async fn dag_runs_handler(
    State(state): State<ConsoleState>,
    Path(dag_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state
        .requests
        .lock()
        .push(format!("/api/v1/dags/{dag_id}/dagRuns"));

    let Some(dags) = state.environment(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(runs) = dags.get(&dag_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (offset, limit) = page_params(&query);
    let limit = limit.min(state.data.page_size.max(1));
    let (page, next) = paginate(runs, offset, limit);

    let path = format!("/api/v1/dags/{dag_id}/dagRuns");
    Json(json!({
        "dag_runs": page,
        "total_entries": runs.len(),
        "_links": links(&path, limit, next),
    }))
    .into_response()
}

/// A mock of the metric ingestion API.
#[derive(Debug)]
pub struct MockMetrics {
    server: MockServer,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockMetrics {
    /// Starts a mock that accepts all calls.
    pub async fn start() -> Self {
        Self::start_with_status(StatusCode::OK).await
    }

    /// Starts a mock that records all calls and responds with `status`.
    pub async fn start_with_status(status: StatusCode) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let state = (Arc::clone(&calls), status);

        let server = MockServer::start(move |_| {
            Router::new()
                .route("/", post(metrics_handler))
                .with_state(state)
        })
        .await;

        Self { server, calls }
    }

    /// Returns the endpoint to configure.
    pub fn url(&self) -> Url {
        self.server.url()
    }

    /// Returns the bodies of all calls.
    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }
}

async fn metrics_handler(
    State((calls, status)): State<(Arc<Mutex<Vec<Value>>>, StatusCode)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|value| value.to_str().ok());
    if target != Some("GraniteServiceVersion20100801.PutMetricData") {
        return (StatusCode::BAD_REQUEST, "UnknownOperationException").into_response();
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or_default();
    calls.lock().push(body);

    if status.is_success() {
        return Json(json!({})).into_response();
    }

    (status, "Throttling").into_response()
}
