use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Serialize;
use url::Url;

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
const FUNCTION_ARN_HEADER: &str = "Lambda-Runtime-Invoked-Function-Arn";
const TRACE_ID_HEADER: &str = "Lambda-Runtime-Trace-Id";
const ERROR_TYPE_HEADER: &str = "Lambda-Runtime-Function-Error-Type";

/// An error talking to the runtime API.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeApiError {
    /// The runtime API address does not form a valid URL.
    #[error("invalid runtime API address '{0}'")]
    InvalidAddress(String),
    /// Building the client failed or the request could not be sent.
    #[error("runtime API request failed")]
    Request(#[from] reqwest::Error),
    /// The runtime API responded with an unexpected status.
    #[error("runtime API responded with status {0}")]
    Status(StatusCode),
    /// A required header is missing or not valid.
    #[error("missing or invalid header {0}")]
    Header(&'static str),
    /// The invocation payload is not valid JSON.
    #[error("invalid invocation payload")]
    Payload(#[from] serde_json::Error),
}

/// A trigger handed out by the runtime.
#[derive(Clone, Debug, PartialEq)]
pub struct LambdaInvocation {
    /// Identifier used to report the result of this invocation.
    pub request_id: String,
    /// Instant after which the runtime stops the function.
    pub deadline: DateTime<Utc>,
    /// The function that was invoked.
    pub function_arn: Option<String>,
    /// Tracing header of the trigger.
    pub trace_id: Option<String>,
    /// The trigger event.
    pub payload: serde_json::Value,
}

impl LambdaInvocation {
    /// Returns the time left until the deadline, or zero if it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).to_std().unwrap_or_default()
    }
}

/// Error reported for a failed invocation or a failed bootstrap.
///
/// # Example
///
/// ```json
/// {
///   "errorMessage": "no upstream scope could be collected",
///   "errorType": "Unavailable"
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Human readable message.
    pub error_message: String,
    /// Short classification of the error.
    pub error_type: String,
}

impl ErrorReport {
    /// Creates a report from a type and a message.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            error_type: error_type.into(),
        }
    }
}

/// Client of the function runtime API.
///
/// Requests are sent without timeout. Between triggers the runtime may freeze the process for an
/// arbitrary time while the next invocation request is pending.
#[derive(Clone, Debug)]
pub struct RuntimeApi {
    base_url: Url,
    client: Client,
}

impl RuntimeApi {
    /// Creates a client for the runtime API at `host:port`.
    pub fn new(runtime_api: &str) -> Result<Self, RuntimeApiError> {
        let base_url = Url::parse(&format!("http://{runtime_api}/{API_VERSION}/runtime/"))
            .ok()
            .filter(|url| url.host().is_some())
            .ok_or_else(|| RuntimeApiError::InvalidAddress(runtime_api.to_owned()))?;

        let client = ClientBuilder::new().pool_idle_timeout(None).build()?;

        Ok(Self { base_url, client })
    }

    /// Creates a client from `AWS_LAMBDA_RUNTIME_API`, if set.
    pub fn from_env() -> Option<Result<Self, RuntimeApiError>> {
        let runtime_api = std::env::var("AWS_LAMBDA_RUNTIME_API").ok()?;
        Some(Self::new(&runtime_api))
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Waits for the next trigger.
    pub async fn next_invocation(&self) -> Result<LambdaInvocation, RuntimeApiError> {
        let response = self
            .client
            .get(self.url(&["invocation", "next"]))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(RuntimeApiError::Status(response.status()));
        }

        let headers = response.headers();
        let header = |name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        let request_id = header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .ok_or(RuntimeApiError::Header(REQUEST_ID_HEADER))?;
        let deadline = header(DEADLINE_HEADER)
            .and_then(|ms| ms.parse().ok())
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(RuntimeApiError::Header(DEADLINE_HEADER))?;
        let function_arn = header(FUNCTION_ARN_HEADER);
        let trace_id = header(TRACE_ID_HEADER);

        let body = response.bytes().await?;
        let payload = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body)?
        };

        pipewatch_log::debug!(request_id = %request_id, "received invocation");

        Ok(LambdaInvocation {
            request_id,
            deadline,
            function_arn,
            trace_id,
            payload,
        })
    }

    /// Reports the result of an invocation.
    pub async fn respond<T>(&self, request_id: &str, response: &T) -> Result<(), RuntimeApiError>
    where
        T: Serialize + ?Sized,
    {
        let request = self
            .client
            .post(self.url(&["invocation", request_id, "response"]))
            .json(response);

        Self::check(request).await
    }

    /// Reports that an invocation failed.
    pub async fn report_error(
        &self,
        request_id: &str,
        error: &ErrorReport,
    ) -> Result<(), RuntimeApiError> {
        let request = self
            .client
            .post(self.url(&["invocation", request_id, "error"]))
            .header(ERROR_TYPE_HEADER, &error.error_type)
            .json(error);

        Self::check(request).await
    }

    /// Reports that the function could not start.
    ///
    /// The runtime stops the process after this call.
    pub async fn report_init_error(&self, error: &ErrorReport) -> Result<(), RuntimeApiError> {
        let request = self
            .client
            .post(self.url(&["init", "error"]))
            .header(ERROR_TYPE_HEADER, &error.error_type)
            .json(error);

        Self::check(request).await
    }

    async fn check(request: reqwest::RequestBuilder) -> Result<(), RuntimeApiError> {
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(()),
            status => Err(RuntimeApiError::Status(status)),
        }
    }
}
