use std::time::{Duration, Instant};

use pipewatch_config::Config;
use pipewatch_statsd::metric;
#[doc(inline)]
pub use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::statsd::{CollectorCounters, CollectorTimers};

/// Upper bound for the size of a response body.
const MAX_RESPONSE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum length of an error body kept for logging.
const MAX_ERROR_BODY: usize = 512;

/// An error of a single upstream request.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The response body exceeded the size limit.
    #[error("response payload too large")]
    Overflow,
    /// The request could not be sent or timed out.
    #[error("could not send request")]
    Reqwest(#[from] reqwest::Error),
    /// The upstream responded with a non-success status.
    #[error("upstream responded with status {status}: {body}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The beginning of the response body.
        body: String,
    },
    /// The response body could not be parsed.
    #[error("failed to parse JSON response")]
    Json(#[from] serde_json::Error),
}

impl HttpError {
    /// Returns `true` if the request timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Reqwest(error) if error.is_timeout())
    }

    /// Returns the status code of a rejected request.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Reqwest(error) => error.status(),
            _ => None,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            _ if self.is_timeout() => "timeout",
            _ => "error",
        }
    }
}

/// A shared HTTP client for all upstream services.
///
/// Every request carries the configured timeout, so no upstream call can block an invocation
/// indefinitely.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Creates a client with a total request timeout and a connect timeout.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("pipewatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Creates a client with the timeouts from the configuration.
    pub fn from_config(config: &Config) -> Result<Self, HttpError> {
        Self::new(config.http_timeout(), config.http_connection_timeout())
    }

    /// Starts a `GET` request.
    pub fn get(&self, url: url::Url) -> reqwest::RequestBuilder {
        self.client.get(url)
    }

    /// Starts a `POST` request.
    pub fn post(&self, url: url::Url) -> reqwest::RequestBuilder {
        self.client.post(url)
    }

    /// Sends a request and checks the response status.
    ///
    /// Responses outside the `2xx` range are turned into [`HttpError::Status`].
    pub async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Response, HttpError> {
        let start = Instant::now();
        let result = Self::send_checked(request).await;

        metric!(
            timer(CollectorTimers::UpstreamRequestDuration) = start.elapsed(),
            operation = operation,
        );
        metric!(
            counter(CollectorCounters::UpstreamRequest) += 1,
            operation = operation,
            outcome = match &result {
                Ok(_) => "success",
                Err(error) => error.outcome(),
            },
        );

        result
    }

    async fn send_checked(request: reqwest::RequestBuilder) -> Result<Response, HttpError> {
        let response = Response(request.send().await?);

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status,
                body: response.text_prefix(MAX_ERROR_BODY).await,
            });
        }

        Ok(response)
    }
}

/// A successful upstream response.
#[derive(Debug)]
pub struct Response(reqwest::Response);

impl Response {
    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.0.status()
    }

    /// Returns the value of a cookie set by this response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.0
            .cookies()
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_owned())
    }

    /// Reads the body up to `limit` bytes.
    ///
    /// Larger bodies fail with [`HttpError::Overflow`].
    pub async fn bytes(self, limit: usize) -> Result<Vec<u8>, HttpError> {
        let Self(mut response) = self;

        let mut body = Vec::with_capacity(limit.min(8192));
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) > limit {
                return Err(HttpError::Overflow);
            }

            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    /// Reads at most `limit` bytes of the body as text, ignoring read errors.
    async fn text_prefix(self, limit: usize) -> String {
        let Self(mut response) = self;

        let mut body = Vec::new();
        while let Ok(Some(chunk)) = response.chunk().await {
            body.extend_from_slice(&chunk);
            if body.len() >= limit {
                body.truncate(limit);
                break;
            }
        }

        String::from_utf8_lossy(&body).into_owned()
    }

    /// Reads and parses a JSON body.
    pub async fn json<T>(self) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let bytes = self.bytes(MAX_RESPONSE_SIZE).await?;
        serde_json::from_slice(&bytes).map_err(HttpError::Json)
    }
}
