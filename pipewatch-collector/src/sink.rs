use async_trait::async_trait;
use pipewatch_config::Config;
use pipewatch_metrics::{MAX_POINTS_PER_CALL, MetricPoint, MetricSink, SinkError};
use pipewatch_statsd::metric;
use reqwest::header;
use serde::Serialize;
use url::Url;

use crate::statsd::CollectorCounters;
use crate::{HttpClient, HttpError};

const TARGET: &str = "GraniteServiceVersion20100801.PutMetricData";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutMetricData<'a> {
    namespace: &'a str,
    metric_data: &'a [&'a MetricPoint],
}

/// Publishes metric points to the monitoring backend over HTTP.
#[derive(Clone, Debug)]
pub struct HttpMetricSink {
    http: HttpClient,
    endpoint: Url,
}

impl HttpMetricSink {
    /// Creates a sink for an endpoint.
    pub fn new(http: HttpClient, endpoint: Url) -> Self {
        Self { http, endpoint }
    }

    /// Creates a sink from the configuration.
    pub fn from_config(http: HttpClient, config: &Config) -> Self {
        Self::new(http, config.sink_endpoint().clone())
    }
}

#[async_trait]
impl MetricSink for HttpMetricSink {
    async fn put_metrics(&self, namespace: &str, points: &[&MetricPoint]) -> Result<(), SinkError> {
        if points.len() > MAX_POINTS_PER_CALL {
            return Err(SinkError::TooManyPoints(points.len()));
        }

        let body = serde_json::to_vec(&PutMetricData {
            namespace,
            metric_data: points,
        })
        .map_err(|error| SinkError::Transport(Box::new(error)))?;

        let request = self
            .http
            .post(self.endpoint.clone())
            .header("X-Amz-Target", TARGET)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body);

        let result = match self.http.send("PutMetricData", request).await {
            Ok(_) => Ok(()),
            Err(HttpError::Status { status, body }) => Err(SinkError::Rejected {
                status: status.as_u16(),
                message: body,
            }),
            Err(error) => Err(SinkError::Transport(Box::new(error))),
        };

        let outcome = match &result {
            Ok(()) => CollectorCounters::PointsEmitted,
            Err(_) => CollectorCounters::PointsFailed,
        };
        metric!(
            counter(outcome) += points.len() as i64,
            namespace = namespace,
        );

        result
    }
}
