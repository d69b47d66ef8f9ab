use pipewatch_statsd::{CounterMetric, TimerMetric};

/// Counter metrics used by the collector.
pub enum CollectorCounters {
    /// Number of requests sent to an upstream service.
    ///
    /// This metric is tagged with:
    /// - `operation`: the upstream operation, such as `GetJobRuns` or `dag_runs`.
    /// - `outcome`: `success`, `status`, `timeout` or `error`.
    UpstreamRequest,
    /// Number of pages fetched by listing operations.
    ///
    /// This metric is tagged with:
    /// - `listing`: the name of the listing.
    PagesFetched,
    /// Listings that returned partial results.
    ///
    /// This metric is tagged with:
    /// - `listing`: the name of the listing.
    /// - `reason`: `page_limit`, `token_loop`, `malformed_link` or `request_failed`.
    IncompleteListing,
    /// Upstream records dropped at the ingestion boundary, because they are malformed or have no
    /// start time.
    RecordsDropped,
    /// Scopes that contributed nothing to an invocation.
    ///
    /// This metric is tagged with:
    /// - `collector`: `jobs` or `dags`.
    /// - `reason`: `failed`, `timeout` or `skipped`.
    ScopeFailed,
    /// Points accepted by the metrics backend.
    ///
    /// This metric is tagged with:
    /// - `namespace`: the metric namespace.
    PointsEmitted,
    /// Points in emission calls that failed.
    ///
    /// This metric is tagged with:
    /// - `namespace`: the metric namespace.
    PointsFailed,
}

impl CounterMetric for CollectorCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::UpstreamRequest => "upstream.requests",
            Self::PagesFetched => "upstream.pages",
            Self::IncompleteListing => "upstream.listing.incomplete",
            Self::RecordsDropped => "upstream.records.dropped",
            Self::ScopeFailed => "invocation.scope.failed",
            Self::PointsEmitted => "sink.points.emitted",
            Self::PointsFailed => "sink.points.failed",
        }
    }
}

/// Timer metrics used by the collector.
pub enum CollectorTimers {
    /// Duration of a single upstream request.
    ///
    /// This metric is tagged with:
    /// - `operation`: the upstream operation.
    UpstreamRequestDuration,
    /// Total duration of an invocation, including emission.
    InvocationDuration,
}

impl TimerMetric for CollectorTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::UpstreamRequestDuration => "upstream.requests.duration",
            Self::InvocationDuration => "invocation.duration",
        }
    }
}
