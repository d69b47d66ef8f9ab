use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use pipewatch_common::WindowPolicy;
use pipewatch_jobs::{DagCountMode, RateTable};
use pipewatch_log::{LogConfig, SentryConfig};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use url::Url;

use crate::OverridableConfig;

/// The largest page size accepted by the DAG listing API.
const MAX_DAG_PAGE_SIZE: u32 = 300;

/// The largest number of points the metrics backend accepts per call.
const MAX_POINTS_PER_CALL: usize = 1000;

/// The longest accepted invocation time budget in seconds.
const MAX_INVOCATION_TIMEOUT: u64 = 3600;

/// The longest accepted deadline margin in milliseconds.
const MAX_DEADLINE_MARGIN: u64 = 300_000;

/// The longest accepted timeout of a single HTTP request or connection attempt in seconds.
const MAX_HTTP_TIMEOUT: u64 = 600;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a single field, set in a file or overridden by the environment.
    Field(&'static str),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    pub(crate) fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(Box::new(cause)),
        }
    }

    #[inline]
    pub(crate) fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    pub(crate) fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the name of the offending field, if known.
    pub fn field_name(&self) -> Option<&'static str> {
        match self.source {
            ConfigErrorSource::Field(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|cause| &**cause as _)
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not serialize config")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
    /// No collector is enabled.
    #[error("no collectors configured")]
    NoCollectors,
    /// The workflow collector is enabled without any environment to poll.
    #[error("dag_status is enabled but no workflow environments are configured")]
    MissingEnvironments,
}

/// The collectors that can be enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    /// Resource time and estimated cost per batch job.
    DpuCost,
    /// Run counts by status for every batch job.
    JobStatus,
    /// Fleet-wide run counters and success rate.
    RunSummary,
    /// DAG run outcomes per workflow environment.
    DagStatus,
}

impl CollectorKind {
    /// All collectors in their canonical order.
    pub const ALL: [CollectorKind; 4] = [
        CollectorKind::DpuCost,
        CollectorKind::JobStatus,
        CollectorKind::RunSummary,
        CollectorKind::DagStatus,
    ];

    /// Returns the configuration name of this collector.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DpuCost => "dpu_cost",
            Self::JobStatus => "job_status",
            Self::RunSummary => "run_summary",
            Self::DagStatus => "dag_status",
        }
    }

    /// Returns `true` for collectors that read the batch job API.
    pub fn uses_job_api(&self) -> bool {
        !matches!(self, Self::DagStatus)
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`CollectorKind`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown collector '{0}'")]
pub struct ParseCollectorError(String);

impl FromStr for CollectorKind {
    type Err = ParseCollectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| ParseCollectorError(s.to_owned()))
    }
}

fn default_collectors() -> Vec<CollectorKind> {
    vec![
        CollectorKind::DpuCost,
        CollectorKind::JobStatus,
        CollectorKind::RunSummary,
    ]
}

/// Observation window policy per collector.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Windows {
    /// Window of the cost collector.
    pub dpu_cost: WindowPolicy,
    /// Window of the status count collector.
    pub job_status: WindowPolicy,
    /// Window of the run summary collector.
    pub run_summary: WindowPolicy,
    /// Window of the DAG run collector.
    pub dag_status: WindowPolicy,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            dpu_cost: WindowPolicy::Lookback { minutes: 60 },
            job_status: WindowPolicy::HalfHour { minutes: 60 },
            run_summary: WindowPolicy::Lookback { minutes: 60 },
            dag_status: WindowPolicy::Lookback { minutes: 30 },
        }
    }
}

impl Windows {
    /// Returns the window policy of a collector.
    pub fn get(&self, kind: CollectorKind) -> WindowPolicy {
        match kind {
            CollectorKind::DpuCost => self.dpu_cost,
            CollectorKind::JobStatus => self.job_status,
            CollectorKind::RunSummary => self.run_summary,
            CollectorKind::DagStatus => self.dag_status,
        }
    }

    fn set_all(&mut self, policy: WindowPolicy) {
        self.dpu_cost = policy;
        self.job_status = policy;
        self.run_summary = policy;
        self.dag_status = policy;
    }
}

/// The batch job API.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Glue {
    /// Endpoint of the job API. Defaults to the regional endpoint.
    pub endpoint: Option<String>,
    /// Page size requested for run listings. The API default applies if unset.
    pub max_results: Option<u32>,
}

/// The workflow orchestration service.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Workflow {
    /// Endpoint issuing web login tokens. Defaults to the regional endpoint.
    pub token_endpoint: Option<String>,
    /// Names of the environments to poll.
    pub environments: Vec<String>,
    /// Scheme used to reach the environment web servers.
    pub scheme: String,
    /// Page size of DAG listings.
    pub page_size: u32,
    /// How per-DAG counts are reported.
    pub count_mode: DagCountMode,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            token_endpoint: None,
            environments: Vec::new(),
            scheme: "https".to_owned(),
            page_size: MAX_DAG_PAGE_SIZE,
            count_mode: DagCountMode::default(),
        }
    }
}

/// The metrics ingestion backend.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sink {
    /// Endpoint of the ingestion API. Defaults to the regional endpoint.
    pub endpoint: Option<String>,
    /// Maximum number of points per call.
    pub max_points_per_call: usize,
}

impl Default for Sink {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_points_per_call: MAX_POINTS_PER_CALL,
        }
    }
}

/// Bounds on work done within one invocation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of concurrent upstream tasks.
    pub max_workers: usize,
    /// Maximum number of pages fetched for a single listing.
    pub max_pages: usize,
    /// Time budget of an invocation in seconds, when the trigger does not provide a deadline.
    pub invocation_timeout: u64,
    /// Milliseconds reserved before the trigger deadline for flushing results.
    pub deadline_margin: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_workers: 10,
            max_pages: 100,
            invocation_timeout: 300,
            deadline_margin: 5_000,
        }
    }
}

/// HTTP client settings for all upstream calls.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// Timeout of a single request in seconds.
    pub timeout: u64,
    /// Timeout for establishing a connection in seconds.
    pub connection_timeout: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout: 10,
            connection_timeout: 3,
        }
    }
}

/// Internal StatsD metrics.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Address of the StatsD server. Internal metrics are disabled if unset.
    pub statsd: Option<String>,
    /// Prefix of all metric names.
    pub prefix: String,
    /// Tags added to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Global sample rate between 0.0 and 1.0.
    pub sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "pipewatch".to_owned(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
        }
    }
}

/// All configuration values.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigValues {
    /// Region used to derive default endpoints.
    pub region: String,
    /// Enabled collectors.
    pub collectors: Vec<CollectorKind>,
    /// Observation windows.
    pub windows: Windows,
    /// The batch job API.
    pub glue: Glue,
    /// The workflow service.
    pub workflow: Workflow,
    /// The metrics backend.
    pub sink: Sink,
    /// Work limits.
    pub limits: Limits,
    /// HTTP client settings.
    pub http: Http,
    /// Cost per resource-hour by worker class.
    pub rates: RateTable,
    /// Logging.
    pub logging: LogConfig,
    /// Error reporting.
    pub sentry: SentryConfig,
    /// Internal metrics.
    pub metrics: Metrics,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            region: "ap-southeast-2".to_owned(),
            collectors: default_collectors(),
            windows: Windows::default(),
            glue: Glue::default(),
            workflow: Workflow::default(),
            sink: Sink::default(),
            limits: Limits::default(),
            http: Http::default(),
            rates: RateTable::default(),
            logging: LogConfig::default(),
            sentry: SentryConfig::default(),
            metrics: Metrics::default(),
        }
    }
}

/// Endpoints resolved from configuration and region.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Endpoints {
    glue: Url,
    workflow: Url,
    sink: Url,
}

fn resolve_endpoint(
    configured: Option<&str>,
    default: String,
    field: &'static str,
) -> Result<Url, ConfigError> {
    let raw = configured.map(str::to_owned).unwrap_or(default);
    Url::parse(&raw).map_err(|err| ConfigError::for_field(err, field))
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    endpoints: Endpoints,
    path: Option<PathBuf>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// Reads the YAML file named by `PIPEWATCH_CONFIG` if set, then applies environment
    /// overrides and validates the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let overrides = OverridableConfig::from_env();
        let path = std::env::var_os("PIPEWATCH_CONFIG").map(PathBuf::from);

        let mapping = match &path {
            Some(path) => load_mapping(path)?,
            None => Mapping::new(),
        };

        Self::from_mapping(mapping, overrides, path)
    }

    /// Loads a config file and applies the given overrides.
    pub fn from_path(
        path: impl AsRef<Path>,
        overrides: OverridableConfig,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        Self::from_mapping(load_mapping(path)?, overrides, Some(path.to_owned()))
            .map_err(|err| match err.source {
                ConfigErrorSource::None => err.file(path),
                _ => err,
            })
    }

    /// Creates a config from a YAML string and the given overrides.
    pub fn from_yaml_str(yaml: &str, overrides: OverridableConfig) -> Result<Self, ConfigError> {
        let mapping = parse_mapping(yaml)?;
        Self::from_mapping(mapping, overrides, None)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let values = serde_json::from_value(value)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?;
        Self::from_values(values, None)
    }

    fn from_mapping(
        mut mapping: Mapping,
        overrides: OverridableConfig,
        path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        overrides.apply(&mut mapping)?;

        let values = serde_yaml::from_value(Value::Mapping(mapping))
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadYaml))?;

        Self::from_values(values, path)
    }

    fn from_values(values: ConfigValues, path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let endpoints = Endpoints {
            glue: resolve_endpoint(
                values.glue.endpoint.as_deref(),
                format!("https://glue.{}.amazonaws.com/", values.region),
                "glue.endpoint",
            )?,
            workflow: resolve_endpoint(
                values.workflow.token_endpoint.as_deref(),
                format!("https://airflow.{}.amazonaws.com/", values.region),
                "workflow.token_endpoint",
            )?,
            sink: resolve_endpoint(
                values.sink.endpoint.as_deref(),
                format!("https://monitoring.{}.amazonaws.com/", values.region),
                "sink.endpoint",
            )?,
        };

        let config = Self {
            values,
            endpoints,
            path,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let values = &self.values;

        if values.collectors.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::NoCollectors).field("collectors"));
        }

        if self.collector_enabled(CollectorKind::DagStatus) && values.workflow.environments.is_empty()
        {
            return Err(ConfigError::new(ConfigErrorKind::MissingEnvironments)
                .field("workflow.environments"));
        }

        for kind in &values.collectors {
            values
                .windows
                .get(*kind)
                .validate()
                .map_err(|err| ConfigError::for_field(err, "windows"))?;
        }

        if values.limits.max_workers == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("limits.max_workers"));
        }

        if values.limits.max_pages == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("limits.max_pages"));
        }

        if !(1..=MAX_INVOCATION_TIMEOUT).contains(&values.limits.invocation_timeout) {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("limits.invocation_timeout")
            );
        }

        if values.limits.deadline_margin > MAX_DEADLINE_MARGIN {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("limits.deadline_margin")
            );
        }

        if !(1..=MAX_HTTP_TIMEOUT).contains(&values.http.timeout) {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("http.timeout"));
        }

        if !(1..=MAX_HTTP_TIMEOUT).contains(&values.http.connection_timeout) {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("http.connection_timeout")
            );
        }

        if !(1..=MAX_POINTS_PER_CALL).contains(&values.sink.max_points_per_call) {
            return Err(
                ConfigError::new(ConfigErrorKind::InvalidValue).field("sink.max_points_per_call")
            );
        }

        if values.workflow.page_size == 0 || values.workflow.page_size > MAX_DAG_PAGE_SIZE {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("workflow.page_size"));
        }

        if !(0.0..=1.0).contains(&values.metrics.sample_rate) {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("metrics.sample_rate"));
        }

        values
            .rates
            .validate()
            .map_err(|err| ConfigError::for_field(err, "rates"))?;

        Ok(())
    }

    /// Returns the path of the config file, if one was loaded.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns all configuration values.
    pub fn values(&self) -> &ConfigValues {
        &self.values
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the enabled collectors without duplicates, in configuration order.
    pub fn collectors(&self) -> Vec<CollectorKind> {
        let mut collectors = Vec::with_capacity(self.values.collectors.len());
        for kind in &self.values.collectors {
            if !collectors.contains(kind) {
                collectors.push(*kind);
            }
        }
        collectors
    }

    /// Returns `true` if a collector is enabled.
    pub fn collector_enabled(&self, kind: CollectorKind) -> bool {
        self.values.collectors.contains(&kind)
    }

    /// Returns the window policy of a collector.
    pub fn window(&self, kind: CollectorKind) -> WindowPolicy {
        self.values.windows.get(kind)
    }

    /// Returns the endpoint of the batch job API.
    pub fn glue_endpoint(&self) -> &Url {
        &self.endpoints.glue
    }

    /// Returns the page size for job run listings.
    pub fn glue_max_results(&self) -> Option<u32> {
        self.values.glue.max_results
    }

    /// Returns the endpoint issuing workflow web login tokens.
    pub fn workflow_endpoint(&self) -> &Url {
        &self.endpoints.workflow
    }

    /// Returns the workflow environments to poll.
    pub fn environments(&self) -> &[String] {
        &self.values.workflow.environments
    }

    /// Returns the scheme for workflow web servers.
    pub fn workflow_scheme(&self) -> &str {
        &self.values.workflow.scheme
    }

    /// Returns the page size of DAG listings.
    pub fn dag_page_size(&self) -> u32 {
        self.values.workflow.page_size
    }

    /// Returns how per-DAG counts are reported.
    pub fn dag_count_mode(&self) -> DagCountMode {
        self.values.workflow.count_mode
    }

    /// Returns the endpoint of the metrics backend.
    pub fn sink_endpoint(&self) -> &Url {
        &self.endpoints.sink
    }

    /// Returns the maximum number of points per emission call.
    pub fn max_points_per_call(&self) -> usize {
        self.values.sink.max_points_per_call
    }

    /// Returns the maximum number of concurrent upstream tasks.
    pub fn max_workers(&self) -> usize {
        self.values.limits.max_workers
    }

    /// Returns the page cap of a single listing.
    pub fn max_pages(&self) -> usize {
        self.values.limits.max_pages
    }

    /// Returns the invocation time budget used when the trigger has no deadline.
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.invocation_timeout)
    }

    /// Returns the time reserved before a trigger deadline.
    pub fn deadline_margin(&self) -> Duration {
        Duration::from_millis(self.values.limits.deadline_margin)
    }

    /// Returns the timeout of a single upstream request.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.timeout)
    }

    /// Returns the connection timeout of upstream requests.
    pub fn http_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.connection_timeout)
    }

    /// Returns the cost rate table.
    pub fn rates(&self) -> &RateTable {
        &self.values.rates
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the error reporting configuration.
    pub fn sentry(&self) -> &SentryConfig {
        &self.values.sentry
    }

    /// Returns the StatsD address, if internal metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of internal metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags of internal metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the sample rate of internal metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }
}

fn parse_mapping(yaml: &str) -> Result<Mapping, ConfigError> {
    let value: Value =
        serde_yaml::from_str(yaml).map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadYaml))?;

    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ConfigError::new(ConfigErrorKind::BadYaml)),
    }
}

fn load_mapping(path: &Path) -> Result<Mapping, ConfigError> {
    let yaml = fs::read_to_string(path)
        .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::CouldNotOpenFile).file(path))?;

    parse_mapping(&yaml).map_err(|err| err.file(path))
}
