//! Overrides of the configuration file by environment variables.

use std::collections::BTreeMap;
use std::env;

use pipewatch_common::WindowPolicy;
use pipewatch_jobs::RateTable;
use pipewatch_log::{Level, LogFormat};
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::{CollectorKind, ConfigError, ConfigErrorKind};

/// Raw configuration values taken from the environment.
///
/// Values are kept as strings until [`apply`](Self::apply) parses them, so that a malformed
/// variable surfaces as a [`ConfigError`] naming the offending field.
#[derive(Clone, Debug, Default)]
pub struct OverridableConfig {
    /// JSON list of workflow environments to poll.
    pub environments: Option<String>,
    /// Comma-separated list of collectors.
    pub collectors: Option<String>,
    /// Size of the worker pool.
    pub max_workers: Option<String>,
    /// Window policy applied to every collector, such as `lookback:60`.
    pub window: Option<String>,
    /// JSON object of worker class to rate.
    pub rates: Option<String>,
    /// Endpoint of the batch job API.
    pub glue_endpoint: Option<String>,
    /// Endpoint issuing workflow web login tokens.
    pub workflow_endpoint: Option<String>,
    /// Endpoint of the metrics backend.
    pub metrics_endpoint: Option<String>,
    /// Address of the StatsD server.
    pub statsd: Option<String>,
    /// Log level.
    pub log_level: Option<String>,
    /// Log format.
    pub log_format: Option<String>,
}

impl OverridableConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads overrides through a lookup function.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            environments: get("ENV_NAMES"),
            collectors: get("PIPEWATCH_COLLECTORS"),
            max_workers: get("PIPEWATCH_MAX_WORKERS"),
            window: get("PIPEWATCH_WINDOW"),
            rates: get("PIPEWATCH_RATES"),
            glue_endpoint: get("PIPEWATCH_GLUE_ENDPOINT"),
            workflow_endpoint: get("PIPEWATCH_MWAA_ENDPOINT"),
            metrics_endpoint: get("PIPEWATCH_METRICS_ENDPOINT"),
            statsd: get("PIPEWATCH_STATSD"),
            log_level: get("PIPEWATCH_LOG_LEVEL"),
            log_format: get("PIPEWATCH_LOG_FORMAT"),
        }
    }

    /// Writes all set overrides into the raw configuration tree.
    pub(crate) fn apply(self, config: &mut Mapping) -> Result<(), ConfigError> {
        if let Some(environments) = self.environments {
            let environments: Vec<String> = serde_json::from_str(&environments)
                .map_err(|err| ConfigError::for_field(err, "workflow.environments"))?;
            let workflow = get_or_create_sub_obj(config, "workflow")?;
            set_value(workflow, "environments", &environments, "workflow.environments")?;
        }

        if let Some(collectors) = self.collectors {
            let collectors = collectors
                .split(',')
                .map(str::parse)
                .collect::<Result<Vec<CollectorKind>, _>>()
                .map_err(|err| ConfigError::for_field(err, "collectors"))?;
            set_value(config, "collectors", &collectors, "collectors")?;
        }

        if let Some(max_workers) = self.max_workers {
            let max_workers: usize = max_workers
                .trim()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "limits.max_workers"))?;
            let limits = get_or_create_sub_obj(config, "limits")?;
            set_value(limits, "max_workers", &max_workers, "limits.max_workers")?;
        }

        if let Some(window) = self.window {
            let policy: WindowPolicy = window
                .parse()
                .map_err(|err| ConfigError::for_field(err, "windows"))?;
            let windows = get_or_create_sub_obj(config, "windows")?;
            for kind in CollectorKind::ALL {
                set_value(windows, kind.as_str(), &policy, "windows")?;
            }
        }

        if let Some(rates) = self.rates {
            let rates: BTreeMap<String, f64> = serde_json::from_str(&rates)
                .map_err(|err| ConfigError::for_field(err, "rates"))?;
            if !config.contains_key("rates") {
                set_value(config, "rates", &RateTable::default(), "rates")?;
            }
            let table = get_or_create_sub_obj(config, "rates")?;
            for (class, rate) in &rates {
                set_value(table, class, rate, "rates")?;
            }
        }

        if let Some(endpoint) = self.glue_endpoint {
            let glue = get_or_create_sub_obj(config, "glue")?;
            set_string(glue, "endpoint", endpoint);
        }

        if let Some(endpoint) = self.workflow_endpoint {
            let workflow = get_or_create_sub_obj(config, "workflow")?;
            set_string(workflow, "token_endpoint", endpoint);
        }

        if let Some(endpoint) = self.metrics_endpoint {
            let sink = get_or_create_sub_obj(config, "sink")?;
            set_string(sink, "endpoint", endpoint);
        }

        if let Some(statsd) = self.statsd {
            let metrics = get_or_create_sub_obj(config, "metrics")?;
            set_string(metrics, "statsd", statsd);
        }

        if let Some(level) = self.log_level {
            let level: Level = level
                .parse()
                .map_err(|err| ConfigError::for_field(err, "logging.level"))?;
            let logging = get_or_create_sub_obj(config, "logging")?;
            set_value(logging, "level", &level, "logging.level")?;
        }

        if let Some(format) = self.log_format {
            let format: LogFormat = format
                .parse()
                .map_err(|err| ConfigError::for_field(err, "logging.format"))?;
            let logging = get_or_create_sub_obj(config, "logging")?;
            set_value(logging, "format", &format, "logging.format")?;
        }

        Ok(())
    }
}

fn get_or_create_sub_obj<'a>(
    mapping: &'a mut Mapping,
    key: &'static str,
) -> Result<&'a mut Mapping, ConfigError> {
    let val_key = Value::String(key.to_owned());

    if mapping.get(&val_key).is_none_or(Value::is_null) {
        mapping.insert(val_key.clone(), Value::Mapping(Mapping::new()));
    }

    match mapping.get_mut(&val_key) {
        Some(Value::Mapping(child)) => Ok(child),
        _ => Err(ConfigError::new(ConfigErrorKind::InvalidValue).field(key)),
    }
}

fn set_string(mapping: &mut Mapping, key: &str, value: String) {
    mapping.insert(Value::String(key.to_owned()), Value::String(value));
}

fn set_value<T>(
    mapping: &mut Mapping,
    key: &str,
    value: &T,
    field: &'static str,
) -> Result<(), ConfigError>
where
    T: Serialize + ?Sized,
{
    let value = serde_yaml::to_value(value).map_err(|err| ConfigError::for_field(err, field))?;
    mapping.insert(Value::String(key.to_owned()), value);
    Ok(())
}
