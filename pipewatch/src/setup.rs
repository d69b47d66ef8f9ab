use std::sync::Arc;

use anyhow::{Context, Result};
use pipewatch_collector::{ConsoleClient, GlueClient, HttpClient, HttpMetricSink, Orchestrator};
use pipewatch_config::{CollectorKind, Config};
use pipewatch_statsd::MetricsClientConfig;

/// Checks settings that are valid on their own but cannot work together.
pub fn check_config(config: &Config) -> Result<()> {
    if config.collector_enabled(CollectorKind::DagStatus)
        && !matches!(config.workflow_scheme(), "http" | "https")
    {
        anyhow::bail!(
            "unsupported workflow scheme '{}', expected http or https",
            config.workflow_scheme()
        );
    }

    if config.invocation_timeout() <= config.deadline_margin() {
        anyhow::bail!(
            "the configured `limits.invocation_timeout` must exceed `limits.deadline_margin`"
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    match config.path() {
        Some(path) => pipewatch_log::info!("launching pipewatch with config {}", path.display()),
        None => pipewatch_log::info!("launching pipewatch without config file"),
    }

    let collectors: Vec<_> = config
        .collectors()
        .iter()
        .map(CollectorKind::as_str)
        .collect();
    pipewatch_log::info!("  collectors: {}", collectors.join(", "));

    if config.collector_enabled(CollectorKind::DagStatus) {
        pipewatch_log::info!("  environments: {}", config.environments().join(", "));
    }
    pipewatch_log::info!("  max workers: {}", config.max_workers());
    pipewatch_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    pipewatch_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
        default_sample_rate: config.metrics_sample_rate().into(),
    })
    .with_context(|| format!("failed to initialize statsd client for {host}"))?;

    Ok(())
}

/// Creates the upstream clients and the orchestrator driving them.
pub fn build_orchestrator(config: &Arc<Config>) -> Result<Orchestrator> {
    let http = HttpClient::from_config(config).context("failed to create HTTP client")?;

    Ok(Orchestrator::new(
        Arc::clone(config),
        Arc::new(GlueClient::from_config(http.clone(), config)),
        Arc::new(ConsoleClient::from_config(http.clone(), config)),
        Arc::new(HttpMetricSink::from_config(http, config)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_scheme() {
        let config = pipewatch_test::config(
            "collectors: [dag_status]\nworkflow:\n  environments: [prod]\n  scheme: ftp",
        );

        let error = check_config(&config).unwrap_err();
        assert_eq!(
            error.to_string(),
            "unsupported workflow scheme 'ftp', expected http or https"
        );
    }

    #[test]
    fn test_timeout_below_margin() {
        let config = pipewatch_test::config("limits:\n  invocation_timeout: 5");
        assert!(check_config(&config).is_err());

        assert!(check_config(&pipewatch_test::config("")).is_ok());
    }
}
