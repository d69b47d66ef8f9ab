//! Pipewatch collects telemetry of data pipelines and publishes it as custom metrics.
//!
//! Every invocation lists batch jobs and workflow DAG runs from the upstream APIs, aggregates the
//! runs that fall into each collector's observation window, and publishes the results to the
//! metrics backend. See the `pipewatch-collector` crate for the collection pipeline.
//!
//! # Modes
//!
//! - **Function:** If `AWS_LAMBDA_RUNTIME_API` is set, pipewatch polls the runtime for triggers
//!   and runs one invocation per trigger until the runtime stops the process. The deadline of each
//!   trigger bounds the time budget of its invocation.
//! - **One-shot:** Otherwise, pipewatch runs a single invocation of all configured collectors and
//!   exits with status `0` on success and `1` on failure. This mode is meant for schedulers such as
//!   cron and for local testing.
//!
//! # Configuration
//!
//! The configuration is read from the YAML file named by `PIPEWATCH_CONFIG`, if any, and
//! overridden from the environment. See `pipewatch-config` for all options.
//!
//! # Feature Flags
//!
//! - `sentry`: Reports errors to Sentry if a DSN is configured.
//!
//! # Workspace Crates
//!
//!  - `pipewatch`: Main entry point.
//!  - `pipewatch-collector`: Upstream clients, metric shaping and the invocation orchestrator.
//!  - `pipewatch-common`: Timestamps and observation windows.
//!  - `pipewatch-config`: Static configuration.
//!  - `pipewatch-jobs`: Run records, filtering, cost estimation and aggregation.
//!  - `pipewatch-lambda`: Client of the function runtime API.
//!  - `pipewatch-log`: Error reporting and logging.
//!  - `pipewatch-metrics`: Metric points, batches and the sink interface.
//!  - `pipewatch-statsd`: StatsD client for internal measurements.
//!  - `pipewatch-test`: Helpers for testing the collectors.

#![allow(clippy::derive_partial_eq_without_eq)]

mod setup;
mod trigger;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pipewatch_config::Config;
use pipewatch_lambda::{ErrorReport, RuntimeApi};

/// Time granted to deliver pending error reports on exit.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

fn execute() -> Result<i32> {
    let runtime_api = RuntimeApi::from_env()
        .transpose()
        .context("invalid runtime API address")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async {
        let (config, orchestrator) = match bootstrap() {
            Ok(bootstrapped) => bootstrapped,
            Err(error) => {
                if let Some(api) = &runtime_api {
                    let report = ErrorReport::new("Bootstrap", format!("{error:#}"));
                    if let Err(error) = api.report_init_error(&report).await {
                        pipewatch_log::error!(
                            error = &error as &dyn std::error::Error,
                            "failed to report bootstrap error",
                        );
                    }
                }
                return Err(error);
            }
        };

        match runtime_api {
            Some(api) => trigger::serve(&api, &config, &orchestrator).await,
            None => Ok(trigger::run_once(&config, &orchestrator).await),
        }
    })
}

fn bootstrap() -> Result<(Arc<Config>, pipewatch_collector::Orchestrator)> {
    let config = Config::from_env().context("failed to load configuration")?;

    pipewatch_log::init(config.logging(), config.sentry());
    setup::check_config(&config)?;
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    let config = Arc::new(config);
    let orchestrator = setup::build_orchestrator(&config)?;
    Ok((config, orchestrator))
}

pub fn main() {
    let exit_code = match execute() {
        Ok(code) => code,
        Err(err) => {
            pipewatch_log::ensure_error(&err);
            1
        }
    };

    pipewatch_log::flush(FLUSH_TIMEOUT);
    process::exit(exit_code);
}
