use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::{Level, LogConfig, LogFormat, SentryConfig};

/// The full release name including the Pipewatch version and SHA.
#[cfg(feature = "sentry")]
const RELEASE: &str = std::env!("PIPEWATCH_RELEASE");

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Returns the default filter directives: INFO for third-party crates, the configured level for
/// all Pipewatch crates.
fn default_filters(level: Level) -> EnvFilter {
    // Connection pool internals of the HTTP client are spammy on INFO.
    let mut directives = String::from("info,hyper_util=warn,reqwest=warn");

    for name in CRATE_NAMES {
        directives.push(',');
        directives.push_str(name);
        directives.push('=');
        directives.push_str(level.as_str());
    }

    EnvFilter::new(directives)
}

/// Initialize the logging system and reporting to Sentry.
///
/// If `RUST_LOG` is set, its directives replace the defaults derived from the configured level.
///
/// # Example
///
/// ```
/// let log_config = pipewatch_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// let sentry_config = pipewatch_log::SentryConfig::default();
///
/// pipewatch_log::init(&log_config, &sentry_config);
/// ```
pub fn init(config: &LogConfig, sentry: &SentryConfig) {
    if config.enable_backtraces {
        // SAFETY: Called once during startup before any other threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let subscriber = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            subscriber.compact().without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => default_filters(config.level),
    };

    let registry = tracing_subscriber::registry()
        .with(format)
        .with(filter);

    #[cfg(feature = "sentry")]
    let registry = registry.with(sentry::integrations::tracing::layer());

    registry.try_init().ok();

    init_sentry(config, sentry);
}

#[cfg(not(feature = "sentry"))]
fn init_sentry(_config: &LogConfig, sentry: &SentryConfig) {
    if sentry.enabled_dsn().is_some() {
        crate::warn!("sentry reporting is enabled but this build does not include it");
    }
}

#[cfg(feature = "sentry")]
fn init_sentry(config: &LogConfig, sentry: &SentryConfig) {
    let Some(dsn) = sentry.enabled_dsn() else {
        return;
    };

    let dsn = match dsn.parse::<sentry::types::Dsn>() {
        Ok(dsn) => dsn,
        Err(error) => {
            crate::error!(
                error = &error as &dyn std::error::Error,
                "invalid sentry dsn, error reporting disabled"
            );
            return;
        }
    };

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        in_app_include: vec!["pipewatch"],
        release: Some(RELEASE.into()),
        attach_stacktrace: config.enable_backtraces,
        environment: sentry.environment.clone().map(Into::into),
        ..Default::default()
    });

    // Keep the client initialized. The client is flushed manually before the process exits.
    std::mem::forget(guard);
}

/// Flushes pending error reports before the process exits.
///
/// Returns immediately if Sentry reporting is not enabled.
pub fn flush(timeout: std::time::Duration) {
    #[cfg(feature = "sentry")]
    if let Some(client) = sentry::Hub::current().client() {
        client.close(Some(timeout));
    }

    #[cfg(not(feature = "sentry"))]
    let _ = timeout;
}
