//! Tracing setup for the embedding process.
//!
//! Stdout only: this crate is the core behind a transport layer, and the
//! process that owns it owns log files and shipping. Filtering follows the
//! `PODIUM_LOG` environment variable, falling back to the configured
//! directives, then to `info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::config::{LogFormat, LoggingConfig};

const FILTER_ENV: &str = "PODIUM_LOG";

/// Install the global subscriber. Later calls (tests, multiple services in
/// one process) are no-ops.
pub fn init(config: &LoggingConfig) {
    if !config.stdout {
        return;
    }

    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy();
    if std::env::var_os(FILTER_ENV).is_none()
        && let Some(directives) = config.filter.as_deref()
    {
        for directive in directives.split(',') {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("telemetry already initialized");
    }
}
