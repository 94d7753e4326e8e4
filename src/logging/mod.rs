//! Structured logging setup. Pretty output for local development, JSON for
//! anywhere logs are scraped by a collector.

use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;

/// Configure and initialize logging for the application.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!("warn,gateproxy={base_level}"))
    });

    let subscriber = tracing_subscriber::fmt().with_target(true).with_env_filter(filter);

    match tracing_format {
        TracingFormat::Pretty => subscriber.pretty().init(),
        TracingFormat::Json => subscriber.json().init(),
    }
}
