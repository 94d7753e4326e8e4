use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}

/// gateproxy - a small L7 reverse proxy with routing, rate limiting, and an
/// audited admin control plane.
#[derive(Parser, Debug)]
#[command(name = "gateproxy", version)]
pub struct Args {
    /// Path to the TOML configuration document.
    #[arg(long, env = "GATEPROXY_CONFIG", default_value = "gateproxy.toml")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormatArg::Pretty)]
    pub tracing: TracingFormatArg,

    /// Load and validate the configuration, then exit without binding a
    /// socket. Useful in CI and as a systemd `ExecStartPre` check.
    #[arg(long, default_value_t = false)]
    pub validate_only: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum TracingFormatArg {
    #[default]
    Pretty,
    Json,
}

impl From<TracingFormatArg> for TracingFormat {
    fn from(value: TracingFormatArg) -> Self {
        match value {
            TracingFormatArg::Pretty => TracingFormat::Pretty,
            TracingFormatArg::Json => TracingFormat::Json,
        }
    }
}
