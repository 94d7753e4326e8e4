use std::process::ExitCode;

use clap::Parser;
use gateproxy::app::App;
use gateproxy::cli::Args;
use gateproxy::config;
use gateproxy::logging::setup_logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let early_config = match config::Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {:?}: {e}", args.config);
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&early_config, args.tracing.into());

    if args.validate_only {
        return match config::build_snapshot(&early_config).await {
            Ok(snapshot) => {
                info!(route_count = snapshot.len(), "configuration is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "configuration validation failed");
                ExitCode::FAILURE
            }
        };
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting gateproxy");

    let app = match App::new(&args.config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
