mod config;

use clap::Parser;
use config::{Config, LoggingConfig};
use federation::metrics_defs::ALL_METRICS;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Federated search proxy presenting several clusters as one
#[derive(Parser)]
#[command(name = "multies")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long)]
    config_file_path: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_file_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // Keeps sentry flushing until the process exits
    let _sentry = init_logging(config.logging.as_ref());

    if let Some(metrics) = &config.metrics
        && let Err(e) = shared::statsd::init_statsd(
            &metrics.statsd_host,
            metrics.statsd_port,
            "multies",
            ALL_METRICS,
        )
    {
        tracing::error!(error = %e, "Failed to set up metrics");
        process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            process::exit(1);
        }
    };

    tracing::info!("Starting multies");
    if let Err(e) = runtime.block_on(federation::run(config.federation)) {
        tracing::error!(error = %e, "multies exited with error");
        process::exit(1);
    }
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}
