use std::time::Duration;

use clap::Parser;
use pipeline::StopReason;
use sampling_daemon::config::{load_config, Args, DaemonConfig};
use sampling_daemon::session;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sampling_daemon=info,pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sampling daemon starting...");

    // --- Argument Parsing ---
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => {
            tracing::info!("No configuration file given, using defaults");
            DaemonConfig::default()
        }
    };
    config.apply_args(&args);

    let summary = session::run(config, args.duration_secs.map(Duration::from_secs)).await?;
    tracing::info!(
        streamed = summary.streamed_batches,
        csv = ?summary.csv_file,
        "Daemon shutting down"
    );

    if let StopReason::Fault(err) = summary.report.reason {
        anyhow::bail!("Measurement ended with a fault: {}", err);
    }
    Ok(())
}
