//! LocalCam discovery CLI
//!
//! Runs one sweep and prints the full scan report as JSON.

use localcam::{scan, ScanOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localcam=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("LocalCam discovery v{}", env!("CARGO_PKG_VERSION"));

    let max_parallelism = std::env::var("LOCALCAM_PARALLELISM")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(64);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::warn!("Interrupted, cancelling scan");
        cancel_for_signal.cancel();
    });

    let report = scan(ScanOptions {
        max_parallelism,
        cancel,
    })
    .await?;

    tracing::info!(
        detections = report.detections.len(),
        candidates = report.diagnostics.candidates.len(),
        "Scan finished"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
