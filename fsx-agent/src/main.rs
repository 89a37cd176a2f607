//! fsx-agent: reconciles a storage manifest against the simulated
//! provisioning API and prints the apply report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fsx_agent::{Manifest, ManifestAgent, SimOptions, SimulatedApi};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// fsx manifest agent
#[derive(Parser, Debug)]
#[command(name = "fsx-agent", version, about)]
struct Args {
    /// Manifest file (JSON)
    manifest: PathBuf,

    /// Poll interval in milliseconds (overrides the manifest)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Multiplier applied to every wait timeout
    #[arg(long)]
    timeout_scale: Option<f64>,

    /// Describe calls a simulated resource stays in its transitional status
    #[arg(long, default_value = "2")]
    settle_after: u32,

    /// Records per simulated describe page
    #[arg(long, default_value = "50")]
    page_size: usize,

    /// Apply the manifest this many times (later passes should be no-ops)
    #[arg(long, default_value = "1")]
    passes: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fsx_agent=info,fsx_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("Failed to load {}", args.manifest.display()))?;

    let mut config = manifest.engine.clone();
    if let Some(ms) = args.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(ms));
    }
    if let Some(scale) = args.timeout_scale {
        config = config.with_timeout_scale(scale);
    }
    config.validate()?;

    info!(
        manifest = %args.manifest.display(),
        resources = manifest.resources.len(),
        poll_interval_ms = config.poll_interval_ms,
        "Starting fsx-agent"
    );

    let api = Arc::new(SimulatedApi::new(SimOptions {
        settle_after: args.settle_after,
        page_size: args.page_size,
    }));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling pending waits");
            on_signal.cancel();
        }
    });

    let mut agent = ManifestAgent::new(api, &config, cancel)?;

    let mut failed = 0;
    for pass in 1..=args.passes.max(1) {
        let report = agent.apply(&manifest).await;
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to encode report")?
        );
        failed = report.failures().count();
        for outcome in report.failures() {
            error!(pass, name = %outcome.name, kind = %outcome.kind, "Resource failed");
        }
    }

    if failed > 0 {
        anyhow::bail!("{} resource(s) failed to reconcile", failed);
    }
    Ok(())
}
