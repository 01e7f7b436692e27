//! feed-watch binary entrypoint.
//! Loads configuration, runs one ingest pass immediately, then one per trigger until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;

use feed_watch::cli::Cli;
use feed_watch::ingest::config::Config;
use feed_watch::{build_pipeline, run_forever, run_pass, telemetry, PassOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let args = Cli::parse();
    let cfg = Config::load(args.config.as_deref()).context("loading configuration")?;
    cfg.log_summary();

    if let Some(addr) = telemetry::init_metrics()? {
        tracing::info!(%addr, "prometheus exporter listening");
    }

    let pipeline = Arc::new(build_pipeline(&cfg, args.dry_run)?);

    if args.once {
        return match run_pass(pipeline).await {
            PassOutcome::Completed(_) => Ok(()),
            PassOutcome::Failed(reason) => Err(anyhow::anyhow!("pass aborted: {reason}")),
        };
    }

    // Install the Ctrl-C handler before the first pass so an early interrupt is
    // held until the loop is idle instead of killing the process mid-pass.
    let stop = Arc::new(Notify::new());
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => stop.notify_one(),
                Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c"),
            }
        });
    }

    tracing::info!(trigger = %cfg.trigger, "watch agent started");
    let summary = run_forever(pipeline, cfg.trigger, async move { stop.notified().await }).await;
    tracing::info!(
        passes = summary.passes,
        failed_passes = summary.failed_passes,
        added = summary.articles_added,
        "watch agent stopped"
    );
    Ok(())
}
