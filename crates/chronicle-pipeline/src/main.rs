//! chronicle-pipeline — run a book job against an OpenAI-compatible
//! endpoint.
//!
//! Ticks the orchestrator to completion, persisting a self-contained
//! snapshot and the manuscript after every tick so an external scheduler
//! can take over at any point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use chronicle_pipeline::config::{load_request, PipelineConfig};
use chronicle_pipeline::orchestrator::{JobStatus, Orchestrator};
use chronicle_pipeline::telemetry::{init_tracing, RunMetrics};
use chronicle_pipeline::OpenAiClient;

#[derive(Debug, Parser)]
#[command(name = "chronicle-pipeline", about = "Long-form narrative generation job runner")]
struct Cli {
    /// TOML file with the book request.
    #[arg(long)]
    request: PathBuf,

    /// Output directory for snapshots, manuscript, and metrics.
    #[arg(long, default_value = "chronicle-out")]
    out: PathBuf,

    /// Hard cap on ticks, as a runaway guard.
    #[arg(long, default_value_t = 2_000)]
    max_ticks: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let request = load_request(&cli.request)?;
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("creating output dir {}", cli.out.display()))?;

    let config = PipelineConfig::default();
    let client = Arc::new(OpenAiClient::new(&config.endpoint));
    let mut orchestrator =
        Orchestrator::new(&request, client, &config).context("constructing job")?;
    info!(job_id = %orchestrator.job_id(), "job created");

    let mut ticks = 0u64;
    loop {
        let outcome = orchestrator.tick().await;
        ticks += 1;
        info!(
            step = %outcome.step,
            progress = outcome.progress,
            status = %outcome.status,
            "{}",
            outcome.message
        );

        persist(&orchestrator, &cli.out)?;

        match outcome.status {
            JobStatus::Complete => break,
            JobStatus::Failed => {
                if let Some(failure) = orchestrator.failure() {
                    error!(
                        last_step = %failure.last_step,
                        error = %failure.error,
                        "job failed"
                    );
                    for issue in &failure.issues {
                        error!(issue = %issue, "outstanding issue");
                    }
                }
                break;
            }
            _ => {}
        }
        if ticks >= cli.max_ticks {
            error!(ticks, "tick cap reached; stopping");
            break;
        }
    }

    let metrics = RunMetrics::collect(&orchestrator, ticks);
    metrics.write_to(&cli.out.join("run-metrics.json"))?;
    info!(
        status = %metrics.status,
        words = metrics.words_written,
        scenes = metrics.scenes_accepted,
        ticks,
        "run finished"
    );
    Ok(())
}

/// The external persistence collaborator: snapshot + manuscript to disk.
fn persist(orchestrator: &Orchestrator, out: &std::path::Path) -> Result<()> {
    if let Some(snapshot) = orchestrator.latest_snapshot() {
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(out.join("job-state.json"), json)
            .with_context(|| "writing job snapshot")?;
    }
    std::fs::write(
        out.join("manuscript.md"),
        orchestrator.manuscript().render_markdown(),
    )
    .with_context(|| "writing manuscript")?;
    Ok(())
}
