//! Tracing setup and per-run metrics.
//!
//! Two sinks: structured logs via `tracing` (filtered by `RUST_LOG`), and a
//! run-metrics JSON file written next to the manuscript when a job ends.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use chronicle_engine::SceneDecision;

use crate::orchestrator::Orchestrator;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Summary metrics for one job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub job_id: String,
    pub status: String,
    pub final_step: String,
    pub ticks: u64,
    pub words_written: u64,
    pub scenes_accepted: usize,
    pub scenes_regenerated: usize,
    pub scenes_dropped: usize,
    pub forced_acceptances: usize,
    pub act_tail_regenerations: u32,
    pub final_tail_regenerations: u32,
    pub finished_at: String,
}

impl RunMetrics {
    /// Collect metrics from a finished (or failed) orchestrator.
    pub fn collect(orchestrator: &Orchestrator, ticks: u64) -> Self {
        let decisions = orchestrator.decisions();
        Self {
            job_id: orchestrator.job_id().to_string(),
            status: orchestrator.status().to_string(),
            final_step: orchestrator
                .latest_snapshot()
                .map(|s| s.step.clone())
                .unwrap_or_else(|| "created".to_string()),
            ticks,
            words_written: orchestrator.state().structure.words_written,
            scenes_accepted: orchestrator.manuscript().scenes.len(),
            scenes_regenerated: decisions
                .iter()
                .filter(|d| d.decision == SceneDecision::Regenerate)
                .count(),
            scenes_dropped: decisions
                .iter()
                .filter(|d| d.decision == SceneDecision::Drop)
                .count(),
            forced_acceptances: decisions.iter().filter(|d| d.forced).count(),
            act_tail_regenerations: orchestrator.budgets().act_tail_regen_count,
            final_tail_regenerations: orchestrator.budgets().final_tail_regen_count,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Write the metrics file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing metrics to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::llm::MockLlm;
    use chronicle_engine::BookRequest;
    use std::sync::Arc;

    #[test]
    fn test_collect_on_fresh_job() {
        let orchestrator = Orchestrator::new(
            &BookRequest {
                prompt: "p".to_string(),
                genre: "g".to_string(),
                target_length_words: 10_000,
                theme_thesis: "t".to_string(),
                protagonist_name: "Mara".to_string(),
            },
            Arc::new(MockLlm::new()),
            &PipelineConfig::default(),
        )
        .unwrap();
        let metrics = RunMetrics::collect(&orchestrator, 0);
        assert_eq!(metrics.status, "queued");
        assert_eq!(metrics.scenes_accepted, 0);
        assert_eq!(metrics.words_written, 0);
    }

    #[test]
    fn test_metrics_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let metrics = RunMetrics {
            job_id: "job".to_string(),
            status: "complete".to_string(),
            final_step: "complete".to_string(),
            ticks: 15,
            words_written: 12_600,
            scenes_accepted: 9,
            scenes_regenerated: 2,
            scenes_dropped: 0,
            forced_acceptances: 1,
            act_tail_regenerations: 1,
            final_tail_regenerations: 0,
            finished_at: "2026-08-01T00:00:00Z".to_string(),
        };
        metrics.write_to(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: RunMetrics = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.scenes_accepted, 9);
    }
}
