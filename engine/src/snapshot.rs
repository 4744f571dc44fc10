//! Per-tick snapshots and the restore log.
//!
//! The orchestrator emits one self-contained snapshot after every tick for
//! the external persistence collaborator, and keeps the history so that
//! validator-ordered tail truncation can restore the state that matched the
//! surviving manuscript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::NarrativeState;

/// A self-contained view of a job after one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub state: NarrativeState,
    /// Step tag, e.g. `write_ch3_s2`.
    pub step: String,
    /// Progress in [0, 100].
    pub progress: u8,
    pub step_message: String,
    pub taken_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn new(state: NarrativeState, step: &str, progress: u8, step_message: &str) -> Self {
        Self {
            state,
            step: step.to_string(),
            progress: progress.min(100),
            step_message: step_message.to_string(),
            taken_at: Utc::now(),
        }
    }
}

/// Ordered snapshot history for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotLog {
    snapshots: Vec<JobSnapshot>,
}

impl SnapshotLog {
    pub fn record(&mut self, snapshot: JobSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest(&self) -> Option<&JobSnapshot> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// The newest snapshot whose word count does not exceed `words` — the
    /// restore point after truncating the manuscript down to `words`.
    pub fn restore_before(&self, words: u64) -> Option<&JobSnapshot> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.state.structure.words_written <= words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BookRequest;

    fn request() -> BookRequest {
        BookRequest {
            prompt: "A keeper's death unsettles a harbor town".to_string(),
            genre: "literary mystery".to_string(),
            target_length_words: 30_000,
            theme_thesis: "Understanding always bills someone".to_string(),
            protagonist_name: "Mara".to_string(),
        }
    }

    fn snapshot_at(words: u64, step: &str) -> JobSnapshot {
        let mut state = NarrativeState::initial(&request()).unwrap();
        state.structure.words_written = words;
        JobSnapshot::new(state, step, 50, "writing")
    }

    #[test]
    fn test_restore_before_picks_nearest_older() {
        let mut log = SnapshotLog::default();
        log.record(snapshot_at(1_000, "write_ch1_s2"));
        log.record(snapshot_at(2_200, "write_ch1_s3"));
        log.record(snapshot_at(3_500, "write_ch2_s1"));

        let restored = log.restore_before(2_500).unwrap();
        assert_eq!(restored.state.structure.words_written, 2_200);
        assert_eq!(restored.step, "write_ch1_s3");
    }

    #[test]
    fn test_restore_before_exact_match() {
        let mut log = SnapshotLog::default();
        log.record(snapshot_at(1_000, "a"));
        log.record(snapshot_at(2_000, "b"));
        let restored = log.restore_before(2_000).unwrap();
        assert_eq!(restored.state.structure.words_written, 2_000);
    }

    #[test]
    fn test_restore_before_nothing_older() {
        let mut log = SnapshotLog::default();
        log.record(snapshot_at(5_000, "a"));
        assert!(log.restore_before(1_000).is_none());
    }

    #[test]
    fn test_truncation_restore_law() {
        // Truncating the tail and restoring the matching snapshot leaves
        // words_written equal to (pre-truncation − truncated words).
        use crate::manuscript::{Manuscript, SceneRecord};

        let mut manuscript = Manuscript::default();
        let mut log = SnapshotLog::default();
        let mut running = 0u64;
        for i in 1..=5u32 {
            let text = (0..1_000).map(|w| format!("w{w}")).collect::<Vec<_>>().join(" ");
            let scene = SceneRecord::new(&format!("ch1_s{i}"), 3, 1, i, "t", "Mara", &text);
            running += scene.word_count;
            manuscript.push(scene);
            log.record(snapshot_at(running, &format!("write_ch1_s{i}")));
        }

        let before = manuscript.total_words();
        let final_tail = (before as f64 * 0.20).ceil() as u64;
        let removed = manuscript.truncate_tail_words(final_tail);
        let restored = log.restore_before(manuscript.total_words()).unwrap();
        assert_eq!(
            restored.state.structure.words_written,
            before - removed
        );
        assert_eq!(restored.state.structure.words_written, manuscript.total_words());
    }

    #[test]
    fn test_progress_clamped() {
        let state = NarrativeState::initial(&request()).unwrap();
        let snap = JobSnapshot::new(state, "finalize", 250, "msg");
        assert_eq!(snap.progress, 100);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snap = snapshot_at(1_234, "write_ch1_s2");
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: JobSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state.structure.words_written, 1_234);
        assert_eq!(parsed.step, "write_ch1_s2");
    }
}
