//! Deterministic redundancy gates over the fingerprint window.
//!
//! These rules run before any LLM evaluation of a drafted scene. First
//! match wins; a hit short-circuits the editor into REGENERATE with
//! concrete rewrite instructions.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::fingerprint::SceneFingerprint;
use crate::state::motif::RepetitionRegistry;
use crate::text::is_information_duplicate;

/// Escalation delta at or below which a repeated function counts as
/// no progress.
pub const ESCALATION_PROGRESS_FLOOR: f64 = 0.1;
/// How many trailing fingerprints the motif-spam rule inspects.
pub const MOTIF_SPAM_LOOKBACK: usize = 5;
/// Per-1000-words density above which a motif is overused and must rest.
pub const MOTIF_DENSITY_CEILING: f64 = 6.0;
/// Assumed words per windowed scene for the density approximation.
const ASSUMED_SCENE_WORDS: f64 = 1_500.0;

/// Which deterministic rule rejected the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyRule {
    /// Same narrative function as the previous scene, no escalation, same
    /// information.
    NoProgressRepeat,
    /// The new information duplicates something already in the window.
    InformationDuplicate,
    /// Motif-heavy scene with no consequence attached.
    MotifSpam,
    /// A saturated motif appears without its permitted final recurrence.
    MotifSaturated,
}

impl std::fmt::Display for RedundancyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoProgressRepeat => write!(f, "no_progress_repeat"),
            Self::InformationDuplicate => write!(f, "information_duplicate"),
            Self::MotifSpam => write!(f, "motif_spam"),
            Self::MotifSaturated => write!(f, "motif_saturated"),
        }
    }
}

/// A deterministic rejection with rewrite guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedundancyVerdict {
    pub rule: RedundancyRule,
    pub reason: String,
    pub suggestion: String,
}

/// Evaluate the redundancy rules in order. `None` means the scene passes
/// on to full evaluation.
pub fn check_redundancy(
    fingerprint: &SceneFingerprint,
    registry: &RepetitionRegistry,
    current_chapter: u32,
) -> Option<RedundancyVerdict> {
    let window = &registry.recent_fingerprints;

    // Rule 1: no-progress repeat against the immediately previous scene.
    if let Some(previous) = window.back() {
        if previous.narrative_function == fingerprint.narrative_function
            && fingerprint.escalation_delta <= ESCALATION_PROGRESS_FLOOR
            && is_information_duplicate(&previous.new_information, &fingerprint.new_information)
        {
            return Some(RedundancyVerdict {
                rule: RedundancyRule::NoProgressRepeat,
                reason: format!(
                    "repeats {} with no escalation and the same information",
                    fingerprint.narrative_function
                ),
                suggestion: "change the narrative function, raise the stakes, or reveal \
                             something the reader does not already know"
                    .to_string(),
            });
        }
    }

    // Rule 2: global information duplicate anywhere in the window.
    for earlier in window.iter() {
        if is_information_duplicate(&earlier.new_information, &fingerprint.new_information) {
            return Some(RedundancyVerdict {
                rule: RedundancyRule::InformationDuplicate,
                reason: format!(
                    "new information duplicates scene {}: {}",
                    earlier.scene_id, earlier.new_information
                ),
                suggestion: "reveal information the reader has not seen in any recent scene"
                    .to_string(),
            });
        }
    }

    // Rule 3: motif spam — motif-heavy with no consequence.
    if fingerprint.consequence_introduced.is_none() {
        let recent: Vec<&SceneFingerprint> =
            window.iter().rev().take(MOTIF_SPAM_LOOKBACK).collect();
        let repeated: Vec<&String> = fingerprint
            .motifs_used
            .iter()
            .filter(|m| {
                recent
                    .iter()
                    .any(|fp| fp.motifs_used.iter().any(|used| *used == **m))
            })
            .collect();
        if repeated.len() >= 2 {
            return Some(RedundancyVerdict {
                rule: RedundancyRule::MotifSpam,
                reason: format!(
                    "reuses motifs {:?} without introducing a consequence",
                    repeated
                ),
                suggestion: "attach a concrete consequence or drop the repeated motifs"
                    .to_string(),
            });
        }
    }

    // Saturation ceiling: a saturated motif may not appear in any accepted
    // scene until its final recurrence opens.
    for motif in &fingerprint.motifs_used {
        let gate = registry.gate(motif, current_chapter);
        if !gate.permits_use() {
            return Some(RedundancyVerdict {
                rule: RedundancyRule::MotifSaturated,
                reason: format!("motif \"{motif}\" has exhausted its reinforcement budget"),
                suggestion: format!("rest the motif \"{motif}\" for at least one chapter"),
            });
        }
    }

    None
}

/// Approximate per-1000-words density of a motif over the window.
pub fn motif_density(motif: &str, window: &VecDeque<SceneFingerprint>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let count = window
        .iter()
        .filter(|fp| fp.motifs_used.iter().any(|m| m == motif))
        .count();
    count as f64 * (1_000.0 / (window.len() as f64 * ASSUMED_SCENE_WORDS))
}

/// Motifs whose window density exceeds the ceiling; they must rest.
pub fn overused_motifs(registry: &RepetitionRegistry) -> Vec<String> {
    registry
        .motifs
        .iter()
        .filter(|m| motif_density(m, &registry.recent_fingerprints) > MOTIF_DENSITY_CEILING)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::NarrativeFunction;

    fn fp(id: &str, function: NarrativeFunction, info: &str) -> SceneFingerprint {
        SceneFingerprint::minimal(id, function, info)
    }

    fn registry_with(fps: Vec<SceneFingerprint>) -> RepetitionRegistry {
        let mut registry = RepetitionRegistry::default();
        for f in fps {
            registry.push_fingerprint(f);
        }
        registry
    }

    #[test]
    fn test_rule_one_no_progress_repeat() {
        let registry = registry_with(vec![fp(
            "ch1_s1",
            NarrativeFunction::Discovery,
            "The lighthouse keeper died last night",
        )]);
        let candidate = SceneFingerprint {
            escalation_delta: 0.05,
            ..fp(
                "ch1_s2",
                NarrativeFunction::Discovery,
                "The lighthouse keeper died in the night",
            )
        };
        let verdict = check_redundancy(&candidate, &registry, 1).unwrap();
        assert_eq!(verdict.rule, RedundancyRule::NoProgressRepeat);
        assert!(verdict.suggestion.contains("narrative function"));
    }

    #[test]
    fn test_rule_one_requires_low_escalation() {
        let registry = registry_with(vec![fp(
            "ch1_s1",
            NarrativeFunction::Discovery,
            "The lighthouse keeper died last night",
        )]);
        let candidate = SceneFingerprint {
            escalation_delta: 0.4,
            ..fp(
                "ch1_s2",
                NarrativeFunction::Discovery,
                "The lighthouse keeper died in the night",
            )
        };
        // Escalation defeats rule 1, but rule 2 still catches the duplicate.
        let verdict = check_redundancy(&candidate, &registry, 1).unwrap();
        assert_eq!(verdict.rule, RedundancyRule::InformationDuplicate);
    }

    #[test]
    fn test_rule_two_global_duplicate() {
        let registry = registry_with(vec![
            fp(
                "ch1_s1",
                NarrativeFunction::Discovery,
                "The tide log for March is missing a page",
            ),
            fp(
                "ch1_s2",
                NarrativeFunction::Escalation,
                "The harbor board met in secret",
            ),
        ]);
        let candidate = fp(
            "ch1_s3",
            NarrativeFunction::Consequence,
            "The March tide log is missing a page",
        );
        let verdict = check_redundancy(&candidate, &registry, 1).unwrap();
        assert_eq!(verdict.rule, RedundancyRule::InformationDuplicate);
        assert!(verdict.reason.contains("ch1_s1"));
    }

    #[test]
    fn test_rule_three_motif_spam() {
        let mut fps = Vec::new();
        for i in 0..5 {
            let mut f = fp(
                &format!("ch1_s{i}"),
                NarrativeFunction::Discovery,
                &format!("distinct revelation number {i} about the town"),
            );
            f.motifs_used = vec!["lighthouse".to_string()];
            fps.push(f);
        }
        let registry = registry_with(fps);

        let mut candidate = fp(
            "ch2_s1",
            NarrativeFunction::Escalation,
            "The keeper's widow burns the letters",
        );
        candidate.motifs_used = vec!["lighthouse".to_string(), "threshold".to_string()];
        candidate.consequence_introduced = None;
        // "threshold" never appeared — only one repeated motif, rule 3 passes.
        assert!(check_redundancy(&candidate, &registry, 2).is_none());

        let mut registry = registry;
        let mut with_threshold = fp(
            "ch1_s9",
            NarrativeFunction::Confirmation,
            "The threshold stone was replaced recently",
        );
        with_threshold.motifs_used = vec!["threshold".to_string()];
        registry.push_fingerprint(with_threshold);

        let verdict = check_redundancy(&candidate, &registry, 2).unwrap();
        assert_eq!(verdict.rule, RedundancyRule::MotifSpam);
    }

    #[test]
    fn test_rule_three_consequence_defuses() {
        let mut fps = Vec::new();
        for i in 0..5 {
            let mut f = fp(
                &format!("ch1_s{i}"),
                NarrativeFunction::Discovery,
                &format!("distinct revelation number {i} about the town"),
            );
            f.motifs_used = vec!["lighthouse".to_string(), "threshold".to_string()];
            fps.push(f);
        }
        let registry = registry_with(fps);
        let mut candidate = fp(
            "ch2_s1",
            NarrativeFunction::Escalation,
            "The keeper's widow burns the letters",
        );
        candidate.motifs_used = vec!["lighthouse".to_string(), "threshold".to_string()];
        candidate.consequence_introduced = Some("The letters cannot be recovered".to_string());
        assert!(check_redundancy(&candidate, &registry, 2).is_none());
    }

    #[test]
    fn test_saturated_motif_rejected() {
        let mut registry = RepetitionRegistry::default();
        registry.record_motif("lighthouse", 1);
        registry.record_motif("lighthouse", 1);
        registry.record_motif("lighthouse", 1);
        registry.record_motif("lighthouse", 2);

        let mut candidate = fp(
            "ch3_s1",
            NarrativeFunction::Escalation,
            "The beam pattern changed twice in one night",
        );
        candidate.motifs_used = vec!["lighthouse".to_string()];
        candidate.consequence_introduced = Some("The channel is unlit".to_string());

        let verdict = check_redundancy(&candidate, &registry, 3).unwrap();
        assert_eq!(verdict.rule, RedundancyRule::MotifSaturated);
        // After a chapter of rest the final recurrence opens.
        assert!(check_redundancy(&candidate, &registry, 4).is_none());
    }

    #[test]
    fn test_clean_scene_passes() {
        let registry = registry_with(vec![fp(
            "ch1_s1",
            NarrativeFunction::Discovery,
            "The lighthouse keeper died last night",
        )]);
        let candidate = SceneFingerprint {
            escalation_delta: 0.3,
            ..fp(
                "ch1_s2",
                NarrativeFunction::Consequence,
                "The channel buoys were unlit for six hours",
            )
        };
        assert!(check_redundancy(&candidate, &registry, 1).is_none());
    }

    #[test]
    fn test_motif_density() {
        let mut window = VecDeque::new();
        for i in 0..4 {
            let mut f = fp(
                &format!("ch1_s{i}"),
                NarrativeFunction::Discovery,
                &format!("revelation {i}"),
            );
            if i < 2 {
                f.motifs_used = vec!["lighthouse".to_string()];
            }
            window.push_back(f);
        }
        // 2 uses over 4 scenes × 1500 words ≈ 0.33 per 1000 words.
        let density = motif_density("lighthouse", &window);
        assert!((density - 2.0 * (1_000.0 / 6_000.0)).abs() < 1e-9);
        assert_eq!(motif_density("absent", &window), 0.0);
    }

    #[test]
    fn test_overused_motifs_empty_window() {
        let registry = RepetitionRegistry::default();
        assert!(overused_motifs(&registry).is_empty());
    }
}
