//! Prompt builders for every stage.
//!
//! Context discipline: prompts are built from `NarrativeState` and its three
//! rolling summaries only. Manuscript prose never enters a prompt, which
//! keeps prompt size constant in book length. The one exception is the scene
//! currently under judgment, which the editor must be able to read.

use chronicle_engine::redundancy::overused_motifs;
use chronicle_engine::state::NarrativeState;
use chronicle_engine::SceneFingerprint;

/// Compact rendering of the state for LLM consumption.
pub fn state_digest(state: &NarrativeState) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "# Book\nGenre: {} | Thesis: {}\nProtagonist: {}\nTarget: {} words ({} written)\n\n",
        state.request.genre,
        state.request.theme_thesis,
        state.request.protagonist_name,
        state.request.target_length_words,
        state.structure.words_written,
    ));

    out.push_str(&format!(
        "# Position\nAct {}/{} | chapter {} | scene {}\n\n",
        state.structure.act_index,
        state.geometry.acts_total,
        state.current_chapter(),
        state.structure.scene_in_chapter,
    ));

    out.push_str(&format!(
        "# Progression\nmystery {:.2} | clarity {:.2} | emotional intensity {:.2} | velocity {:.2}\n",
        state.progression.mystery_level,
        state.progression.clarity_level,
        state.progression.emotional_intensity,
        state.progression.narrative_velocity,
    ));
    out.push_str(&format!(
        "Escalation budget remaining: {}\n\n",
        state.escalation_budget.remaining
    ));

    out.push_str(&format!("# Act goal\n{}\n\n", state.act_state.goal));

    if !state.act_state.open_questions.is_empty() {
        out.push_str("# Open questions\n");
        for q in &state.act_state.open_questions {
            out.push_str(&format!("- {q}\n"));
        }
        out.push('\n');
    }

    out.push_str("# Characters\n");
    for (name, c) in &state.characters {
        out.push_str(&format!(
            "- {name}: certainty {:.2}, transformation {:.2}, costs {}, role {}{}\n",
            c.certainty,
            c.transformation,
            c.costs_incurred.len(),
            c.epistemic_role
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unset".to_string()),
            if c.is_primary { " (primary)" } else { "" },
        ));
    }
    out.push('\n');

    if state.interpretation.models_generated {
        out.push_str("# Competing interpretations\n");
        for m in &state.interpretation.models {
            out.push_str(&format!(
                "- ({}) {} [{:?}]: {}\n",
                m.id, m.label, m.status, m.description
            ));
        }
        out.push('\n');
    }

    let resting = state.repetition.resting_motifs(state.current_chapter());
    let overused = overused_motifs(&state.repetition);
    if !resting.is_empty() || !overused.is_empty() {
        out.push_str("# Motifs that must rest\n");
        for m in resting.iter().chain(overused.iter()) {
            out.push_str(&format!("- {m}\n"));
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "# Summaries\nBook so far: {}\nCurrent act: {}\nPrevious scene: {}\n",
        non_empty(&state.summaries.book_so_far),
        non_empty(&state.summaries.current_act),
        non_empty(&state.summaries.previous_scene),
    ));

    out
}

fn non_empty(s: &str) -> &str {
    if s.trim().is_empty() {
        "(nothing yet)"
    } else {
        s
    }
}

/// Constitution: premise, cast, and the three competing interpretations.
pub fn constitution(state: &NarrativeState) -> (String, String) {
    let system = "You are the story architect for a long-form narrative engine. \
                  You design the premise, the cast, and exactly three mutually \
                  exclusive interpretations of the core mystery. You respond only \
                  with JSON."
        .to_string();
    let user = format!(
        "{}\n# Task\nFrom the user prompt below, produce the book's constitution.\n\
         The three interpretation models must have ids \"a\", \"b\", \"c\" and must \
         stay in genuine competition: one should win socially, one empirically, one \
         emotionally.\n\n# User prompt\n{}",
        state_digest(state),
        state.request.prompt,
    );
    (system, user)
}

/// Per-act plan: goal, open questions, close conditions.
pub fn act_plan(state: &NarrativeState) -> (String, String) {
    let system = "You plan act structure for a long-form narrative engine. Each act \
                  gets a goal, open questions to sustain, and conditions under which \
                  the act may close. You respond only with JSON."
        .to_string();
    let user = format!(
        "{}\n# Task\nPlan all {} acts for this book. Questions must stay askable \
         across chapters; close conditions must be observable in scene summaries.",
        state_digest(state),
        state.geometry.acts_total,
    );
    (system, user)
}

/// Scene draft. The writer sees state, brief, and constraints — no prose.
pub fn writer(state: &NarrativeState, brief: &str, constraints: &[String]) -> (String, String) {
    let system = format!(
        "You draft one scene of a {} novel. Write 1200-2500 words of finished prose. \
         Begin with exactly two header lines:\nTITLE: <scene title>\nPOV: <point-of-view \
         character>\nThen a blank line, then the scene. No other commentary.",
        state.request.genre,
    );
    let mut user = format!("{}\n# Scene brief\n{brief}\n", state_digest(state));
    if !constraints.is_empty() {
        user.push_str("\n# Constraints\n");
        for c in constraints {
            user.push_str(&format!("- {c}\n"));
        }
    }
    (system, user)
}

/// Fingerprint extraction over a drafted scene.
pub fn fingerprint(state: &NarrativeState, scene_text: &str) -> (String, String) {
    let system = "You are the analytical editor of a narrative engine. Extract a \
                  scene fingerprint: what the scene does, what is newly revealed, \
                  what it costs. Be literal. You respond only with JSON."
        .to_string();
    let user = format!(
        "{}\n# Scene under analysis\n{scene_text}",
        state_digest(state)
    );
    (system, user)
}

/// Full editorial evaluation of a drafted scene.
pub fn editor(
    state: &NarrativeState,
    fingerprint: &SceneFingerprint,
    scene_text: &str,
) -> (String, String) {
    let system = "You are the line editor of a narrative engine. Decide accept, \
                  rewrite, merge, regenerate, or drop. Accepted text must land \
                  between 900 and 1800 words; cut if needed. When you accept or \
                  rewrite, emit a state patch capturing exactly what changed. You \
                  respond only with JSON."
        .to_string();
    let user = format!(
        "{}\n# Scene fingerprint\n{}\n\n# Scene under judgment\n{scene_text}",
        state_digest(state),
        serde_json::to_string_pretty(fingerprint).unwrap_or_default(),
    );
    (system, user)
}

/// Act-boundary validation.
pub fn act_validation(state: &NarrativeState, quick_issues: &[String]) -> (String, String) {
    let system = "You validate act structure for a narrative engine. Judge whether \
                  the act delivered its goal and earned its costs. If not, order a \
                  tail regeneration with concrete constraints. You respond only \
                  with JSON."
        .to_string();
    let mut user = format!(
        "{}\n# Task\nValidate act {} at its boundary.\n",
        state_digest(state),
        state.act_state.act_index,
    );
    push_issues(&mut user, quick_issues);
    (system, user)
}

/// Book-boundary validation.
pub fn book_validation(state: &NarrativeState, quick_issues: &[String]) -> (String, String) {
    let system = "You validate a completed book for a narrative engine. Score overall \
                  quality 0-100 and judge the ending: the costs must be real, the \
                  anchor must hold. If the ending fails, order a final-tail \
                  regeneration with concrete constraints. You respond only with JSON."
        .to_string();
    let mut user = format!("{}\n# Task\nValidate the completed book.\n", state_digest(state));
    push_issues(&mut user, quick_issues);
    (system, user)
}

fn push_issues(user: &mut String, quick_issues: &[String]) {
    if !quick_issues.is_empty() {
        user.push_str("\n# Structural issues already detected\n");
        for issue in quick_issues {
            user.push_str(&format!("- {issue}\n"));
        }
    }
}

/// Ending-anchor extraction.
pub fn ending_anchor(state: &NarrativeState) -> (String, String) {
    let system = "You distill endings for a narrative engine. Produce exactly two \
                  lines:\nANCHOR: one declarative sentence, at most 240 characters, \
                  no em-dash, no ellipsis, stating what understanding cost whom.\n\
                  COST: one short phrase naming the epistemic cost."
        .to_string();
    let user = state_digest(state);
    (system, user)
}
