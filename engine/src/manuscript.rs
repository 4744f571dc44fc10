//! The manuscript — ordered accepted scenes.
//!
//! The manuscript is never fed back into prompts; it exists for output and
//! for tail truncation during validator-ordered regeneration. Word counts
//! here are the ground truth `structure.words_written` must track.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::word_count;

/// One accepted scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub id: String,
    pub act: u32,
    /// Global chapter index.
    pub chapter: u32,
    pub scene: u32,
    pub title: String,
    pub pov: String,
    pub text: String,
    pub word_count: u64,
}

impl SceneRecord {
    pub fn new(
        id: &str,
        act: u32,
        chapter: u32,
        scene: u32,
        title: &str,
        pov: &str,
        text: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            act,
            chapter,
            scene,
            title: title.to_string(),
            pov: pov.to_string(),
            text: text.to_string(),
            word_count: word_count(text),
        }
    }
}

/// Manuscript operations that cannot proceed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManuscriptError {
    #[error("cannot merge into an empty manuscript")]
    Empty,
    #[error("merge would shrink the manuscript by {0} words")]
    MergeShrinks(u64),
}

/// The ordered accepted scenes plus notes about dropped drafts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manuscript {
    pub scenes: Vec<SceneRecord>,
    pub dropped_notes: Vec<String>,
}

impl Manuscript {
    pub fn push(&mut self, scene: SceneRecord) {
        self.scenes.push(scene);
    }

    pub fn total_words(&self) -> u64 {
        self.scenes.iter().map(|s| s.word_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Merge text into the previous accepted scene: the scene's final
    /// paragraph is replaced by the merged text. Returns the word delta,
    /// which must be positive to preserve monotonic word counts.
    pub fn merge_into_last(&mut self, text: &str) -> Result<u64, ManuscriptError> {
        let last = self.scenes.last_mut().ok_or(ManuscriptError::Empty)?;
        let before = last.word_count;

        let retained = match last.text.rfind("\n\n") {
            Some(idx) => last.text[..idx].to_string(),
            None => last.text.clone(),
        };
        let merged = format!("{}\n\n{}", retained, text.trim());
        let after = word_count(&merged);

        if after <= before {
            return Err(ManuscriptError::MergeShrinks(before - after));
        }
        last.text = merged;
        last.word_count = after;
        Ok(after - before)
    }

    /// Remove whole scenes from the tail until at least `target` words are
    /// gone (or the manuscript is empty). Returns the words removed.
    pub fn truncate_tail_words(&mut self, target: u64) -> u64 {
        let mut removed = 0;
        while removed < target {
            match self.scenes.pop() {
                Some(scene) => removed += scene.word_count,
                None => break,
            }
        }
        removed
    }

    /// Remove every scene belonging to the last chapter present. Returns
    /// the words removed.
    pub fn truncate_last_chapter(&mut self) -> u64 {
        let Some(last_chapter) = self.scenes.last().map(|s| s.chapter) else {
            return 0;
        };
        let mut removed = 0;
        while let Some(scene) = self.scenes.last() {
            if scene.chapter != last_chapter {
                break;
            }
            removed += self.scenes.pop().map(|s| s.word_count).unwrap_or(0);
        }
        removed
    }

    /// Words contributed by scenes of the given act.
    pub fn act_words(&self, act: u32) -> u64 {
        self.scenes
            .iter()
            .filter(|s| s.act == act)
            .map(|s| s.word_count)
            .sum()
    }

    /// Note a dropped draft for later briefs.
    pub fn note_dropped(&mut self, note: impl Into<String>) {
        self.dropped_notes.push(note.into());
    }

    /// Render the manuscript as markdown, one heading per scene.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let mut current_chapter = 0;
        for scene in &self.scenes {
            if scene.chapter != current_chapter {
                current_chapter = scene.chapter;
                out.push_str(&format!("\n# Chapter {}\n\n", scene.chapter));
            }
            out.push_str(&format!("## {}\n\n{}\n\n", scene.title, scene.text));
        }
        out.trim_start().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str, act: u32, chapter: u32, scene_idx: u32, words: usize) -> SceneRecord {
        let text = (0..words)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        SceneRecord::new(id, act, chapter, scene_idx, "Scene", "Mara", &text)
    }

    #[test]
    fn test_total_words_tracks_scenes() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 1_000));
        m.push(scene("ch1_s2", 1, 1, 2, 1_200));
        assert_eq!(m.total_words(), 2_200);
    }

    #[test]
    fn test_merge_replaces_final_paragraph() {
        let mut m = Manuscript::default();
        let mut s = scene("ch1_s1", 1, 1, 1, 0);
        s.text = "First paragraph here.\n\nSecond trailing paragraph.".to_string();
        s.word_count = word_count(&s.text);
        let before = s.word_count;
        m.push(s);

        let addition = "A much longer closing paragraph that carries the merged scene \
                        forward with enough words to grow the total.";
        let delta = m.merge_into_last(addition).unwrap();
        assert_eq!(m.total_words(), before + delta);
        assert!(m.scenes[0].text.starts_with("First paragraph here."));
        assert!(m.scenes[0].text.ends_with("grow the total."));
        assert!(!m.scenes[0].text.contains("Second trailing paragraph."));
    }

    #[test]
    fn test_merge_into_empty_fails() {
        let mut m = Manuscript::default();
        assert_eq!(m.merge_into_last("text").unwrap_err(), ManuscriptError::Empty);
    }

    #[test]
    fn test_merge_that_shrinks_fails() {
        let mut m = Manuscript::default();
        let mut s = scene("ch1_s1", 1, 1, 1, 0);
        s.text = "Opening paragraph stands.\n\nA long trailing paragraph with many many words to lose."
            .to_string();
        s.word_count = word_count(&s.text);
        m.push(s);
        let err = m.merge_into_last("tiny").unwrap_err();
        assert!(matches!(err, ManuscriptError::MergeShrinks(_)));
    }

    #[test]
    fn test_truncate_tail_words_removes_whole_scenes() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 1_000));
        m.push(scene("ch1_s2", 1, 1, 2, 1_000));
        m.push(scene("ch1_s3", 1, 1, 3, 1_000));
        let removed = m.truncate_tail_words(1_500);
        assert_eq!(removed, 2_000);
        assert_eq!(m.scenes.len(), 1);
        assert_eq!(m.total_words(), 1_000);
    }

    #[test]
    fn test_truncate_more_than_available() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 500));
        let removed = m.truncate_tail_words(5_000);
        assert_eq!(removed, 500);
        assert!(m.is_empty());
    }

    #[test]
    fn test_truncate_last_chapter() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 1_000));
        m.push(scene("ch2_s1", 1, 2, 1, 1_100));
        m.push(scene("ch2_s2", 1, 2, 2, 1_200));
        let removed = m.truncate_last_chapter();
        assert_eq!(removed, 2_300);
        assert_eq!(m.scenes.len(), 1);
        assert_eq!(m.scenes[0].chapter, 1);
    }

    #[test]
    fn test_act_words() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 1_000));
        m.push(scene("ch4_s1", 2, 4, 1, 1_300));
        assert_eq!(m.act_words(1), 1_000);
        assert_eq!(m.act_words(2), 1_300);
        assert_eq!(m.act_words(3), 0);
    }

    #[test]
    fn test_render_markdown_groups_chapters() {
        let mut m = Manuscript::default();
        m.push(scene("ch1_s1", 1, 1, 1, 5));
        m.push(scene("ch2_s1", 1, 2, 1, 5));
        let md = m.render_markdown();
        assert!(md.contains("# Chapter 1"));
        assert!(md.contains("# Chapter 2"));
    }
}
