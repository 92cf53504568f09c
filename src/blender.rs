//! Merges hand-authored completion trees with learned suggestions and
//! composes the final inline-prediction text under a strict latency
//! budget.
//!
//! The "combine" composition rule is grounded in the teacher's
//! `FilesystemProvider::build_suggestion_text` (replace-last-word-with-
//! suffix logic), generalized to the four cases this component requires.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::generic_predictor::{GenericPredictor, GenericPredictorRequest};
use crate::pcd::PcdEngine;
use crate::knowledge_graph::is_navigation_command;

pub const INLINE_BUDGET: Duration = Duration::from_millis(20);

/// Hand-authored, per-tool completion trees. Out of core scope; the core
/// only depends on this trait as a collaborator.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, command: &str, word_to_complete: &str) -> Vec<String>;
}

/// Trivial in-memory fixture used by tests; no first-party provider ships
/// beyond this.
pub struct NullCompletionProvider;

#[async_trait]
impl CompletionProvider for NullCompletionProvider {
    async fn complete(&self, _command: &str, _word_to_complete: &str) -> Vec<String> {
        Vec::new()
    }
}

pub struct PredictorBlender<P: CompletionProvider> {
    known: P,
    generic: GenericPredictor,
    pcd: Option<Arc<PcdEngine>>,
}

impl<P: CompletionProvider> PredictorBlender<P> {
    pub fn new(known: P, generic: GenericPredictor, pcd: Option<Arc<PcdEngine>>) -> Self {
        Self { known, generic, pcd }
    }

    /// Produces the final inline suggestion text for `input`, or `None` if
    /// no candidate qualifies or the latency budget is exceeded.
    pub async fn get_suggestion(&self, input: &str, current_directory: &str) -> Option<String> {
        let start = Instant::now();
        let command = first_token(input)?;

        if is_navigation_command(&command) {
            if let Some(pcd) = &self.pcd {
                let query = last_word(input);
                let results = pcd.best_match(&query, current_directory, 1).await;
                return results.into_iter().next().map(|r| combine(input, &r.path));
            }
        }

        let known_candidates = self.known.complete(&command, &last_word(input)).await;
        if let Some(best) = known_candidates.first() {
            return Some(combine(input, best));
        }

        if start.elapsed() > INLINE_BUDGET {
            return None;
        }

        let word = last_word(input);
        let req = GenericPredictorRequest {
            command: &command,
            full_line: input,
            word_to_complete: &word,
            cursor_position: input.len(),
        };
        let learned = self.generic.predict(&req).await;

        if start.elapsed() > INLINE_BUDGET {
            return None;
        }

        learned.first().map(|s| combine(input, &s.text))
    }
}

fn first_token(input: &str) -> Option<String> {
    input.split_whitespace().next().map(|s| s.to_string())
}

fn last_word(input: &str) -> String {
    if input.ends_with(' ') || input.is_empty() {
        String::new()
    } else {
        input.split_whitespace().last().unwrap_or("").to_string()
    }
}

fn looks_like_absolute_path(s: &str) -> bool {
    s.starts_with('/')
        || s.starts_with("\\\\")
        || (s.len() >= 2 && s.as_bytes()[1] == b':' && s.as_bytes()[0].is_ascii_alphabetic())
}

/// Joins `input` with `candidate` per the combine contract:
/// - candidate prefix-matches the last word → replace last word.
/// - candidate looks like an absolute path → replace last word.
/// - candidate is multi-word and its first word prefix-matches the last
///   word → replace last word with the whole candidate.
/// - otherwise → append with a separating space.
pub fn combine(input: &str, candidate: &str) -> String {
    let last = last_word(input);
    let prefix_len = input.len() - last.len();
    let stem = &input[..prefix_len];

    if looks_like_absolute_path(candidate) {
        return format!("{stem}{candidate}");
    }

    if !last.is_empty() && candidate.to_lowercase().starts_with(&last.to_lowercase()) {
        return format!("{stem}{candidate}");
    }

    if let Some(first_word) = candidate.split_whitespace().next() {
        if !last.is_empty() && first_word.to_lowercase().starts_with(&last.to_lowercase()) && candidate.contains(' ') {
            return format!("{stem}{candidate}");
        }
    }

    if input.is_empty() || input.ends_with(' ') {
        format!("{input}{candidate}")
    } else {
        format!("{input} {candidate}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_last_word_on_prefix_match() {
        assert_eq!(combine("git che", "checkout"), "git checkout");
    }

    #[test]
    fn appends_with_space_when_no_overlap() {
        assert_eq!(combine("git ", "status"), "git status");
    }

    #[test]
    fn replaces_last_word_for_absolute_path() {
        assert_eq!(combine("cd dot", "D:\\source\\dd-trace-dotnet\\"), "cd D:\\source\\dd-trace-dotnet\\");
    }

    #[test]
    fn multi_word_candidate_replaces_last_word_with_whole_candidate() {
        assert_eq!(combine("git che", "checkout master"), "git checkout master");
    }

    #[test]
    fn never_produces_character_level_merges() {
        assert_eq!(combine("claude plugin", "install"), "claude plugin install");
    }
}
