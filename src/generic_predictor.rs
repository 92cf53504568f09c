//! Ranked suggestions from the knowledge graph, workflow learner, and
//! sequence predictor, with the partial-word filter applied.

use std::collections::HashMap;
use std::sync::Arc;

use crate::history::CommandHistory;
use crate::knowledge_graph::KnowledgeGraph;
use crate::sequence::SequencePredictor;
use crate::workflow::{self, WorkflowLearner};

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionKind {
    Argument,
    Flag,
    NextCommand,
}

#[derive(Debug, Clone)]
pub struct GenericSuggestion {
    pub text: String,
    pub score: f64,
    pub description: Option<String>,
    pub kind: SuggestionKind,
}

pub struct GenericPredictorRequest<'a> {
    pub command: &'a str,
    pub full_line: &'a str,
    pub word_to_complete: &'a str,
    pub cursor_position: usize,
}

pub struct GenericPredictor {
    knowledge_graph: Arc<KnowledgeGraph>,
    workflow: Arc<WorkflowLearner>,
    sequence: Arc<SequencePredictor>,
    history: Arc<CommandHistory>,
}

impl GenericPredictor {
    pub fn new(
        knowledge_graph: Arc<KnowledgeGraph>,
        workflow: Arc<WorkflowLearner>,
        sequence: Arc<SequencePredictor>,
        history: Arc<CommandHistory>,
    ) -> Self {
        Self {
            knowledge_graph,
            workflow,
            sequence,
            history,
        }
    }

    pub async fn predict(&self, req: &GenericPredictorRequest<'_>) -> Vec<GenericSuggestion> {
        let mut candidates: HashMap<String, GenericSuggestion> = HashMap::new();

        if req.full_line.trim() == req.command.trim() && !req.full_line.ends_with(' ') {
            // Just a command with no args yet: whole next-command suggestions.
            let canonical = req.command.to_string();
            let recent_history = self.history.recent(20).await;
            for prediction in self.workflow.predict_next(&canonical, &recent_history).await {
                upsert_max(
                    &mut candidates,
                    GenericSuggestion {
                        text: prediction.command,
                        score: prediction.confidence,
                        description: Some(prediction.reason),
                        kind: SuggestionKind::NextCommand,
                    },
                );
            }
            for (command, freq) in self.sequence.predict(&canonical, None).await {
                upsert_max(
                    &mut candidates,
                    GenericSuggestion {
                        text: command,
                        score: (freq as f64).ln_1p() / 10.0,
                        description: None,
                        kind: SuggestionKind::NextCommand,
                    },
                );
            }
        }

        let single_word = self
            .knowledge_graph
            .get_suggestions(req.command, &[], req.word_to_complete)
            .await;

        let mut top_five: Vec<&crate::knowledge_graph::Suggestion> = single_word.iter().take(5).collect();
        top_five.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

        for suggestion in &single_word {
            upsert_max(
                &mut candidates,
                GenericSuggestion {
                    text: suggestion.argument.clone(),
                    score: suggestion.score,
                    description: None,
                    kind: if suggestion.is_flag { SuggestionKind::Flag } else { SuggestionKind::Argument },
                },
            );
        }

        for base in top_five {
            let sequences = self
                .knowledge_graph
                .get_sequences_starting_with(req.command, &base.argument, 50)
                .await;
            for (second, score) in sequences.into_iter().filter(|(_, s)| *s > 0.0) {
                let combined = format!("{} {second}", base.argument);
                upsert_max(
                    &mut candidates,
                    GenericSuggestion {
                        text: combined,
                        score: base.score * 0.95 * (1.0 + score).min(1.0),
                        description: None,
                        kind: SuggestionKind::Argument,
                    },
                );
            }
        }

        // Recency/context boosts from the last 3 commands.
        let recent = self.history.recent(3).await;
        for entry in &recent {
            if entry.command.eq_ignore_ascii_case(req.command) {
                for arg in &entry.arguments {
                    if let Some(c) = candidates.get_mut(arg) {
                        let boost = if arg.starts_with('-') { 1.15 } else { 1.2 };
                        c.score *= boost;
                    }
                }
            }
        }

        let needle = req.word_to_complete.to_lowercase();
        let mut out: Vec<GenericSuggestion> = candidates
            .into_values()
            .filter(|c| c.text.to_lowercase().starts_with(&needle))
            .collect();

        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| b.text.len().cmp(&a.text.len()))
                .then_with(|| a.text.cmp(&b.text))
        });

        let _ = req.cursor_position;
        out
    }
}

fn upsert_max(map: &mut HashMap<String, GenericSuggestion>, candidate: GenericSuggestion) {
    map.entry(candidate.text.clone())
        .and_modify(|existing| {
            if candidate.score > existing.score {
                *existing = candidate.clone();
            }
        })
        .or_insert(candidate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeGraphConfig, SequenceConfig, WorkflowConfig};
    use crate::knowledge_graph::ArgToken;

    async fn fixture() -> GenericPredictor {
        let kg = Arc::new(KnowledgeGraph::new(KnowledgeGraphConfig {
            max_commands: 500,
            max_args_per_cmd: 100,
            decay_days: 30.0,
        }));
        kg.record_usage("git", &[ArgToken::Standalone("commit".into())], None).await;
        kg.record_usage("git", &[ArgToken::Standalone("checkout".into())], None).await;

        let workflow = Arc::new(WorkflowLearner::new(WorkflowConfig {
            workflow_learning: true,
            workflow_min_frequency: 1,
            workflow_max_time_delta_minutes: 15,
            workflow_min_confidence: 0.0,
        }));
        let sequence = Arc::new(SequencePredictor::new(SequenceConfig {
            ml_enabled: true,
            ml_ngram_order: 2,
            ml_ngram_min_freq: 1,
        }));
        let history = Arc::new(CommandHistory::new(100));

        GenericPredictor::new(kg, workflow, sequence, history)
    }

    #[tokio::test]
    async fn suggestions_only_start_with_word_to_complete() {
        let predictor = fixture().await;
        let req = GenericPredictorRequest {
            command: "git",
            full_line: "git c",
            word_to_complete: "c",
            cursor_position: 5,
        };
        let suggestions = predictor.predict(&req).await;
        assert!(suggestions.iter().all(|s| s.text.to_lowercase().starts_with('c')));
        assert!(suggestions.iter().any(|s| s.text == "commit"));
        assert!(suggestions.iter().any(|s| s.text == "checkout"));
    }
}
