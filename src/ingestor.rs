//! Orchestrates the token parser, privacy filter, and learning stores
//! after each executed command.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::history::{CommandHistory, HistoryEntry};
use crate::knowledge_graph::{is_navigation_command, ArgToken, KnowledgeGraph};
use crate::persistence::Persistence;
use crate::privacy::PrivacyFilter;
use crate::sequence::SequencePredictor;
use crate::tokenizer::{self, Token};
use crate::workflow::{self, WorkflowLearner};

/// A feedback event delivered by the shell after a command finishes.
pub struct FeedbackEvent {
    pub command_line: String,
    pub success: bool,
    pub current_working_directory: String,
    pub previous_working_directory: String,
}

/// Serializes learning events behind a single writer, per the spec's
/// concurrency model: history push happens-before graph/workflow/ngram
/// updates within one event.
pub struct FeedbackIngestor {
    privacy: PrivacyFilter,
    history: Arc<CommandHistory>,
    knowledge_graph: Arc<KnowledgeGraph>,
    workflow: Arc<WorkflowLearner>,
    sequence: Arc<SequencePredictor>,
    persistence: Arc<Persistence>,
    last_event_time: Mutex<Option<chrono::DateTime<Utc>>>,
    last_canonical: Mutex<Option<String>>,
}

fn tokens_to_args(tokens: &[Token]) -> Vec<ArgToken> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Flag(name) => out.push(ArgToken::Flag(name.clone())),
            Token::Parameter(name) => {
                if let Some(Token::ParameterValue(value)) = tokens.get(i + 1) {
                    out.push(ArgToken::Parameter(name.clone(), value.clone()));
                    i += 1;
                } else {
                    out.push(ArgToken::Flag(name.clone()));
                }
            }
            Token::Standalone(s) => out.push(ArgToken::Standalone(s.clone())),
            Token::ParameterValue(_) | Token::Verb(_) => {}
        }
        i += 1;
    }
    out
}

fn arg_texts(args: &[ArgToken]) -> Vec<String> {
    args.iter()
        .map(|a| match a {
            ArgToken::Flag(f) => f.clone(),
            ArgToken::Parameter(name, _) => name.clone(),
            ArgToken::Standalone(s) => s.clone(),
        })
        .collect()
}

impl FeedbackIngestor {
    pub fn new(
        privacy: PrivacyFilter,
        history: Arc<CommandHistory>,
        knowledge_graph: Arc<KnowledgeGraph>,
        workflow: Arc<WorkflowLearner>,
        sequence: Arc<SequencePredictor>,
        persistence: Arc<Persistence>,
    ) -> Self {
        Self {
            privacy,
            history,
            knowledge_graph,
            workflow,
            sequence,
            persistence,
            last_event_time: Mutex::new(None),
            last_canonical: Mutex::new(None),
        }
    }

    pub async fn ingest(&self, event: FeedbackEvent) {
        if !event.success {
            return;
        }
        if !self.privacy.allows(&event.command_line) {
            return;
        }
        let Ok(tokens) = tokenizer::tokenize(&event.command_line) else {
            return;
        };
        let Some(Token::Verb(command)) = tokens.first().cloned() else {
            return;
        };

        let mut args = tokens_to_args(&tokens[1..]);
        let navigation = is_navigation_command(&command);
        if navigation {
            // Exactly one navigation argument is recorded per event: the
            // actual post-execution destination, not the text typed.
            args = vec![ArgToken::Standalone(event.current_working_directory.clone())];
        }

        let now = Utc::now();
        let mut last_event_time = self.last_event_time.lock().await;
        let delta_ms = last_event_time
            .map(|t| (now - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        *last_event_time = Some(now);
        drop(last_event_time);

        let entry = HistoryEntry {
            command: command.clone(),
            full_line: event.command_line.clone(),
            arguments: arg_texts(&args),
            timestamp: now,
            working_directory: Some(event.previous_working_directory.clone()),
        };
        self.history.add(entry.clone()).await;
        if let Err(e) = self.persistence.append_history(&[entry]).await {
            tracing::warn!("failed to persist history entry: {e}");
        }

        self.knowledge_graph
            .record_usage(&command, &args, Some(&event.previous_working_directory))
            .await;

        let arg_texts_for_canon = arg_texts(&args);
        let canonical = workflow::canonicalize(&command, &arg_texts_for_canon);

        let mut last_canonical = self.last_canonical.lock().await;
        if let Some(prev) = last_canonical.clone() {
            self.workflow.record_transition(&prev, &canonical, delta_ms).await;
            self.sequence.record(&prev, &canonical, None).await;
        }
        *last_canonical = Some(canonical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeGraphConfig, PersistenceConfig, SequenceConfig, WorkflowConfig};

    // Leaked so the temp directory outlives the test's `Persistence` handle
    // without threading a guard through every call site; tests are
    // short-lived processes so this is not a real leak concern.
    fn ingestor() -> FeedbackIngestor {
        let dir = Box::leak(Box::new(tempfile::tempdir().unwrap()));
        let db_path = dir.path().join("learned-data.db");
        let persistence = Arc::new(
            Persistence::open(
                &db_path,
                &PersistenceConfig { data_dir: None, busy_timeout_ms: 2000, auto_save_interval_secs: 300 },
            )
            .unwrap(),
        );

        FeedbackIngestor::new(
            PrivacyFilter::new(&[]),
            Arc::new(CommandHistory::new(100)),
            Arc::new(KnowledgeGraph::new(KnowledgeGraphConfig {
                max_commands: 500,
                max_args_per_cmd: 100,
                decay_days: 30.0,
            })),
            Arc::new(WorkflowLearner::new(WorkflowConfig {
                workflow_learning: true,
                workflow_min_frequency: 1,
                workflow_max_time_delta_minutes: 15,
                workflow_min_confidence: 0.0,
            })),
            Arc::new(SequencePredictor::new(SequenceConfig {
                ml_enabled: true,
                ml_ngram_order: 2,
                ml_ngram_min_freq: 1,
            })),
            persistence,
        )
    }

    #[tokio::test]
    async fn failed_commands_are_not_learned() {
        let ingestor = ingestor();
        ingestor
            .ingest(FeedbackEvent {
                command_line: "git push".into(),
                success: false,
                current_working_directory: "/repo".into(),
                previous_working_directory: "/repo".into(),
            })
            .await;
        assert!(ingestor.knowledge_graph.get_tracked_commands().await.is_empty());
    }

    #[tokio::test]
    async fn privacy_rejected_commands_are_not_learned() {
        let ingestor = ingestor();
        ingestor
            .ingest(FeedbackEvent {
                command_line: "export API_KEY=sk_abc".into(),
                success: true,
                current_working_directory: "/repo".into(),
                previous_working_directory: "/repo".into(),
            })
            .await;
        assert!(ingestor.knowledge_graph.get_tracked_commands().await.is_empty());
    }

    #[tokio::test]
    async fn scenario_a_learn_then_predict_transitions() {
        let ingestor = ingestor();
        ingestor
            .ingest(FeedbackEvent {
                command_line: "git add .".into(),
                success: true,
                current_working_directory: "/repo".into(),
                previous_working_directory: "/repo".into(),
            })
            .await;
        ingestor
            .ingest(FeedbackEvent {
                command_line: r#"git commit -m "fix""#.into(),
                success: true,
                current_working_directory: "/repo".into(),
                previous_working_directory: "/repo".into(),
            })
            .await;
        ingestor
            .ingest(FeedbackEvent {
                command_line: "git push".into(),
                success: true,
                current_working_directory: "/repo".into(),
                previous_working_directory: "/repo".into(),
            })
            .await;

        let tracked = ingestor.knowledge_graph.get_tracked_commands().await;
        assert!(tracked.contains(&"git".to_string()));

        let recent_history = ingestor.history.recent(20).await;
        let predictions = ingestor.workflow.predict_next("git add", &recent_history).await;
        assert_eq!(predictions[0].command, "git commit");
    }
}
