//! Fixture builders shared across unit and integration tests.
//!
//! Grounded in the teacher's `test_helpers.rs` (`make_suggest_request`/
//! `make_provider_request`), generalized from a single-shot HTTP-style
//! request fixture to the event/component fixtures this crate's
//! components take.

use std::sync::Arc;

use crate::config::{KnowledgeGraphConfig, SequenceConfig, WorkflowConfig};
use crate::history::CommandHistory;
use crate::ingestor::{FeedbackEvent, FeedbackIngestor};
use crate::knowledge_graph::KnowledgeGraph;
use crate::privacy::PrivacyFilter;
use crate::sequence::SequencePredictor;
use crate::workflow::WorkflowLearner;

pub fn make_feedback_event(command_line: &str, cwd: &str) -> FeedbackEvent {
    FeedbackEvent {
        command_line: command_line.to_string(),
        success: true,
        current_working_directory: cwd.to_string(),
        previous_working_directory: cwd.to_string(),
    }
}

pub fn make_failed_feedback_event(command_line: &str, cwd: &str) -> FeedbackEvent {
    FeedbackEvent {
        success: false,
        ..make_feedback_event(command_line, cwd)
    }
}

/// Permissive defaults: no caps, no confidence floor, learning never
/// skipped — useful whenever a test only wants to exercise a code path
/// and not tune thresholds.
pub fn lenient_knowledge_graph_config() -> KnowledgeGraphConfig {
    KnowledgeGraphConfig {
        max_commands: 500,
        max_args_per_cmd: 100,
        decay_days: 30.0,
    }
}

pub fn lenient_workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        workflow_learning: true,
        workflow_min_frequency: 1,
        workflow_max_time_delta_minutes: 15,
        workflow_min_confidence: 0.0,
    }
}

pub fn lenient_sequence_config() -> SequenceConfig {
    SequenceConfig {
        ml_enabled: true,
        ml_ngram_order: 2,
        ml_ngram_min_freq: 1,
    }
}

pub struct Components {
    pub history: Arc<CommandHistory>,
    pub knowledge_graph: Arc<KnowledgeGraph>,
    pub workflow: Arc<WorkflowLearner>,
    pub sequence: Arc<SequencePredictor>,
}

pub fn lenient_components() -> Components {
    Components {
        history: Arc::new(CommandHistory::new(100)),
        knowledge_graph: Arc::new(KnowledgeGraph::new(lenient_knowledge_graph_config())),
        workflow: Arc::new(WorkflowLearner::new(lenient_workflow_config())),
        sequence: Arc::new(SequencePredictor::new(lenient_sequence_config())),
    }
}

pub fn lenient_ingestor() -> FeedbackIngestor {
    let c = lenient_components();
    FeedbackIngestor::new(PrivacyFilter::new(&[]), c.history, c.knowledge_graph, c.workflow, c.sequence)
}
