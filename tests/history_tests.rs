use pscue::history::CommandHistory;
use pscue::ingestor::{FeedbackEvent, FeedbackIngestor};
use pscue::knowledge_graph::KnowledgeGraph;
use pscue::privacy::PrivacyFilter;
use pscue::sequence::SequencePredictor;
use pscue::workflow::WorkflowLearner;
use std::sync::Arc;

fn event(command_line: &str, success: bool, cwd: &str) -> FeedbackEvent {
    FeedbackEvent {
        command_line: command_line.to_string(),
        success,
        current_working_directory: cwd.to_string(),
        previous_working_directory: cwd.to_string(),
    }
}

fn ingestor() -> (Arc<CommandHistory>, FeedbackIngestor) {
    let history = Arc::new(CommandHistory::new(50));
    let kg = Arc::new(KnowledgeGraph::new(Default::default()));
    let workflow = Arc::new(WorkflowLearner::new(Default::default()));
    let sequence = Arc::new(SequencePredictor::new(Default::default()));
    let ingestor = FeedbackIngestor::new(
        PrivacyFilter::new(&[]),
        history.clone(),
        kg,
        workflow,
        sequence,
    );
    (history, ingestor)
}

#[tokio::test]
async fn successful_commands_land_in_history() {
    let (history, ingestor) = ingestor();
    ingestor.ingest(event("git status", true, "/tmp")).await;
    ingestor.ingest(event("git commit -m fix", true, "/tmp")).await;

    let all = history.all().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].command, "git");
    assert_eq!(all[0].full_line, "git commit -m fix");
}

#[tokio::test]
async fn failed_commands_never_reach_history() {
    let (history, ingestor) = ingestor();
    ingestor.ingest(event("rm -rf /nonexistent", false, "/tmp")).await;

    assert!(history.is_empty().await);
}

#[tokio::test]
async fn blocked_patterns_never_reach_history() {
    let history = Arc::new(CommandHistory::new(50));
    let kg = Arc::new(KnowledgeGraph::new(Default::default()));
    let workflow = Arc::new(WorkflowLearner::new(Default::default()));
    let sequence = Arc::new(SequencePredictor::new(Default::default()));
    let ingestor = FeedbackIngestor::new(
        PrivacyFilter::new(&["password".to_string()]),
        history.clone(),
        kg,
        workflow,
        sequence,
    );

    ingestor
        .ingest(event("export DB_PASSWORD=hunter2", true, "/tmp"))
        .await;

    assert!(history.is_empty().await);
}
