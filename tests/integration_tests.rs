use assert_cmd::cargo::cargo_bin_cmd;
use pscue::blender::{NullCompletionProvider, PredictorBlender};
use pscue::config::Config;
use pscue::generic_predictor::GenericPredictor;
use pscue::ingestor::{FeedbackEvent, FeedbackIngestor};
use pscue::lifecycle::ModuleLifecycle;
use pscue::pcd::PcdEngine;
use pscue::privacy::PrivacyFilter;
use std::sync::Arc;

#[test]
fn cli_help_runs() {
    cargo_bin_cmd!("pscue").arg("--help").assert().success();
}

fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.persistence.data_dir = Some(data_dir.to_string_lossy().to_string());
    config.persistence.auto_save_interval_secs = 3600;
    config
}

/// Scenario: a command is learned, then a later inline prediction for the
/// same command+cwd surfaces it, and the engine persists it across a
/// restart.
#[tokio::test]
async fn learned_command_survives_restart_and_drives_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = Arc::new(ModuleLifecycle::new());
    let engine = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();

    let ingestor = FeedbackIngestor::new(
        PrivacyFilter::new(&[]),
        engine.history.clone(),
        engine.knowledge_graph.clone(),
        engine.workflow.clone(),
        engine.sequence.clone(),
        engine.persistence.clone(),
    );

    for _ in 0..3 {
        ingestor
            .ingest(FeedbackEvent {
                command_line: "git status".to_string(),
                success: true,
                current_working_directory: "/repo".to_string(),
                previous_working_directory: "/repo".to_string(),
            })
            .await;
    }

    let generic = GenericPredictor::new(
        engine.knowledge_graph.clone(),
        engine.workflow.clone(),
        engine.sequence.clone(),
        engine.history.clone(),
    );
    let blender = PredictorBlender::new(NullCompletionProvider, generic, None);

    let suggestion = blender.get_suggestion("git st", "/repo").await;
    assert_eq!(suggestion.as_deref(), Some("git status"));

    lifecycle.on_shutdown().await.unwrap();

    let lifecycle2 = Arc::new(ModuleLifecycle::new());
    let engine2 = lifecycle2.on_init_with_config(test_config(dir.path())).await.unwrap();
    let tracked = engine2.knowledge_graph.get_tracked_commands().await;
    assert!(tracked.contains(&"git".to_string()));
    lifecycle2.on_shutdown().await.unwrap();
}

/// Scenario: navigation history feeds the PCD engine, which ranks an
/// exact directory-name match over an unrelated sibling.
#[tokio::test]
async fn navigation_history_drives_pcd_suggestions() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = Arc::new(ModuleLifecycle::new());
    let engine = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();

    let repo_dir = dir.path().join("workspace").join("dd-trace-dotnet");
    std::fs::create_dir_all(&repo_dir).unwrap();
    std::fs::create_dir_all(dir.path().join("workspace").join("dd-trace-js")).unwrap();

    let ingestor = FeedbackIngestor::new(
        PrivacyFilter::new(&[]),
        engine.history.clone(),
        engine.knowledge_graph.clone(),
        engine.workflow.clone(),
        engine.sequence.clone(),
        engine.persistence.clone(),
    );
    ingestor
        .ingest(FeedbackEvent {
            command_line: format!("cd {}", repo_dir.display()),
            success: true,
            current_working_directory: dir.path().join("workspace").to_string_lossy().to_string(),
            previous_working_directory: dir.path().to_string_lossy().to_string(),
        })
        .await;

    let pcd = PcdEngine::new(engine.config.pcd.clone(), engine.knowledge_graph.clone());
    let results = pcd.best_match("dd-trace-dotnet", "/somewhere/else", 5).await;
    assert!(!results.is_empty());
    assert!(results[0].path.contains("dd-trace-dotnet"));

    lifecycle.on_shutdown().await.unwrap();
}

/// Scenario: duplicate `on_init` calls against a running engine are a
/// silent no-op and return the same instance.
#[tokio::test]
async fn duplicate_init_returns_same_engine() {
    let dir = tempfile::tempdir().unwrap();
    let lifecycle = ModuleLifecycle::new();
    let engine_a = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();
    let engine_b = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();
    assert!(Arc::ptr_eq(&engine_a, &engine_b));
    lifecycle.on_shutdown().await.unwrap();
}
