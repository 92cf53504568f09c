//! Startup/shutdown state machine owning `Persistence` and the learned
//! components built from it.
//!
//! Grounded in the teacher's `main.rs::start_daemon` sequencing (load
//! config → bind/init store → register → background timer → run →
//! shutdown flush), adapted from a Unix-socket daemon bootstrap to an
//! in-process engine lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::PscueError;
use crate::history::CommandHistory;
use crate::knowledge_graph::KnowledgeGraph;
use crate::persistence::Persistence;
use crate::sequence::SequencePredictor;
use crate::workflow::WorkflowLearner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    Draining,
    Closed,
}

/// The live component set a running engine wires together: C3–C6 plus the
/// store that backs them.
pub struct Engine {
    pub config: Config,
    pub history: Arc<CommandHistory>,
    pub knowledge_graph: Arc<KnowledgeGraph>,
    pub workflow: Arc<WorkflowLearner>,
    pub sequence: Arc<SequencePredictor>,
    pub persistence: Arc<Persistence>,
}

struct AutoSaveHandle {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

pub struct ModuleLifecycle {
    state: RwLock<LifecycleState>,
    engine: RwLock<Option<Arc<Engine>>>,
    auto_save: RwLock<Option<AutoSaveHandle>>,
}

impl Default for ModuleLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninitialized),
            engine: RwLock::new(None),
            auto_save: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Reads config, loads persisted state into C3–C6 (setting their
    /// baselines to the loaded values), and starts the auto-save timer.
    /// A repeat call while already past `Uninitialized` is a silent
    /// no-op that returns the existing engine handle, tolerating
    /// duplicate-init re-entrancy from the host.
    pub async fn on_init(&self) -> Result<Arc<Engine>, PscueError> {
        self.on_init_with_config(Config::load()).await
    }

    /// Same contract as [`on_init`](Self::on_init), but takes an
    /// already-loaded config instead of reading it from disk — used by
    /// embedders that own config loading themselves, and by tests that
    /// need a redirected data directory.
    pub async fn on_init_with_config(&self, config: Config) -> Result<Arc<Engine>, PscueError> {
        if *self.state.read().await != LifecycleState::Uninitialized {
            if let Some(engine) = self.engine.read().await.clone() {
                return Ok(engine);
            }
        }

        *self.state.write().await = LifecycleState::Initializing;

        let persistence = Arc::new(Persistence::open(&config.db_path(), &config.persistence)?);

        let knowledge_graph = Arc::new(KnowledgeGraph::new(config.knowledge_graph.clone()));
        let workflow = Arc::new(WorkflowLearner::new(config.workflow.clone()));
        let sequence = Arc::new(SequencePredictor::new(config.sequence.clone()));
        let history = Arc::new(CommandHistory::new(config.history.history_size));

        let loaded = persistence.load().await?;
        knowledge_graph.restore(loaded.knowledge_graph).await;
        workflow.restore(loaded.workflow).await;
        sequence.restore_bigrams(loaded.sequence).await;
        history.restore(loaded.history).await;

        let engine = Arc::new(Engine {
            config: config.clone(),
            history,
            knowledge_graph,
            workflow,
            sequence,
            persistence,
        });

        self.start_auto_save(engine.clone(), Duration::from_secs(config.persistence.auto_save_interval_secs))
            .await;

        *self.engine.write().await = Some(engine.clone());
        *self.state.write().await = LifecycleState::Running;
        tracing::info!("lifecycle: running, db={}", engine.persistence.path().display());

        Ok(engine)
    }

    async fn start_auto_save(&self, engine: Arc<Engine>, interval: Duration) {
        let token = CancellationToken::new();
        let child = token.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine
                            .persistence
                            .save(&engine.knowledge_graph, &engine.workflow, &engine.sequence)
                            .await
                        {
                            tracing::warn!("auto-save failed: {e}");
                        }
                    }
                }
            }
        });

        *self.auto_save.write().await = Some(AutoSaveHandle { token, join });
    }

    /// Stops the timer, performs a final synchronous save, and releases
    /// the engine handle. Idempotent: repeat calls after `Closed` are a
    /// no-op.
    pub async fn on_shutdown(&self) -> Result<(), PscueError> {
        if *self.state.read().await == LifecycleState::Closed {
            return Ok(());
        }
        *self.state.write().await = LifecycleState::Draining;

        if let Some(handle) = self.auto_save.write().await.take() {
            handle.token.cancel();
            let _ = handle.join.await;
        }

        if let Some(engine) = self.engine.read().await.clone() {
            engine
                .persistence
                .save(&engine.knowledge_graph, &engine.workflow, &engine.sequence)
                .await?;
        }

        *self.engine.write().await = None;
        *self.state.write().await = LifecycleState::Closed;
        tracing::info!("lifecycle: closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.persistence.data_dir = Some(dir.to_string_lossy().to_string());
        config.persistence.auto_save_interval_secs = 3600;
        config
    }

    #[tokio::test]
    async fn init_loads_then_running_then_shutdown_closes() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ModuleLifecycle::new();

        let engine = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Running);
        engine.knowledge_graph.record_usage("ls", &[], None).await;

        lifecycle.on_shutdown().await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Closed);

        // The final shutdown save must have persisted the recorded usage.
        let reopened = Persistence::open(&test_config(dir.path()).db_path(), &test_config(dir.path()).persistence).unwrap();
        let loaded = reopened.load().await.unwrap();
        assert_eq!(loaded.knowledge_graph["ls"].total_usage_count, 1);
    }

    #[tokio::test]
    async fn double_init_is_idempotent_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let lifecycle = ModuleLifecycle::new();

        let first = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();
        let second = lifecycle.on_init_with_config(test_config(dir.path())).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        lifecycle.on_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_init_is_a_no_op() {
        let lifecycle = ModuleLifecycle::new();
        // Never initialized: state stays Uninitialized, shutdown must not
        // panic on a missing engine.
        assert!(lifecycle.on_shutdown().await.is_ok());
        assert_eq!(lifecycle.state().await, LifecycleState::Closed);
    }
}
