//! Command-to-command transition graph with timing.
//!
//! Distinct from [`crate::sequence`]: this component adds timing and
//! subcommand canonicalization on top of bare adjacency. Both are fed from
//! the same ingestor event but serve different predictors.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::WorkflowConfig;
use crate::history::HistoryEntry;

/// Canonicalizes a command line's verb (+ subcommand, if the first
/// non-flag argument looks like one) into the key used by both the
/// workflow graph and the n-gram predictor, e.g. `"git commit -m x"` →
/// `"git commit"`.
pub fn canonicalize(command: &str, arguments: &[String]) -> String {
    let verb = command.trim();
    if verb.is_empty() {
        return String::new();
    }
    match arguments.iter().find(|a| !a.starts_with('-')) {
        Some(sub) => format!("{verb} {sub}"),
        None => verb.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowTransition {
    pub from_command: String,
    pub to_command: String,
    pub frequency: u64,
    pub total_time_delta_ms: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl WorkflowTransition {
    pub fn avg_delta_ms(&self) -> f64 {
        if self.frequency == 0 {
            0.0
        } else {
            self.total_time_delta_ms as f64 / self.frequency as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPrediction {
    pub command: String,
    pub confidence: f64,
    pub source_tag: &'static str,
    pub reason: String,
}

pub struct WorkflowLearner {
    config: WorkflowConfig,
    transitions: RwLock<HashMap<String, HashMap<String, WorkflowTransition>>>,
}

impl WorkflowLearner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self {
            config,
            transitions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_transition(&self, from: &str, to: &str, delta_ms: u64) {
        if from.is_empty() || to.is_empty() {
            return;
        }
        let max_delta_ms = self.config.workflow_max_time_delta_minutes * 60_000;
        if delta_ms > max_delta_ms {
            return;
        }
        if from == to && delta_ms < 1000 {
            return;
        }

        let now = Utc::now();
        let mut transitions = self.transitions.write().await;
        let outgoing = transitions.entry(from.to_string()).or_default();
        outgoing
            .entry(to.to_string())
            .and_modify(|t| {
                t.frequency += 1;
                t.total_time_delta_ms += delta_ms;
                t.last_used = now;
            })
            .or_insert(WorkflowTransition {
                from_command: from.to_string(),
                to_command: to.to_string(),
                frequency: 1,
                total_time_delta_ms: delta_ms,
                first_seen: now,
                last_used: now,
            });

        enforce_per_from_cap(outgoing, 20);
    }

    /// `recent_history` supplies the "actual" side of the time-sensitivity
    /// factor: the elapsed time since `current_command` was last actually
    /// run, which is compared against each transition's own average delta
    /// rather than against a fixed clock. Without a matching entry the
    /// factor falls back to the neutral bucket.
    pub async fn predict_next(
        &self,
        current_command: &str,
        recent_history: &[HistoryEntry],
    ) -> Vec<WorkflowPrediction> {
        let transitions = self.transitions.read().await;
        let Some(outgoing) = transitions.get(current_command) else {
            return Vec::new();
        };

        let max_freq = outgoing.values().map(|t| t.frequency).max().unwrap_or(1);
        let newest = outgoing.values().map(|t| t.last_used).max().unwrap_or_else(Utc::now);
        let oldest = outgoing.values().map(|t| t.last_used).min().unwrap_or_else(Utc::now);
        let span = (newest - oldest).num_seconds().max(1) as f64;

        let now = Utc::now();
        let actual_ms = recent_history
            .iter()
            .filter(|e| canonicalize(&e.command, &e.arguments) == current_command)
            .max_by_key(|e| e.timestamp)
            .map(|e| (now - e.timestamp).num_milliseconds().max(0) as f64);

        let mut out: Vec<WorkflowPrediction> = outgoing
            .values()
            .filter(|t| t.frequency >= self.config.workflow_min_frequency)
            .map(|t| {
                let freq_norm = t.frequency as f64 / max_freq as f64;
                let recency_norm = 1.0 - ((newest - t.last_used).num_seconds() as f64 / span).min(1.0);
                let base = 0.7 * freq_norm + 0.3 * recency_norm;

                let avg_ms = t.avg_delta_ms().max(1.0);
                // No matching history entry: treat it as a neutral-speed
                // repeat rather than either boosting or penalizing.
                let ratio = actual_ms.map(|a| a / avg_ms).unwrap_or(10.0);
                let multiplier = if ratio < 1.5 {
                    1.5
                } else if ratio < 5.0 {
                    1.2
                } else if ratio < 30.0 {
                    1.0
                } else {
                    0.8
                };

                WorkflowPrediction {
                    command: t.to_command.clone(),
                    confidence: (base * multiplier).min(1.0),
                    source_tag: "workflow",
                    reason: format!(
                        "followed {} {} times, avg {:.0}s later",
                        t.from_command,
                        t.frequency,
                        avg_ms / 1000.0
                    ),
                }
            })
            .filter(|p| p.confidence >= self.config.workflow_min_confidence)
            .collect();

        out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        out
    }

    pub async fn snapshot(&self) -> HashMap<String, HashMap<String, WorkflowTransition>> {
        self.transitions.read().await.clone()
    }

    pub async fn restore(&self, transitions: HashMap<String, HashMap<String, WorkflowTransition>>) {
        *self.transitions.write().await = transitions;
    }
}

fn enforce_per_from_cap(outgoing: &mut HashMap<String, WorkflowTransition>, max: usize) {
    if outgoing.len() <= max {
        return;
    }
    let mut keyed: Vec<(String, u64, DateTime<Utc>)> = outgoing
        .iter()
        .map(|(k, v)| (k.clone(), v.frequency, v.last_used))
        .collect();
    keyed.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
    let excess = outgoing.len() - max;
    for (key, _, _) in keyed.into_iter().take(excess) {
        outgoing.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> WorkflowConfig {
        WorkflowConfig {
            workflow_learning: true,
            workflow_min_frequency: 1,
            workflow_max_time_delta_minutes: 15,
            workflow_min_confidence: 0.0,
        }
    }

    #[test]
    fn canonicalizes_subcommand() {
        assert_eq!(canonicalize("git", &["commit".into(), "-m".into()]), "git commit");
        assert_eq!(canonicalize("cargo", &["test".into()]), "cargo test");
        assert_eq!(canonicalize("ls", &["-la".into()]), "ls");
    }

    fn history_entry(command: &str, seconds_ago: i64) -> HistoryEntry {
        HistoryEntry {
            command: command.to_string(),
            full_line: command.to_string(),
            arguments: vec![],
            timestamp: Utc::now() - chrono::Duration::seconds(seconds_ago),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn records_transition_and_predicts() {
        let learner = WorkflowLearner::new(cfg());
        learner.record_transition("git add", "git commit", 10_000).await;

        let predictions = learner.predict_next("git add", &[]).await;
        assert_eq!(predictions[0].command, "git commit");
    }

    #[tokio::test]
    async fn immediate_repeat_gets_boosted_over_neutral_default() {
        let learner = WorkflowLearner::new(cfg());
        // Average gap between "git add" and "git commit" is 100s.
        learner.record_transition("git add", "git commit", 100_000).await;

        let no_history = learner.predict_next("git add", &[]).await;
        // Ran "git add" 5s ago: actual/avg = 0.05, well under the 1.5
        // immediate-match threshold, so this should score strictly higher
        // than the neutral (no matching history) default.
        let with_recent = learner
            .predict_next("git add", &[history_entry("git add", 5)])
            .await;

        assert!(with_recent[0].confidence > no_history[0].confidence);
    }

    #[tokio::test]
    async fn stale_repeat_gets_penalized_below_neutral_default() {
        let learner = WorkflowLearner::new(cfg());
        learner.record_transition("git add", "git commit", 100_000).await;

        let no_history = learner.predict_next("git add", &[]).await;
        // Ran "git add" an hour ago: actual/avg = 36, past the 30x
        // far-apart threshold, so this should score lower than neutral.
        let with_stale = learner
            .predict_next("git add", &[history_entry("git add", 3_600)])
            .await;

        assert!(with_stale[0].confidence < no_history[0].confidence);
    }

    #[tokio::test]
    async fn drops_accidental_double_enter() {
        let learner = WorkflowLearner::new(cfg());
        learner.record_transition("git status", "git status", 500).await;
        let predictions = learner.predict_next("git status", &[]).await;
        assert!(predictions.is_empty());
    }

    #[tokio::test]
    async fn drops_transitions_over_max_delta() {
        let learner = WorkflowLearner::new(cfg());
        learner.record_transition("git add", "git commit", 16 * 60_000).await;
        let predictions = learner.predict_next("git add", &[]).await;
        assert!(predictions.is_empty());
    }

    #[tokio::test]
    async fn per_from_cap_evicts_lru() {
        let learner = WorkflowLearner::new(cfg());
        for i in 0..21 {
            learner
                .record_transition("git add", &format!("next-{i}"), 1000)
                .await;
        }
        let transitions = learner.snapshot().await;
        assert_eq!(transitions["git add"].len(), 20);
    }
}
