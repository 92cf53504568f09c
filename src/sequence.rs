//! N-gram next-command model.
//!
//! Bare command-to-command adjacency, without timing — kept in a table
//! distinct from [`crate::workflow`] per spec: `WorkflowLearner` adds
//! timing and subcommand canonicalization, `SequencePredictor` does not.
//! Both are populated from the same ingestor event.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::SequenceConfig;

#[derive(Debug, Clone)]
pub struct NgramEntry {
    pub prev_command: String,
    pub next_command: String,
    pub frequency: u64,
    pub last_seen: DateTime<Utc>,
}

pub struct SequencePredictor {
    config: SequenceConfig,
    bigrams: RwLock<HashMap<String, HashMap<String, NgramEntry>>>,
    trigrams: RwLock<HashMap<(String, String), HashMap<String, NgramEntry>>>,
}

impl SequencePredictor {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            bigrams: RwLock::new(HashMap::new()),
            trigrams: RwLock::new(HashMap::new()),
        }
    }

    /// Records a transition. `prev_two` is the two commands preceding
    /// `next`, oldest first, when available — used to populate the
    /// trigram table alongside the always-populated bigram table.
    pub async fn record(&self, prev: &str, next: &str, prev_two: Option<(&str, &str)>) {
        if !self.config.ml_enabled || prev.is_empty() || next.is_empty() {
            return;
        }
        let now = Utc::now();

        let mut bigrams = self.bigrams.write().await;
        upsert(bigrams.entry(prev.to_string()).or_default(), prev, next, now);
        drop(bigrams);

        if self.config.ml_ngram_order >= 3 {
            if let Some((first, second)) = prev_two {
                let mut trigrams = self.trigrams.write().await;
                let key = (first.to_string(), second.to_string());
                upsert(trigrams.entry(key).or_default(), second, next, now);
            }
        }
    }

    /// Predicts the next command. Tries a trigram match first when
    /// configured and `prev_two` is available, falling back to bigram.
    pub async fn predict(&self, prev: &str, prev_two: Option<(&str, &str)>) -> Vec<(String, u64)> {
        if self.config.ml_ngram_order >= 3 {
            if let Some((first, second)) = prev_two {
                let trigrams = self.trigrams.read().await;
                if let Some(candidates) = trigrams.get(&(first.to_string(), second.to_string())) {
                    let hits = filtered_sorted(candidates, self.config.ml_ngram_min_freq);
                    if !hits.is_empty() {
                        return hits;
                    }
                }
            }
        }

        let bigrams = self.bigrams.read().await;
        match bigrams.get(prev) {
            Some(candidates) => filtered_sorted(candidates, self.config.ml_ngram_min_freq),
            None => Vec::new(),
        }
    }

    pub async fn snapshot_bigrams(&self) -> HashMap<String, HashMap<String, NgramEntry>> {
        self.bigrams.read().await.clone()
    }

    pub async fn restore_bigrams(&self, bigrams: HashMap<String, HashMap<String, NgramEntry>>) {
        *self.bigrams.write().await = bigrams;
    }
}

fn upsert(table: &mut HashMap<String, NgramEntry>, prev: &str, next: &str, now: DateTime<Utc>) {
    table
        .entry(next.to_string())
        .and_modify(|e| {
            e.frequency += 1;
            e.last_seen = now;
        })
        .or_insert(NgramEntry {
            prev_command: prev.to_string(),
            next_command: next.to_string(),
            frequency: 1,
            last_seen: now,
        });
}

fn filtered_sorted(candidates: &HashMap<String, NgramEntry>, min_freq: u64) -> Vec<(String, u64)> {
    let mut out: Vec<(String, u64)> = candidates
        .values()
        .filter(|e| e.frequency >= min_freq)
        .map(|e| (e.next_command.clone(), e.frequency))
        .collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SequenceConfig {
        SequenceConfig {
            ml_enabled: true,
            ml_ngram_order: 2,
            ml_ngram_min_freq: 3,
        }
    }

    #[tokio::test]
    async fn below_min_freq_is_not_suggested() {
        let predictor = SequencePredictor::new(cfg());
        predictor.record("git add", "git commit", None).await;
        predictor.record("git add", "git commit", None).await;
        let predictions = predictor.predict("git add", None).await;
        assert!(predictions.is_empty());
    }

    #[tokio::test]
    async fn at_min_freq_is_suggested() {
        let predictor = SequencePredictor::new(cfg());
        for _ in 0..3 {
            predictor.record("git add", "git commit", None).await;
        }
        let predictions = predictor.predict("git add", None).await;
        assert_eq!(predictions[0].0, "git commit");
        assert_eq!(predictions[0].1, 3);
    }

    #[tokio::test]
    async fn disabled_predictor_records_nothing() {
        let mut config = cfg();
        config.ml_enabled = false;
        let predictor = SequencePredictor::new(config);
        for _ in 0..5 {
            predictor.record("git add", "git commit", None).await;
        }
        assert!(predictor.predict("git add", None).await.is_empty());
    }
}
