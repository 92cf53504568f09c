//! Bounded ring buffer of recently executed commands.
//!
//! Single-writer (`FeedbackIngestor`), multi-reader (predictors). Readers
//! see a consistent snapshot via the read-write lock's short critical
//! sections, following the teacher's `HistoryProvider` concurrency shape.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub command: String,
    pub full_line: String,
    pub arguments: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub working_directory: Option<String>,
}

pub struct CommandHistory {
    capacity: usize,
    entries: RwLock<VecDeque<HistoryEntry>>,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends `entry`, evicting the oldest entry if at capacity.
    pub async fn add(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Replaces the buffer with `entries` (oldest first), keeping only the
    /// newest `capacity` of them. Used to repopulate history from storage
    /// on startup.
    pub async fn restore(&self, entries: Vec<HistoryEntry>) {
        let mut buffer = self.entries.write().await;
        buffer.clear();
        let skip = entries.len().saturating_sub(self.capacity);
        buffer.extend(entries.into_iter().skip(skip));
    }

    /// Most recent `n` entries, newest first.
    pub async fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(n).cloned().collect()
    }

    /// All entries, newest first.
    pub async fn all(&self) -> Vec<HistoryEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn last(&self) -> Option<HistoryEntry> {
        self.entries.read().await.back().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cmd: &str) -> HistoryEntry {
        HistoryEntry {
            command: cmd.to_string(),
            full_line: cmd.to_string(),
            arguments: vec![],
            timestamp: Utc::now(),
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn at_capacity_one_add_evicts_exactly_one_oldest() {
        let history = CommandHistory::new(3);
        history.add(entry("a")).await;
        history.add(entry("b")).await;
        history.add(entry("c")).await;
        history.add(entry("d")).await;

        let all = history.all().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].command, "d");
        assert_eq!(all.last().unwrap().command, "b");
    }

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let history = CommandHistory::new(10);
        history.add(entry("a")).await;
        history.add(entry("b")).await;
        history.add(entry("c")).await;

        let recent = history.recent(2).await;
        assert_eq!(recent[0].command, "c");
        assert_eq!(recent[1].command, "b");
    }

    #[tokio::test]
    async fn last_reflects_most_recent_add() {
        let history = CommandHistory::new(5);
        assert!(history.last().await.is_none());
        history.add(entry("a")).await;
        assert_eq!(history.last().await.unwrap().command, "a");
    }
}
