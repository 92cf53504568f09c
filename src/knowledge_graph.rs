//! Per-command argument, flag, sequence, and parameter statistics, plus
//! path normalization for navigation commands.
//!
//! Concurrency follows the teacher's `HistoryProvider`/`SessionManager`
//! shape: a single `RwLock`-guarded map, short critical sections, snapshot
//! reads for iteration.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::config::KnowledgeGraphConfig;

const NAV_COMMANDS: &[&str] = &["cd", "set-location", "sl", "chdir"];

pub fn is_navigation_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    NAV_COMMANDS.contains(&lower.as_str())
}

/// A single argument passed to a command, already classified by the
/// tokenizer. `Parameter` carries both the canonical flag name and its
/// bound value (the `ParameterValue` token merged in).
#[derive(Debug, Clone)]
pub enum ArgToken {
    Flag(String),
    Parameter(String, String),
    Standalone(String),
}

impl ArgToken {
    fn is_flag_only(&self) -> bool {
        matches!(self, ArgToken::Flag(_))
    }
}

#[derive(Debug, Clone)]
pub struct ArgumentUsage {
    pub argument: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub is_flag: bool,
}

impl ArgumentUsage {
    fn score(&self, total_freq: u64, decay_days: f64) -> f64 {
        let freq_score = if total_freq == 0 {
            0.0
        } else {
            self.usage_count as f64 / total_freq as f64
        };
        let age_days = (Utc::now() - self.last_used).num_seconds().max(0) as f64 / 86400.0;
        let recency_score = (-age_days / decay_days.max(0.001)).exp().clamp(0.0, 1.0);
        freq_score * 0.6 + recency_score * 0.4
    }
}

#[derive(Debug, Clone)]
pub struct FlagCombination {
    pub flags: Vec<String>,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArgumentSequence {
    pub first: String,
    pub second: String,
    pub usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl ArgumentSequence {
    fn score(&self, total_freq: u64, decay_days: f64) -> f64 {
        let freq_score = if total_freq == 0 {
            0.0
        } else {
            self.usage_count as f64 / total_freq as f64
        };
        let age_days = (Utc::now() - self.last_used).num_seconds().max(0) as f64 / 86400.0;
        let recency_score = (-age_days / decay_days.max(0.001)).exp().clamp(0.0, 1.0);
        freq_score * 0.6 + recency_score * 0.4
    }
}

#[derive(Debug, Clone)]
pub struct ParameterValueEntry {
    pub parameter: String,
    pub value: String,
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
}

/// Symmetric argument adjacency within a single invocation: unlike
/// [`FlagCombination`], which keys on the full set used together, this
/// tracks pairwise co-occurrence so "often used with X" queries don't
/// require an exact-set match. Keyed with `arg_a <= arg_b` so the pair
/// collapses regardless of argument order.
#[derive(Debug, Clone)]
pub struct CoOccurrence {
    pub arg_a: String,
    pub arg_b: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone)]
pub struct CommandKnowledge {
    pub command: String,
    pub total_usage_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub arguments: HashMap<String, ArgumentUsage>,
    pub flag_combinations: HashMap<Vec<String>, FlagCombination>,
    pub argument_sequences: HashMap<(String, String), ArgumentSequence>,
    pub parameter_values: HashMap<String, Vec<ParameterValueEntry>>,
    pub co_occurrences: HashMap<(String, String), CoOccurrence>,
}

impl CommandKnowledge {
    fn new(command: &str, now: DateTime<Utc>) -> Self {
        Self {
            command: command.to_string(),
            total_usage_count: 0,
            first_seen: now,
            last_used: now,
            arguments: HashMap::new(),
            flag_combinations: HashMap::new(),
            argument_sequences: HashMap::new(),
            parameter_values: HashMap::new(),
            co_occurrences: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Suggestion {
    pub argument: String,
    pub score: f64,
    pub description: Option<String>,
    pub is_flag: bool,
}

pub struct KnowledgeGraph {
    config: KnowledgeGraphConfig,
    commands: RwLock<HashMap<String, CommandKnowledge>>,
}

fn expand_tilde(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.to_string_lossy(), rest);
        }
    }
    raw.to_string()
}

/// Normalizes a navigation argument: expands `~`, resolves relative-to-wd,
/// canonicalizes, resolves symlinks, and appends the platform separator.
/// Falls back to the result of the last step that succeeded on error.
pub fn normalize_path(raw: &str, working_directory: &str) -> String {
    let expanded = expand_tilde(raw);
    let candidate = PathBuf::from(&expanded);
    let absolute = if candidate.is_absolute() {
        candidate
    } else {
        PathBuf::from(working_directory).join(&candidate)
    };

    let resolved = std::fs::canonicalize(&absolute).unwrap_or(absolute);
    let mut s = resolved.to_string_lossy().to_string();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    s
}

impl KnowledgeGraph {
    pub fn new(config: KnowledgeGraphConfig) -> Self {
        Self {
            config,
            commands: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_usage(
        &self,
        command: &str,
        arguments: &[ArgToken],
        working_directory: Option<&str>,
    ) {
        if command.trim().is_empty() {
            return;
        }
        let key = command.to_lowercase();
        let now = Utc::now();
        let navigation = is_navigation_command(command);

        let mut commands = self.commands.write().await;
        let entry = commands
            .entry(key.clone())
            .or_insert_with(|| CommandKnowledge::new(command, now));

        entry.total_usage_count += 1;
        entry.last_used = now;

        let mut flags_seen = Vec::new();
        let mut non_flag_sequence = Vec::new();

        for arg in arguments {
            match arg {
                ArgToken::Flag(name) => {
                    flags_seen.push(name.clone());
                    upsert_argument(entry, name, true, now);
                }
                ArgToken::Parameter(name, value) => {
                    upsert_argument(entry, name, false, now);
                    let resolved_value = if navigation {
                        working_directory
                            .map(|wd| normalize_path(value, wd))
                            .unwrap_or_else(|| value.clone())
                    } else {
                        value.clone()
                    };
                    upsert_parameter_value(entry, name, &resolved_value, now);
                    non_flag_sequence.push(resolved_value);
                }
                ArgToken::Standalone(text) => {
                    let resolved = if navigation {
                        working_directory
                            .map(|wd| normalize_path(text, wd))
                            .unwrap_or_else(|| text.clone())
                    } else {
                        text.clone()
                    };
                    upsert_argument(entry, &resolved, false, now);
                    non_flag_sequence.push(resolved);
                }
            }
        }

        if !flags_seen.is_empty() {
            flags_seen.sort();
            flags_seen.dedup();
            for i in 0..flags_seen.len() {
                for j in (i + 1)..flags_seen.len() {
                    upsert_co_occurrence(entry, &flags_seen[i], &flags_seen[j]);
                }
            }
            upsert_flag_combination(entry, flags_seen, now);
        }

        for pair in non_flag_sequence.windows(2) {
            upsert_sequence(entry, &pair[0], &pair[1], now);
        }

        enforce_arg_cap(entry, self.config.max_args_per_cmd, self.config.decay_days);
        enforce_sequence_cap(entry, 50);

        enforce_command_cap(&mut commands, self.config.max_commands);
    }

    pub async fn get_suggestions(
        &self,
        command: &str,
        _current_arguments: &[String],
        word_to_complete: &str,
    ) -> Vec<Suggestion> {
        let commands = self.commands.read().await;
        let Some(entry) = commands.get(&command.to_lowercase()) else {
            return Vec::new();
        };
        let needle = word_to_complete.to_lowercase();
        let mut out: Vec<Suggestion> = entry
            .arguments
            .values()
            .filter(|a| a.argument.to_lowercase().starts_with(&needle))
            .map(|a| Suggestion {
                argument: a.argument.clone(),
                score: a.score(entry.total_usage_count, self.config.decay_days),
                description: None,
                is_flag: a.is_flag,
            })
            .collect();
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| a.argument.cmp(&b.argument))
        });
        out
    }

    pub async fn get_sequences_starting_with(
        &self,
        command: &str,
        first_arg: &str,
        max: usize,
    ) -> Vec<(String, f64)> {
        let commands = self.commands.read().await;
        let Some(entry) = commands.get(&command.to_lowercase()) else {
            return Vec::new();
        };
        let needle = first_arg.to_lowercase();
        let mut out: Vec<(String, f64)> = entry
            .argument_sequences
            .values()
            .filter(|s| s.first.to_lowercase() == needle)
            .map(|s| (s.second.clone(), s.score(entry.total_usage_count, self.config.decay_days)))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        out.truncate(max);
        out
    }

    pub async fn get_tracked_commands(&self) -> Vec<String> {
        self.commands.read().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> HashMap<String, CommandKnowledge> {
        self.commands.read().await.clone()
    }

    pub async fn restore(&self, commands: HashMap<String, CommandKnowledge>) {
        *self.commands.write().await = commands;
    }

    pub async fn visited_directories(&self, max: usize) -> Vec<(String, ArgumentUsage)> {
        let commands = self.commands.read().await;
        let Some(entry) = commands.get("cd") else {
            return Vec::new();
        };
        let mut dirs: Vec<(String, ArgumentUsage)> = entry
            .arguments
            .values()
            .filter(|a| !a.is_flag)
            .map(|a| (a.argument.clone(), a.clone()))
            .collect();
        dirs.sort_by(|a, b| b.1.usage_count.cmp(&a.1.usage_count));
        dirs.truncate(max);
        dirs
    }

    pub fn config(&self) -> &KnowledgeGraphConfig {
        &self.config
    }
}

fn upsert_argument(entry: &mut CommandKnowledge, name: &str, is_flag: bool, now: DateTime<Utc>) {
    entry
        .arguments
        .entry(name.to_string())
        .and_modify(|a| {
            a.usage_count += 1;
            a.last_used = now;
        })
        .or_insert(ArgumentUsage {
            argument: name.to_string(),
            usage_count: 1,
            first_seen: now,
            last_used: now,
            is_flag,
        });
}

fn upsert_parameter_value(entry: &mut CommandKnowledge, parameter: &str, value: &str, now: DateTime<Utc>) {
    let values = entry.parameter_values.entry(parameter.to_string()).or_default();
    if let Some(existing) = values.iter_mut().find(|v| v.value == value) {
        existing.usage_count += 1;
        existing.last_used = now;
    } else {
        values.push(ParameterValueEntry {
            parameter: parameter.to_string(),
            value: value.to_string(),
            usage_count: 1,
            last_used: now,
        });
    }
}

fn upsert_co_occurrence(entry: &mut CommandKnowledge, a: &str, b: &str) {
    let (arg_a, arg_b) = if a <= b { (a.to_string(), b.to_string()) } else { (b.to_string(), a.to_string()) };
    entry
        .co_occurrences
        .entry((arg_a.clone(), arg_b.clone()))
        .and_modify(|c| c.usage_count += 1)
        .or_insert(CoOccurrence { arg_a, arg_b, usage_count: 1 });
}

fn upsert_flag_combination(entry: &mut CommandKnowledge, flags: Vec<String>, now: DateTime<Utc>) {
    entry
        .flag_combinations
        .entry(flags.clone())
        .and_modify(|c| {
            c.usage_count += 1;
            c.last_used = now;
        })
        .or_insert(FlagCombination {
            flags,
            usage_count: 1,
            first_seen: now,
            last_used: now,
        });
}

fn upsert_sequence(entry: &mut CommandKnowledge, first: &str, second: &str, now: DateTime<Utc>) {
    let key = (first.to_string(), second.to_string());
    entry
        .argument_sequences
        .entry(key)
        .and_modify(|s| {
            s.usage_count += 1;
            s.last_used = now;
        })
        .or_insert(ArgumentSequence {
            first: first.to_string(),
            second: second.to_string(),
            usage_count: 1,
            first_seen: now,
            last_used: now,
        });
}

fn enforce_arg_cap(entry: &mut CommandKnowledge, max: usize, decay_days: f64) {
    if entry.arguments.len() <= max {
        return;
    }
    let total = entry.total_usage_count;
    let mut scored: Vec<(String, f64)> = entry
        .arguments
        .iter()
        .map(|(k, v)| (k.clone(), v.score(total, decay_days)))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let excess = entry.arguments.len() - max;
    for (key, _) in scored.into_iter().take(excess) {
        entry.arguments.remove(&key);
    }
}

fn enforce_sequence_cap(entry: &mut CommandKnowledge, max: usize) {
    if entry.argument_sequences.len() <= max {
        return;
    }
    let mut keyed: Vec<((String, String), DateTime<Utc>)> = entry
        .argument_sequences
        .iter()
        .map(|(k, v)| (k.clone(), v.last_used))
        .collect();
    keyed.sort_by_key(|(_, last_used)| *last_used);
    let excess = entry.argument_sequences.len() - max;
    for (key, _) in keyed.into_iter().take(excess) {
        entry.argument_sequences.remove(&key);
    }
}

fn enforce_command_cap(commands: &mut HashMap<String, CommandKnowledge>, max: usize) {
    if commands.len() <= max {
        return;
    }
    let mut keyed: Vec<(String, u64, DateTime<Utc>)> = commands
        .iter()
        .map(|(k, v)| (k.clone(), v.total_usage_count, v.last_used))
        .collect();
    keyed.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
    let excess = commands.len() - max;
    for (key, _, _) in keyed.into_iter().take(excess) {
        commands.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> KnowledgeGraphConfig {
        KnowledgeGraphConfig {
            max_commands: 500,
            max_args_per_cmd: 100,
            decay_days: 30.0,
        }
    }

    #[tokio::test]
    async fn records_flags_and_standalone_arguments() {
        let graph = KnowledgeGraph::new(cfg());
        graph
            .record_usage(
                "git",
                &[
                    ArgToken::Standalone("add".into()),
                    ArgToken::Standalone(".".into()),
                ],
                None,
            )
            .await;
        graph
            .record_usage(
                "git",
                &[
                    ArgToken::Standalone("commit".into()),
                    ArgToken::Parameter("-m".into(), "fix".into()),
                ],
                None,
            )
            .await;

        let tracked = graph.get_tracked_commands().await;
        assert_eq!(tracked, vec!["git".to_string()]);

        let suggestions = graph.get_suggestions("git", &[], "c").await;
        assert!(suggestions.iter().any(|s| s.argument == "commit"));
    }

    #[tokio::test]
    async fn navigation_inputs_collapse_to_one_canonical_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("b");
        std::fs::create_dir(&sub).unwrap();
        let wd = dir.path().to_string_lossy().to_string();

        let graph = KnowledgeGraph::new(cfg());
        graph
            .record_usage("cd", &[ArgToken::Standalone("b".into())], Some(&wd))
            .await;
        let abs = sub.to_string_lossy().to_string();
        graph
            .record_usage("cd", &[ArgToken::Standalone(abs)], Some(&wd))
            .await;

        let visited = graph.visited_directories(10).await;
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].1.usage_count, 2);
    }

    #[tokio::test]
    async fn command_cap_evicts_lowest_value_not_the_new_entry() {
        let mut config = cfg();
        config.max_commands = 2;
        let graph = KnowledgeGraph::new(config);

        graph.record_usage("alpha", &[], None).await;
        graph.record_usage("beta", &[], None).await;
        graph.record_usage("beta", &[], None).await;
        graph.record_usage("gamma", &[], None).await;

        let tracked = graph.get_tracked_commands().await;
        assert_eq!(tracked.len(), 2);
        assert!(tracked.contains(&"beta".to_string()));
        assert!(tracked.contains(&"gamma".to_string()));
    }
}
