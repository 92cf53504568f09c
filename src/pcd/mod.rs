//! Smart directory navigation: ranks candidate directories by a
//! frecency+distance score, blending learned `cd` history with a bounded
//! filesystem walk and fuzzy matching.

pub mod fuzzy;
pub mod walker;

use chrono::Utc;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PcdConfig;
use crate::knowledge_graph::KnowledgeGraph;

#[derive(Debug, Clone, PartialEq)]
pub struct PcdResult {
    pub path: String,
    pub score: f64,
}

pub struct PcdRequest<'a> {
    pub query: &'a str,
    pub current_directory: &'a str,
    pub max_depth: usize,
    pub skip_existence_check: bool,
}

pub struct PcdEngine {
    config: PcdConfig,
    knowledge_graph: Arc<KnowledgeGraph>,
    listing_cache: Cache<PathBuf, Vec<PathBuf>>,
}

fn distance_score(candidate: &Path, current: &Path) -> f64 {
    if candidate == current {
        return 1.0;
    }
    if let Some(parent) = current.parent() {
        if parent == candidate {
            return 0.9;
        }
    }
    if let Some(parent) = candidate.parent() {
        if parent == current {
            return 0.85;
        }
    }
    if candidate.starts_with(current) {
        let depth = candidate.components().count().saturating_sub(current.components().count());
        return (0.85 - depth as f64 * 0.1).max(0.5);
    }
    if current.starts_with(candidate) {
        let depth = current.components().count().saturating_sub(candidate.components().count());
        return (0.6 - depth as f64 * 0.1).max(0.1);
    }
    if candidate.parent() == current.parent() {
        return 0.7;
    }
    0.3
}

fn match_score(query: &str, name: &str, full_path: &str) -> f64 {
    let needle = query.to_lowercase();
    let name_lower = name.to_lowercase();
    let path_lower = full_path.to_lowercase();

    if name_lower == needle || path_lower == needle {
        return 1.0;
    }
    if name_lower.starts_with(&needle) {
        return 0.9;
    }
    if name_lower.contains(&needle) || path_lower.contains(&needle) {
        return 0.5;
    }
    let ratio = fuzzy::similarity_ratio(&needle, &name_lower).max(fuzzy::similarity_ratio(&needle, &path_lower));
    if ratio >= 0.7 {
        ratio.clamp(0.7, 0.9)
    } else {
        0.0
    }
}

impl PcdEngine {
    pub fn new(config: PcdConfig, knowledge_graph: Arc<KnowledgeGraph>) -> Self {
        let listing_cache = Cache::builder()
            .time_to_live(Duration::from_secs(5))
            .max_capacity(1024)
            .build();
        Self { config, knowledge_graph, listing_cache }
    }

    async fn listing(&self, dir: &Path, query: &str) -> Vec<PathBuf> {
        if let Some(cached) = self.listing_cache.get(&dir.to_path_buf()).await {
            return cached;
        }
        let dir = dir.to_path_buf();
        let enable_dot_filter = self.config.enable_dot_dir_filter;
        let blocklist = self.config.custom_blocklist.clone();
        let query = query.to_string();
        let children = tokio::task::spawn_blocking(move || {
            walker::list_child_dirs(&dir, enable_dot_filter, &blocklist, &query)
        })
        .await
        .unwrap_or_default();
        self.listing_cache.insert(dir, children.clone()).await;
        children
    }

    pub async fn rank(&self, req: &PcdRequest<'_>) -> Vec<PcdResult> {
        let mut candidates: Vec<PcdResult> = Vec::new();
        let current = PathBuf::from(req.current_directory);

        if !req.query.starts_with('/') && !req.query.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                candidates.push(PcdResult { path: format!("{}/", home.display()), score: 0.1 });
            }
            if let Some(parent) = current.parent() {
                candidates.push(PcdResult { path: format!("{}/", parent.display()), score: 0.1 });
            }
        }

        let learned = self.knowledge_graph.visited_directories(200).await;
        let total_freq: u64 = learned.iter().map(|(_, a)| a.usage_count).sum::<u64>().max(1);
        let max_freq = learned.iter().map(|(_, a)| a.usage_count).max().unwrap_or(1);

        for (path, usage) in &learned {
            let path_buf = PathBuf::from(path);
            let name = path_buf.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let m = match_score(req.query, &name, path).max(
                if fuzzy::is_fuzzy_match(req.query, &name, self.config.fuzzy_min_match_pct, self.config.long_query_lcs_pct) {
                    fuzzy::similarity_ratio(req.query, &name).clamp(0.7, 0.9)
                } else {
                    0.0
                },
            );
            if m == 0.0 {
                continue;
            }

            let freq_norm = usage.usage_count as f64 / max_freq as f64;
            let age_days = (Utc::now() - usage.last_used).num_seconds().max(0) as f64 / 86400.0;
            let recency = (-age_days / 30.0).exp();
            let frecency = self.config.frequency_weight * freq_norm + self.config.recency_weight * recency;
            let dist = distance_score(&path_buf, &current);

            let mut score = m * (frecency + self.config.distance_weight * dist);
            if name.to_lowercase() == req.query.to_lowercase() {
                score *= self.config.exact_match_boost;
            }
            candidates.push(PcdResult { path: path.clone(), score });
        }
        let _ = total_freq;

        let base_dir = if req.query.starts_with('/') {
            PathBuf::from(req.query)
        } else {
            current.clone()
        };

        for child in self.listing(&base_dir, req.query).await {
            let name = child.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let m = match_score(req.query, &name, &child.to_string_lossy());
            if m > 0.0 {
                candidates.push(PcdResult { path: format!("{}/", child.display()), score: m * 0.4 });
            }
        }

        if self.config.recursive_search {
            let dir = base_dir.clone();
            let enable_dot_filter = self.config.enable_dot_dir_filter;
            let blocklist = self.config.custom_blocklist.clone();
            let query = req.query.to_string();
            let max_depth = req.max_depth;
            let deep = tokio::task::spawn_blocking(move || {
                walker::walk_recursive(&dir, max_depth, enable_dot_filter, &blocklist, &query)
            })
            .await
            .unwrap_or_default();
            for child in deep {
                let name = child.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                let m = match_score(req.query, &name, &child.to_string_lossy());
                if m > 0.0 {
                    candidates.push(PcdResult { path: format!("{}/", child.display()), score: m * 0.35 });
                }
            }
        }

        if !req.skip_existence_check {
            candidates.retain(|c| Path::new(c.path.trim_end_matches('/')).exists());
        }

        // Dedup on resolved absolute path with trailing separator, keeping
        // the max score.
        let mut deduped: std::collections::HashMap<String, f64> = std::collections::HashMap::new();
        for c in candidates {
            let key = normalize_for_dedup(&c.path);
            deduped
                .entry(key)
                .and_modify(|existing| {
                    if c.score > *existing {
                        *existing = c.score;
                    }
                })
                .or_insert(c.score);
        }

        let mut out: Vec<PcdResult> = deduped.into_iter().map(|(path, score)| PcdResult { path, score }).collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        out
    }

    /// Returns the top-N candidates that actually exist, for best-match
    /// (non-Tab) navigation. Never returns a non-existent path.
    pub async fn best_match(&self, query: &str, current_directory: &str, top_n: usize) -> Vec<PcdResult> {
        let req = PcdRequest {
            query,
            current_directory,
            max_depth: self.config.max_depth_predictor,
            skip_existence_check: false,
        };
        let mut results = self.rank(&req).await;
        results.truncate(top_n.max(10));
        results
    }
}

fn normalize_for_dedup(path: &str) -> String {
    let mut s = path.to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnowledgeGraphConfig;
    use crate::knowledge_graph::ArgToken;

    fn cfg() -> PcdConfig {
        PcdConfig::default()
    }

    #[tokio::test]
    async fn exact_name_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("dd-trace-dotnet");
        std::fs::create_dir(&target).unwrap();
        std::fs::create_dir(dir.path().join("dd-trace-js")).unwrap();

        let kg = Arc::new(KnowledgeGraph::new(KnowledgeGraphConfig { max_commands: 500, max_args_per_cmd: 100, decay_days: 30.0 }));
        kg.record_usage("cd", &[ArgToken::Standalone(target.to_string_lossy().to_string())], Some(&dir.path().to_string_lossy())).await;
        kg.record_usage(
            "cd",
            &[ArgToken::Standalone(dir.path().join("dd-trace-js").to_string_lossy().to_string())],
            Some(&dir.path().to_string_lossy()),
        )
        .await;

        let engine = PcdEngine::new(cfg(), kg);
        let req = PcdRequest {
            query: "dd-trace-dotnet",
            current_directory: "/home",
            max_depth: 1,
            skip_existence_check: false,
        };
        let results = engine.rank(&req).await;
        assert!(results[0].path.contains("dd-trace-dotnet"));
    }
}
