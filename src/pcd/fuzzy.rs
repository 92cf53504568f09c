//! Fuzzy matching for PCD queries: substring detection plus an edit-
//! distance similarity ratio, with a long-query LCS coverage guard.
//!
//! Grounded in the teacher's `providers/history.rs::levenshtein` and
//! fuzzy-search helpers, generalized with the `strsim` crate (already a
//! pack-wide dependency) for the edit-distance primitive.

const LONG_QUERY_THRESHOLD: usize = 10;

/// Longest common subsequence length between `a` and `b`.
fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    dp[a.len()][b.len()]
}

/// Similarity ratio in `[0, 1]` derived from normalized Levenshtein
/// distance via `strsim`.
pub fn similarity_ratio(query: &str, candidate: &str) -> f64 {
    strsim::normalized_levenshtein(&query.to_lowercase(), &candidate.to_lowercase())
}

fn lcs_coverage(query: &str, candidate: &str) -> f64 {
    let query = query.to_lowercase();
    let candidate = candidate.to_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    lcs_len(&query, &candidate) as f64 / query.chars().count() as f64
}

/// Returns `true` if `candidate` is a plausible fuzzy match for `query`
/// under `min_match_pct`. Queries longer than [`LONG_QUERY_THRESHOLD`]
/// additionally require LCS coverage ≥ `long_query_lcs_pct`, to avoid
/// semantically-unrelated near-neighbors (e.g. a long query for
/// `"dd-trace-js"` must not match `"dd-trace-dotnet"`).
pub fn is_fuzzy_match(query: &str, candidate: &str, min_match_pct: f64, long_query_lcs_pct: f64) -> bool {
    if query.is_empty() {
        return false;
    }
    let ratio = similarity_ratio(query, candidate);
    if ratio < min_match_pct {
        return false;
    }
    if query.chars().count() > LONG_QUERY_THRESHOLD {
        return lcs_coverage(query, candidate) >= long_query_lcs_pct;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_query_uses_similarity_threshold_alone() {
        assert!(is_fuzzy_match("dd-js", "dd-trace-js", 0.5, 0.6));
    }

    #[test]
    fn long_query_requires_lcs_coverage_guard() {
        // "dd-trace-js" must not match "dd-trace-dotnet" under the default
        // thresholds from spec Scenario F.
        assert!(!is_fuzzy_match("dd-trace-js", "dd-trace-dotnet", 0.70, 0.60));
    }

    #[test]
    fn long_query_matches_itself() {
        assert!(is_fuzzy_match("dd-trace-js", "dd-trace-js", 0.70, 0.60));
    }
}
