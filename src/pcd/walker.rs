//! Bounded-depth filesystem walk for directory candidates, with
//! blocklist and dot-directory filtering.
//!
//! Grounded in the teacher's `FilesystemProvider::read_dir_entries`/
//! `list_dir` (cached via `moka`, run off the executor via
//! `spawn_blocking`).

use std::path::{Path, PathBuf};

pub const DEFAULT_BLOCKLIST: &[&str] = &[
    ".codeium",
    ".claude",
    ".dotnet",
    ".nuget",
    ".git",
    ".vs",
    ".vscode",
    ".idea",
    "node_modules",
    "bin",
    "obj",
    "target",
    "__pycache__",
    ".pytest_cache",
];

fn is_blocked(name: &str, custom_blocklist: &[String], query: &str) -> bool {
    if !query.is_empty() && name.to_lowercase().starts_with(&query.to_lowercase()) {
        return false; // the user explicitly asked for this directory by name
    }
    DEFAULT_BLOCKLIST.contains(&name) || custom_blocklist.iter().any(|b| b == name)
}

/// Lists immediate child directories of `root`, applying dot-dir and
/// blocklist filtering. Runs synchronously; callers wrap in
/// `spawn_blocking`.
pub fn list_child_dirs(root: &Path, enable_dot_dir_filter: bool, custom_blocklist: &[String], query: &str) -> Vec<PathBuf> {
    let Ok(read) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in read.flatten() {
        let Ok(file_type) = entry.file_type() else { continue };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if enable_dot_dir_filter && name.starts_with('.') && !query.starts_with('.') {
            continue;
        }
        if is_blocked(&name, custom_blocklist, query) {
            continue;
        }
        out.push(entry.path());
    }
    out
}

/// Recursively walks `root` to `max_depth`, collecting directories.
pub fn walk_recursive(
    root: &Path,
    max_depth: usize,
    enable_dot_dir_filter: bool,
    custom_blocklist: &[String],
    query: &str,
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk_inner(root, max_depth, enable_dot_dir_filter, custom_blocklist, query, &mut out);
    out
}

fn walk_inner(
    dir: &Path,
    depth_remaining: usize,
    enable_dot_dir_filter: bool,
    custom_blocklist: &[String],
    query: &str,
    out: &mut Vec<PathBuf>,
) {
    if depth_remaining == 0 {
        return;
    }
    for child in list_child_dirs(dir, enable_dot_dir_filter, custom_blocklist, query) {
        out.push(child.clone());
        walk_inner(&child, depth_remaining - 1, enable_dot_dir_filter, custom_blocklist, query, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocklist_filters_default_noise_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let children = list_child_dirs(dir.path(), true, &[], "s");
        let names: Vec<String> = children
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"src".to_string()));
        assert!(!names.contains(&"node_modules".to_string()));
    }

    #[test]
    fn explicit_query_for_blocked_name_is_not_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();

        let children = list_child_dirs(dir.path(), true, &[], "node_modules");
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn partial_query_prefixing_a_blocked_name_is_not_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();

        let children = list_child_dirs(dir.path(), true, &[], "node_mod");
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn unrelated_query_still_filters_blocked_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let children = list_child_dirs(dir.path(), true, &[], "s");
        let names: Vec<String> = children
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&"src".to_string()));
        assert!(!names.contains(&"node_modules".to_string()));
    }

    #[test]
    fn dotfile_directories_hidden_unless_query_starts_with_dot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::create_dir(dir.path().join("visible")).unwrap();

        let hidden_out = list_child_dirs(dir.path(), true, &[], "v");
        assert_eq!(hidden_out.len(), 1);

        let shown = list_child_dirs(dir.path(), true, &[], ".h");
        assert!(shown.iter().any(|p| p.file_name().unwrap() == ".hidden"));
    }
}
