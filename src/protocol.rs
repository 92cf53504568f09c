//! Wire protocol between the shell plugin and the running engine: JSON
//! requests in, TSV responses out — grounded in the teacher's asymmetric
//! transport (`to_tsv`), kept because shell-side parsing of a flat TSV
//! line is simpler than JSON from a zsh/bash widget.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

// --- Requests (shell → engine) ---

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CommandExecuted(CommandExecutedReport),
    CwdChanged(CwdChangedReport),
    PredictInline(PredictInlineRequest),
    CompleteArgument(CompleteArgumentRequest),
    Navigate(NavigateRequest),
    GetStats,
    ClearLearning,
    ExportLearning,
    ImportLearning(ImportLearningRequest),
    RecordInteraction(RecordInteractionRequest),
    Ping,
    Shutdown,
}

#[derive(Debug, Deserialize)]
pub struct CommandExecutedReport {
    pub command_line: String,
    pub success: bool,
    pub cwd: String,
    #[serde(default)]
    pub previous_cwd: String,
}

#[derive(Debug, Deserialize)]
pub struct CwdChangedReport {
    pub session_id: String,
    pub cwd: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictInlineRequest {
    pub session_id: String,
    pub buffer: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteArgumentRequest {
    pub session_id: String,
    pub buffer: String,
    #[serde(default)]
    pub cursor: usize,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ImportLearningRequest {
    pub snapshot_json: String,
    #[serde(default)]
    pub merge: bool,
}

/// Reported by the shell widget after the user accepts or rejects a
/// previously shown suggestion.
#[derive(Debug, Deserialize)]
pub struct RecordInteractionRequest {
    pub session_id: String,
    pub action: InteractionAction,
    pub buffer: String,
    pub suggestion: String,
    pub source: SuggestionSource,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub cwd: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionAction {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSource {
    Known,
    Learned,
    Pcd,
}

impl SuggestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Known => "known",
            Self::Learned => "learned",
            Self::Pcd => "pcd",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    Argument,
    Flag,
    Directory,
    NextCommand,
}

impl CompletionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Argument => "argument",
            Self::Flag => "flag",
            Self::Directory => "directory",
            Self::NextCommand => "next_command",
        }
    }
}

// --- Responses (engine → shell) ---

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    InlineSuggestion { text: Option<String> },
    CompletionList(CompletionListResponse),
    NavigateResult { path: Option<String> },
    Stats(StatsResponse),
    Pong,
    Ack,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub completion_text: String,
    pub display_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    pub kind: CompletionKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionListResponse {
    pub results: Vec<CompletionResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub tracked_commands: usize,
    pub history_len: usize,
}

/// Sanitize a string for TSV transport: replace tabs with spaces,
/// newlines with a space, and strip carriage returns.
fn sanitize_tsv(s: &str) -> Cow<'_, str> {
    if s.contains(['\t', '\n', '\r']) {
        Cow::Owned(s.replace('\t', "    ").replace('\n', " ").replace('\r', ""))
    } else {
        Cow::Borrowed(s)
    }
}

impl Response {
    /// Serializes this response as a single TSV line (no trailing newline).
    pub fn to_tsv(&self) -> String {
        match self {
            Response::InlineSuggestion { text } => match text {
                Some(t) => format!("inline\t{}", sanitize_tsv(t)),
                None => "inline\t".to_string(),
            },
            Response::CompletionList(list) => {
                let mut out = format!("complete\t{}", list.results.len());
                for item in &list.results {
                    out.push('\t');
                    out.push_str(&sanitize_tsv(&item.completion_text));
                    out.push('\t');
                    out.push_str(&sanitize_tsv(&item.display_text));
                    out.push('\t');
                    out.push_str(&sanitize_tsv(item.tooltip.as_deref().unwrap_or("")));
                    out.push('\t');
                    out.push_str(item.kind.as_str());
                }
                out
            }
            Response::NavigateResult { path } => match path {
                Some(p) => format!("navigate\t{}", sanitize_tsv(p)),
                None => "navigate\t".to_string(),
            },
            Response::Stats(stats) => {
                format!("stats\t{}\t{}", stats.tracked_commands, stats.history_len)
            }
            Response::Pong => "pong".to_string(),
            Response::Ack => "ack".to_string(),
            Response::Error { message } => format!("error\t{}", sanitize_tsv(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_suggestion_serializes_to_tsv() {
        let response = Response::InlineSuggestion { text: Some("git status".into()) };
        assert_eq!(response.to_tsv(), "inline\tgit status");
    }

    #[test]
    fn tabs_and_newlines_are_sanitized() {
        let response = Response::Error { message: "bad\tinput\nhere".into() };
        assert_eq!(response.to_tsv(), "error\tbad    input here");
    }
}
