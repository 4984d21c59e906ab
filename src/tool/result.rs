// ABOUTME: ToolResult - what a tool hands back to the step engine: text the
// ABOUTME: model will read, an error flag, and structured metadata for observers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Outcome of one tool call as recorded in a run's step log.
///
/// `is_error` results are still fed back to the model; only `ToolError`s can
/// end a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,

    #[serde(default)]
    pub is_error: bool,

    /// Not shown to the model; carried on the bus (run ids, created files).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            metadata: BTreeMap::new(),
        }
    }

    /// A failure the model should see and may recover from.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// Attach a metadata entry. Values that fail to serialize are skipped.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.into(), v);
        }
        self
    }

    /// The content cut to at most `max_chars` characters, marked when shortened.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

impl Default for ToolResult {
    fn default() -> Self {
        Self::text("")
    }
}

/// Cut `text` to `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((idx, _)) => format!("{}... [truncated]", &text[..idx]),
    }
}
