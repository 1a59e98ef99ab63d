//! Backend trait — the abstraction over the remote multimodal
//! inference backend.
//!
//! The backend is a capability: it accepts file bytes (`upload`),
//! counts tokens for uploaded or inline content, creates TTL-bound
//! context caches over sets of uploaded files, and answers turn
//! requests that reference a cache handle plus the plain-text
//! transcript. Turn responses carry either a direct answer or tool-call
//! requests the orchestrator must satisfy before the turn completes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::artifact::RemoteFile;
use crate::error::BackendError;
use crate::message::{Message, MessageToolCall};

/// A handle to a remote context cache object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHandle(pub String);

impl std::fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much intermediate deliberation the backend performs before
/// answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningDepth {
    Minimal,
    #[default]
    Low,
    Medium,
    High,
}

impl ReasoningDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningDepth::Minimal => "minimal",
            ReasoningDepth::Low => "low",
            ReasoningDepth::Medium => "medium",
            ReasoningDepth::High => "high",
        }
    }
}

impl std::str::FromStr for ReasoningDepth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Ok(ReasoningDepth::Minimal),
            "low" => Ok(ReasoningDepth::Low),
            "medium" => Ok(ReasoningDepth::Medium),
            "high" => Ok(ReasoningDepth::High),
            other => Err(format!(
                "reasoning depth must be one of minimal/low/medium/high, got: {other}"
            )),
        }
    }
}

/// A tool definition sent to the backend so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Content submitted for token counting: remote file references and/or
/// inline text blocks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<RemoteFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub texts: Vec<String>,
}

impl CountRequest {
    pub fn for_file(file: RemoteFile) -> Self {
        Self { files: vec![file], texts: Vec::new() }
    }
}

/// One conversational turn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// The model to use
    pub model: String,

    /// System prompt for this turn (default or slash-command preset)
    pub system_prompt: String,

    /// Transcript so far plus the current user message, as plain text.
    /// Never part of the cache.
    pub messages: Vec<Message>,

    /// Context cache holding all attached files' content, when valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<CacheHandle>,

    /// Degraded-mode fallback: attach these remote handles inline when
    /// no cache handle is available
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_files: Vec<RemoteFile>,

    /// Tools the backend may call during this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Requested reasoning depth
    #[serde(default)]
    pub reasoning_depth: ReasoningDepth,
}

/// Token usage information reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A complete response to one turn request. Either a direct answer
/// (`tool_calls` empty) or a request to execute tools and resubmit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Generated text, possibly empty when only tool calls were issued
    pub text: String,

    /// Tool invocations the backend wants executed before it can finish
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// The remote multimodal backend capability.
///
/// The ingestion pipeline calls `upload`/`count_tokens`, the cache
/// manager calls `create_cache`/`delete_cache`, and the orchestrator
/// calls `generate` — none of them know which concrete backend is in
/// use.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "gemini").
    fn name(&self) -> &str;

    /// Upload raw bytes; returns a remote handle once the backend has
    /// accepted and processed them.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> std::result::Result<RemoteFile, BackendError>;

    /// Count tokens for the given content.
    async fn count_tokens(&self, request: CountRequest) -> std::result::Result<u64, BackendError>;

    /// Create a TTL-bound context cache over the given remote files.
    async fn create_cache(
        &self,
        model: &str,
        files: &[RemoteFile],
        ttl: Duration,
    ) -> std::result::Result<CacheHandle, BackendError>;

    /// Delete a context cache. Best-effort; callers may ignore failures
    /// at session teardown.
    async fn delete_cache(&self, handle: &CacheHandle) -> std::result::Result<(), BackendError>;

    /// Drive one request of a conversational turn.
    async fn generate(&self, request: TurnRequest) -> std::result::Result<TurnResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_depth_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<ReasoningDepth>().unwrap(), ReasoningDepth::High);
        assert_eq!(" medium ".parse::<ReasoningDepth>().unwrap(), ReasoningDepth::Medium);
        assert!("extreme".parse::<ReasoningDepth>().is_err());
    }

    #[test]
    fn reasoning_depth_default_is_low() {
        assert_eq!(ReasoningDepth::default(), ReasoningDepth::Low);
    }

    #[test]
    fn turn_request_serializes_without_empty_fields() {
        let req = TurnRequest {
            model: "test-model".into(),
            system_prompt: "You are helpful.".into(),
            messages: vec![],
            cached_content: None,
            inline_files: vec![],
            tools: vec![],
            reasoning_depth: ReasoningDepth::Low,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("cached_content"));
        assert!(!json.contains("inline_files"));
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "generate_chart".into(),
            description: "Render a chart from data".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "chart_type": { "type": "string" }
                },
                "required": ["chart_type"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("generate_chart"));
        assert!(json.contains("chart_type"));
    }
}
