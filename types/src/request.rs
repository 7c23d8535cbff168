//! The audit request envelope.
//!
//! [`AuditRequest`] is the wire shape ingress adapters produce. It is treated
//! as immutable after creation: the normalizer keeps it behind an `Arc` and
//! nothing downstream writes through it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Origin class of a prompt fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    User,
    System,
    Developer,
    Retrieval,
    Tool,
    Assistant,
    #[default]
    Unknown,
}

impl ChunkSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkSource::User => "user",
            ChunkSource::System => "system",
            ChunkSource::Developer => "developer",
            ChunkSource::Retrieval => "retrieval",
            ChunkSource::Tool => "tool",
            ChunkSource::Assistant => "assistant",
            ChunkSource::Unknown => "unknown",
        }
    }
}

/// A provenance-tagged fragment of the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptChunk {
    #[serde(default)]
    pub source: ChunkSource,
    pub text: String,
}

impl PromptChunk {
    #[must_use]
    pub fn new(source: ChunkSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

/// Caller identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A tool invocation as observed by the runtime. Args are untyped JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRecord {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
        }
    }
}

/// The observed outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    pub tool_name: String,
    pub ok: bool,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

impl ToolResultRecord {
    #[must_use]
    pub fn new(tool_name: impl Into<String>, ok: bool, result: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            ok,
            result,
            latency_ms: None,
        }
    }
}

/// One turn's worth of audit input: prompt, provenance-tagged chunks, tool
/// traffic, and response text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    /// Caller-assigned id, non-empty and at most 255 characters.
    pub request_id: String,
    /// Epoch milliseconds; must be finite and non-negative.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_chunks: Option<Vec<PromptChunk>>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl AuditRequest {
    /// Minimal request with just an id, timestamp, and prompt.
    #[must_use]
    pub fn new(request_id: impl Into<String>, timestamp: f64, prompt: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp,
            actor: None,
            model: None,
            prompt: prompt.into(),
            prompt_chunks: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            response_text: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Session id from the actor block, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.actor.as_ref()?.session_id.as_deref()
    }
}
