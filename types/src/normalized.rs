//! The normalized working document.
//!
//! [`NormalizedInput`] is created once per request, threaded through the
//! scanner chain by value, and frozen when the chain ends. The original
//! [`AuditRequest`] rides along behind an `Arc` and must never be mutated
//! downstream.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::request::{AuditRequest, ChunkSource};
use crate::views::InputViews;

/// Rough language classification used to pick claim-pattern tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageHint {
    Ko,
    En,
    #[default]
    Unknown,
}

/// A trimmed, non-empty prompt chunk in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalChunk {
    pub source: ChunkSource,
    pub text: String,
}

/// Canonicalized request content: trimmed text plus canonical-JSON renderings
/// of the tool traffic. The `*_json` fields are the hash substrate for tool
/// data and the parse source for tool-arg detectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalInput {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_chunks_canonical: Vec<CanonicalChunk>,
    pub tool_calls_json: String,
    pub tool_results_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

/// Cheap request-level features derived at normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFeatures {
    pub has_tool_calls: bool,
    pub has_tool_results: bool,
    /// Deduplicated, sorted tool names across calls and results.
    pub tool_names: Vec<String>,
    pub language_hint: LanguageHint,
    /// Character count of the canonical prompt; recomputed by sanitizers.
    pub prompt_length: usize,
}

/// The working document the scanner chain operates on.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub request_id: String,
    pub canonical: CanonicalInput,
    pub features: InputFeatures,
    /// Multi-view payload; attached at chain entry, carried across scanners.
    pub views: Option<InputViews>,
    /// The untouched original request.
    pub raw: Arc<AuditRequest>,
}

impl NormalizedInput {
    /// Recompute the prompt-length feature after a canonical update.
    pub fn refresh_prompt_length(&mut self) {
        self.features.prompt_length = self.canonical.prompt.chars().count();
    }

    /// The response text detectors should read: the revealed view when views
    /// are attached, otherwise the canonical response.
    #[must_use]
    pub fn response_for_detection(&self) -> Option<&str> {
        if let Some(views) = &self.views
            && let Some(response) = &views.response
        {
            return Some(response.revealed.as_str());
        }
        self.canonical.response_text.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::{CanonicalInput, InputFeatures, LanguageHint, NormalizedInput};
    use crate::request::AuditRequest;
    use crate::views::InputViews;
    use std::sync::Arc;

    fn sample() -> NormalizedInput {
        let canonical = CanonicalInput {
            prompt: "hello".into(),
            prompt_chunks_canonical: Vec::new(),
            tool_calls_json: "[]".into(),
            tool_results_json: "[]".into(),
            response_text: Some("ok".into()),
        };
        NormalizedInput {
            request_id: "r".into(),
            canonical: canonical.clone(),
            features: InputFeatures {
                has_tool_calls: false,
                has_tool_results: false,
                tool_names: Vec::new(),
                language_hint: LanguageHint::En,
                prompt_length: 5,
            },
            views: Some(InputViews::from_canonical(&canonical)),
            raw: Arc::new(AuditRequest::new("r", 0.0, "hello")),
        }
    }

    #[test]
    fn refresh_prompt_length_counts_chars() {
        let mut input = sample();
        input.canonical.prompt = "한글".into();
        input.refresh_prompt_length();
        assert_eq!(input.features.prompt_length, 2);
    }

    #[test]
    fn detection_response_prefers_revealed_view() {
        let mut input = sample();
        if let Some(views) = input.views.as_mut()
            && let Some(response) = views.response.as_mut()
        {
            response.revealed = "ok\nhidden".into();
        }
        assert_eq!(input.response_for_detection(), Some("ok\nhidden"));

        input.views = None;
        assert_eq!(input.response_for_detection(), Some("ok"));
    }
}
