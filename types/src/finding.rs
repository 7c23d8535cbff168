//! Findings: risk-scored observations emitted by scanners.
//!
//! Findings are plain values. The id is deterministic over
//! `(scanner, request id, key)` so replays of the same request produce the
//! same ids, which keeps evidence packages reproducible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::sha256_hex;
use crate::request::ChunkSource;
use crate::views::ViewKind;

/// Scanner stage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Sanitize,
    Enrich,
    Detect,
}

impl FindingKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FindingKind::Sanitize => "sanitize",
            FindingKind::Enrich => "enrich",
            FindingKind::Detect => "detect",
        }
    }
}

/// Risk grade with the ordinal ordering `none < low < medium < high < critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Parse a lowercase risk name; used by rule-pack and config loading.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(RiskLevel::None),
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which request field a finding points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetField {
    Prompt,
    PromptChunk,
    Response,
}

/// Location of a finding: field, view, and (for chunks) provenance + index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingTarget {
    pub field: TargetField,
    pub view: ViewKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ChunkSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl FindingTarget {
    #[must_use]
    pub fn prompt(view: ViewKind) -> Self {
        Self {
            field: TargetField::Prompt,
            view,
            source: None,
            chunk_index: None,
        }
    }

    #[must_use]
    pub fn chunk(index: usize, source: ChunkSource, view: ViewKind) -> Self {
        Self {
            field: TargetField::PromptChunk,
            view,
            source: Some(source),
            chunk_index: Some(index),
        }
    }

    #[must_use]
    pub fn response(view: ViewKind) -> Self {
        Self {
            field: TargetField::Response,
            view,
            source: None,
            chunk_index: None,
        }
    }

    /// Human-readable location, used in policy reasons.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.field {
            TargetField::Prompt => "prompt".to_string(),
            TargetField::Response => "response".to_string(),
            TargetField::PromptChunk => {
                let index = self.chunk_index.unwrap_or(0);
                match self.source {
                    Some(source) => format!("chunk[{index}]({})", source.as_str()),
                    None => format!("chunk[{index}]"),
                }
            }
        }
    }
}

/// Deterministic finding id: `f_` + first 20 hex digits of
/// `sha256(scanner + ":" + request_id + ":" + key)`.
#[must_use]
pub fn finding_id(scanner: &str, request_id: &str, key: &str) -> String {
    let digest = sha256_hex(&format!("{scanner}:{request_id}:{key}"));
    format!("f_{}", &digest[..20])
}

/// A single risk-scored observation with target, view, and evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub kind: FindingKind,
    pub scanner: String,
    /// Severity weight in `[0, 1]`.
    pub score: f64,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub summary: String,
    pub target: FindingTarget,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub evidence: serde_json::Map<String, Value>,
}

impl Finding {
    /// Build a finding with a deterministic id for `(scanner, request, key)`.
    #[must_use]
    pub fn new(
        kind: FindingKind,
        scanner: &str,
        request_id: &str,
        key: &str,
        risk: RiskLevel,
        score: f64,
        summary: impl Into<String>,
        target: FindingTarget,
    ) -> Self {
        Self {
            id: finding_id(scanner, request_id, key),
            kind,
            scanner: scanner.to_string(),
            score: score.clamp(0.0, 1.0),
            risk,
            tags: Vec::new(),
            summary: summary.into(),
            target,
            evidence: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, key: impl Into<String>, value: Value) -> Self {
        self.evidence.insert(key.into(), value);
        self
    }
}
