//! Core domain types for Schnabel.
//!
//! This crate contains pure domain types with no IO and no async: the audit
//! request envelope, the normalized working document, the four-view text
//! representation, findings, policy decisions, history turns, and the
//! canonical-JSON/hashing substrate everything else builds on. Everything
//! here can be used from any layer of the pipeline.

mod canonical;
mod decision;
mod error;
mod finding;
mod history;
mod normalized;
mod request;
mod views;

pub use canonical::{canonical_json, canonicalize, sha256_canonical_json, sha256_hex};
pub use decision::{DecisionStats, PolicyAction, PolicyDecision};
pub use error::AuditError;
pub use finding::{Finding, FindingKind, FindingTarget, RiskLevel, TargetField, finding_id};
pub use history::{HistoryStore, HistoryTurn};
pub use normalized::{CanonicalChunk, CanonicalInput, InputFeatures, LanguageHint, NormalizedInput};
pub use request::{Actor, AuditRequest, ChunkSource, PromptChunk, ToolCallRecord, ToolResultRecord};
pub use views::{ChunkViews, InputViews, ViewKind, ViewSet};

/// Truncate a string for display, adding "..." if truncated.
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}
