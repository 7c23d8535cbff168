//! Session history: the per-turn record and the consumed store interface.
//!
//! The core never specifies storage; it consumes [`HistoryStore`] and ships
//! an in-memory implementation in the engine crate. Turns are appended only
//! after a decision is finalized, so a failed audit leaves no trace.

use serde::{Deserialize, Serialize};

use crate::decision::PolicyAction;
use crate::finding::RiskLevel;

/// One finalized turn in a session, as the policy escalator sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub request_id: String,
    pub created_at_ms: i64,
    pub action: PolicyAction,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub succeeded_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect_scanners: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect_tags: Option<Vec<String>>,
}

impl HistoryTurn {
    /// Whether this turn recorded any successful tool outcome.
    #[must_use]
    pub fn had_tool_success(&self) -> bool {
        !self.succeeded_tools.is_empty()
    }

    /// Whether a named detect scanner fired in this turn.
    #[must_use]
    pub fn fired(&self, scanner: &str) -> bool {
        self.detect_scanners
            .as_ref()
            .is_some_and(|names| names.iter().any(|name| name == scanner))
    }
}

/// Append-only per-session turn log with windowed reads.
///
/// Implementations must serialize `append`/`get_recent` per session and
/// return turns oldest first.
pub trait HistoryStore: Send + Sync {
    /// Up to `limit` most recent turns for a session, oldest → newest.
    fn get_recent(&self, session_id: &str, limit: usize) -> Vec<HistoryTurn>;

    /// Record a finalized turn.
    fn append(&self, session_id: &str, turn: HistoryTurn);
}
