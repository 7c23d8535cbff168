//! Policy verdicts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::finding::RiskLevel;

/// Advisory verdict with the ordinal ordering
/// `allow < allow_with_warning < challenge < block`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    #[default]
    Allow,
    AllowWithWarning,
    Challenge,
    Block,
}

impl PolicyAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::AllowWithWarning => "allow_with_warning",
            PolicyAction::Challenge => "challenge",
            PolicyAction::Block => "block",
        }
    }
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate finding statistics backing a decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionStats {
    pub total_findings: usize,
    pub max_score: f64,
    pub score_sum: f64,
    /// Finding counts by risk; absent risks are omitted.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_risk: BTreeMap<RiskLevel, usize>,
}

/// The rendered policy verdict for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub policy_id: String,
    pub action: PolicyAction,
    pub risk: RiskLevel,
    /// Confidence in `[0, 1]`, derived from the final risk.
    pub confidence: f64,
    /// Ordered, human-readable `[RISK|scanner] where: summary` lines.
    pub reasons: Vec<String>,
    pub finding_ids: Vec<String>,
    pub stats: DecisionStats,
}
