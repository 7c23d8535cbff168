//! Policy evaluation and escalation (L3).
//!
//! `evaluate` is a pure function of (findings, config). Escalations adjust
//! the base decision afterwards: a high fact mismatch forces an immediate
//! block, and repeated contradiction signals across the session window
//! ratchet the action upward.

use std::collections::BTreeMap;

use schnabel_types::{
    AuditError, DecisionStats, Finding, HistoryTurn, PolicyAction, PolicyDecision, RiskLevel,
};

/// Scanners whose findings count as contradiction signals for escalation.
const CONTRADICTION_SCANNERS: [&str; 4] = [
    "history_contradiction",
    "history_flipflop",
    "tool_result_contradiction",
    "tool_result_fact_mismatch",
];

const FACT_MISMATCH_SCANNER: &str = "tool_result_fact_mismatch";

/// Policy thresholds. Validated before use; `policy_config_error` on
/// nonsense values.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    pub policy_id: String,
    /// Risk at or above which the action is `block`.
    pub block_at: RiskLevel,
    /// Risk at or above which the action is at least `challenge`.
    pub challenge_at: RiskLevel,
    pub challenge_score_sum_at: f64,
    pub warn_score_sum_at: f64,
    pub max_reasons: usize,
    /// History turns consulted by the repetition escalator.
    pub escalation_window: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_id: "schnabel-policy-v0".to_string(),
            block_at: RiskLevel::Critical,
            challenge_at: RiskLevel::High,
            challenge_score_sum_at: 0.9,
            warn_score_sum_at: 0.4,
            max_reasons: 5,
            escalation_window: 5,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.policy_id.trim().is_empty() {
            return Err(config_error("policyId must not be empty"));
        }
        if self.block_at < self.challenge_at {
            return Err(config_error("blockAt must be at or above challengeAt"));
        }
        for (name, value) in [
            ("challengeScoreSumAt", self.challenge_score_sum_at),
            ("warnScoreSumAt", self.warn_score_sum_at),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(config_error(format!("{name} must be finite and >= 0")));
            }
        }
        if self.max_reasons == 0 {
            return Err(config_error("maxReasons must be at least 1"));
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> AuditError {
    AuditError::PolicyConfig {
        reason: reason.into(),
    }
}

/// Confidence table keyed by final risk.
fn confidence_for(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Critical => 0.9,
        RiskLevel::High => 0.75,
        RiskLevel::Medium => 0.6,
        RiskLevel::Low => 0.55,
        RiskLevel::None => 0.7,
    }
}

/// Base evaluation: aggregate findings into stats, cascade thresholds into
/// an action, derive confidence, and format the top reasons.
#[must_use]
pub fn evaluate(findings: &[Finding], config: &PolicyConfig) -> PolicyDecision {
    let mut by_risk: BTreeMap<RiskLevel, usize> = BTreeMap::new();
    let mut max_score: f64 = 0.0;
    let mut score_sum: f64 = 0.0;
    let mut max_risk = RiskLevel::None;

    for finding in findings {
        *by_risk.entry(finding.risk).or_insert(0) += 1;
        max_score = max_score.max(finding.score);
        score_sum += finding.score;
        max_risk = max_risk.max(finding.risk);
    }

    let action = if max_risk >= config.block_at {
        PolicyAction::Block
    } else if max_risk >= config.challenge_at || score_sum >= config.challenge_score_sum_at {
        PolicyAction::Challenge
    } else if score_sum >= config.warn_score_sum_at {
        PolicyAction::AllowWithWarning
    } else {
        PolicyAction::Allow
    };

    let mut ranked: Vec<&Finding> = findings.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.risk.cmp(&a.risk))
    });
    let reasons: Vec<String> = ranked
        .iter()
        .take(config.max_reasons)
        .copied()
        .map(format_reason)
        .collect();

    PolicyDecision {
        policy_id: config.policy_id.clone(),
        action,
        risk: max_risk,
        confidence: confidence_for(max_risk),
        reasons,
        finding_ids: findings.iter().map(|finding| finding.id.clone()).collect(),
        stats: DecisionStats {
            total_findings: findings.len(),
            max_score,
            score_sum,
            by_risk,
        },
    }
}

fn format_reason(finding: &Finding) -> String {
    format!(
        "[{}|{}] {}: {}",
        finding.risk.as_str().to_uppercase(),
        finding.scanner,
        finding.target.describe(),
        finding.summary
    )
}

/// Post-hoc escalations over the base decision.
///
/// 1. Any `tool_result_fact_mismatch` finding at `high`+ forces a block at
///    critical risk.
/// 2. Otherwise contradiction-scanner occurrences in the recent window plus
///    the current turn ratchet the action: >= 3 forces a block, >= 2 forces
///    at least a challenge.
#[must_use]
pub fn apply_escalations(
    mut decision: PolicyDecision,
    findings: &[Finding],
    recent_turns: &[HistoryTurn],
    config: &PolicyConfig,
) -> PolicyDecision {
    let fact_mismatch = findings
        .iter()
        .any(|finding| finding.scanner == FACT_MISMATCH_SCANNER && finding.risk >= RiskLevel::High);
    if fact_mismatch {
        decision.action = PolicyAction::Block;
        decision.risk = RiskLevel::Critical;
        decision.confidence = decision.confidence.max(0.9);
        decision.reasons.insert(
            0,
            "[CRITICAL|policy] Tool-result fact mismatch forces an immediate block".to_string(),
        );
        decision.reasons.truncate(config.max_reasons);
        return decision;
    }

    let window = recent_turns
        .len()
        .saturating_sub(config.escalation_window);
    let historical: usize = recent_turns[window..]
        .iter()
        .map(|turn| {
            CONTRADICTION_SCANNERS
                .iter()
                .filter(|scanner| turn.fired(scanner))
                .count()
        })
        .sum();
    let current: usize = CONTRADICTION_SCANNERS
        .iter()
        .filter(|scanner| findings.iter().any(|finding| finding.scanner == **scanner))
        .count();
    let total = historical + current;

    if total >= 3 {
        decision.action = PolicyAction::Block;
        decision.risk = RiskLevel::Critical;
        decision.confidence = decision.confidence.max(0.85);
        decision.reasons.insert(
            0,
            format!(
                "[CRITICAL|policy] {total} contradiction signals across recent turns force a block"
            ),
        );
        decision.reasons.truncate(config.max_reasons);
    } else if total >= 2 {
        decision.action = decision.action.max(PolicyAction::Challenge);
        decision.risk = decision.risk.max(RiskLevel::High);
        decision.confidence = decision.confidence.max(0.75);
        decision.reasons.insert(
            0,
            format!(
                "[HIGH|policy] {total} contradiction signals across recent turns require a challenge"
            ),
        );
        decision.reasons.truncate(config.max_reasons);
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::{PolicyConfig, apply_escalations, evaluate};
    use schnabel_types::{
        Finding, FindingKind, FindingTarget, HistoryTurn, PolicyAction, RiskLevel, ViewKind,
    };

    fn finding(scanner: &str, risk: RiskLevel, score: f64) -> Finding {
        Finding::new(
            FindingKind::Detect,
            scanner,
            "req-policy",
            scanner,
            risk,
            score,
            format!("{scanner} fired"),
            FindingTarget::prompt(ViewKind::Revealed),
        )
    }

    fn turn_with(detect_scanners: &[&str]) -> HistoryTurn {
        HistoryTurn {
            request_id: "prev".to_string(),
            created_at_ms: 0,
            action: PolicyAction::Allow,
            risk: RiskLevel::None,
            succeeded_tools: Vec::new(),
            failed_tools: Vec::new(),
            response_snippet: None,
            rule_ids: None,
            categories: None,
            detect_scanners: Some(detect_scanners.iter().map(ToString::to_string).collect()),
            detect_tags: None,
        }
    }

    #[test]
    fn empty_findings_allow() {
        let decision = evaluate(&[], &PolicyConfig::default());
        assert_eq!(decision.action, PolicyAction::Allow);
        assert_eq!(decision.risk, RiskLevel::None);
        assert!((decision.confidence - 0.7).abs() < f64::EPSILON);
        assert_eq!(decision.stats.total_findings, 0);
    }

    #[test]
    fn cascade_thresholds() {
        let config = PolicyConfig::default();

        let challenge = evaluate(&[finding("a", RiskLevel::High, 0.2)], &config);
        assert_eq!(challenge.action, PolicyAction::Challenge);

        let warned = evaluate(&[finding("a", RiskLevel::Low, 0.5)], &config);
        assert_eq!(warned.action, PolicyAction::AllowWithWarning);

        let score_challenge = evaluate(
            &[
                finding("a", RiskLevel::Low, 0.5),
                finding("b", RiskLevel::Low, 0.5),
            ],
            &config,
        );
        assert_eq!(score_challenge.action, PolicyAction::Challenge);

        let blocked = evaluate(&[finding("a", RiskLevel::Critical, 0.9)], &config);
        assert_eq!(blocked.action, PolicyAction::Block);
    }

    #[test]
    fn reasons_are_ranked_and_capped() {
        let config = PolicyConfig {
            max_reasons: 2,
            ..Default::default()
        };
        let findings = vec![
            finding("low_scanner", RiskLevel::Low, 0.1),
            finding("top_scanner", RiskLevel::High, 0.9),
            finding("mid_scanner", RiskLevel::Medium, 0.5),
        ];
        let decision = evaluate(&findings, &config);
        assert_eq!(decision.reasons.len(), 2);
        assert!(decision.reasons[0].starts_with("[HIGH|top_scanner]"));
        assert!(decision.reasons[1].starts_with("[MEDIUM|mid_scanner]"));
        // findingIds keep emission order regardless of ranking.
        assert_eq!(decision.finding_ids.len(), 3);
    }

    #[test]
    fn evaluation_is_pure() {
        let findings = vec![finding("a", RiskLevel::Medium, 0.4)];
        let config = PolicyConfig::default();
        assert_eq!(evaluate(&findings, &config), evaluate(&findings, &config));
    }

    #[test]
    fn fact_mismatch_forces_block() {
        let config = PolicyConfig::default();
        let findings = vec![finding("tool_result_fact_mismatch", RiskLevel::High, 0.9)];
        let base = evaluate(&findings, &config);
        assert_eq!(base.action, PolicyAction::Challenge);

        let escalated = apply_escalations(base, &findings, &[], &config);
        assert_eq!(escalated.action, PolicyAction::Block);
        assert_eq!(escalated.risk, RiskLevel::Critical);
        assert!(escalated.confidence >= 0.9);
        assert!(escalated.reasons[0].starts_with("[CRITICAL|policy]"));
    }

    #[test]
    fn repeated_contradictions_ratchet_the_action() {
        let config = PolicyConfig::default();
        let findings = vec![finding("history_contradiction", RiskLevel::Medium, 0.6)];
        let base = evaluate(&findings, &config);
        assert_eq!(base.action, PolicyAction::AllowWithWarning);

        // One prior contradiction turn + current = 2 -> at least challenge.
        let turns = vec![turn_with(&["history_flipflop"])];
        let escalated = apply_escalations(base.clone(), &findings, &turns, &config);
        assert_eq!(escalated.action, PolicyAction::Challenge);
        assert!(escalated.risk >= RiskLevel::High);

        // Two prior contradiction signals + current = 3 -> block.
        let turns = vec![turn_with(&["history_flipflop", "history_contradiction"])];
        let escalated = apply_escalations(base, &findings, &turns, &config);
        assert_eq!(escalated.action, PolicyAction::Block);
        assert_eq!(escalated.risk, RiskLevel::Critical);
    }

    #[test]
    fn config_validation() {
        assert!(PolicyConfig::default().validate().is_ok());

        let bad_order = PolicyConfig {
            block_at: RiskLevel::Medium,
            challenge_at: RiskLevel::High,
            ..Default::default()
        };
        assert_eq!(
            bad_order.validate().expect_err("fails").kind(),
            "policy_config_error"
        );

        let bad_sum = PolicyConfig {
            warn_score_sum_at: f64::NAN,
            ..Default::default()
        };
        assert!(bad_sum.validate().is_err());

        let no_reasons = PolicyConfig {
            max_reasons: 0,
            ..Default::default()
        };
        assert!(no_reasons.validate().is_err());
    }
}
