//! The `run_audit` orchestrator.
//!
//! Wires normalize → views → scan → policy → evidence, applies dump
//! decisions, and appends the session turn. Failure semantics per the error
//! contract: a failed audit appends nothing to history, produces no package,
//! and is never retried here.

use std::sync::Arc;

use schnabel_types::{
    AuditError, AuditRequest, Finding, FindingKind, HistoryStore, HistoryTurn, NormalizedInput,
    PolicyAction, PolicyDecision, sha256_hex, truncate_with_ellipsis,
};

use schnabel_scanners::Scanner;

use crate::chain::{ScanMetric, ScanOptions, scan};
use crate::evidence::{EvidencePackage, ScannerInfo, build_evidence};
use crate::normalize::normalize;
use crate::policy::{PolicyConfig, apply_escalations, evaluate};
use crate::views::ensure_views;

const RESPONSE_SNIPPET_CHARS: usize = 160;

/// When evidence/policy artifacts should be handed to external writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpMode {
    Never,
    /// Challenge/block only (plus warnings when configured as incidents),
    /// with rate-based sampling below that.
    #[default]
    Incidents,
    All,
}

/// Dump configuration forwarded to external collaborators.
#[derive(Debug, Clone)]
pub struct DumpPolicy {
    pub evidence: DumpMode,
    pub policy: DumpMode,
    /// Sampling rate for plain allows under `Incidents`.
    pub sample_allow_rate: f64,
    /// Sampling rate for warnings under `Incidents`.
    pub sample_warn_rate: f64,
    pub seed: u64,
    /// Whether `allow_with_warning` counts as an incident. Default: no.
    pub warn_counts_as_incident: bool,
}

impl Default for DumpPolicy {
    fn default() -> Self {
        Self {
            evidence: DumpMode::Incidents,
            policy: DumpMode::Incidents,
            sample_allow_rate: 0.0,
            sample_warn_rate: 0.0,
            seed: 0,
            warn_counts_as_incident: false,
        }
    }
}

/// The dump verdicts for one audited turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpDecision {
    pub evidence: bool,
    pub policy: bool,
}

/// Options for [`run_audit`].
pub struct AuditOptions {
    pub scan: ScanOptions,
    pub policy: PolicyConfig,
    pub history: Option<Arc<dyn HistoryStore>>,
    /// Caller character cap on the prompt, on top of the 1 MiB byte cap.
    pub max_prompt_length: Option<usize>,
    pub dump: DumpPolicy,
    /// Close every scanner after the run (releases pack watchers).
    pub auto_close_scanners: bool,
    /// Include raw-text previews in the evidence digests.
    pub include_previews: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            policy: PolicyConfig::default(),
            history: None,
            max_prompt_length: None,
            dump: DumpPolicy::default(),
            auto_close_scanners: false,
            include_previews: true,
        }
    }
}

/// Everything a caller gets back from one audited turn.
#[derive(Debug)]
pub struct AuditOutcome {
    /// The working document as frozen at chain end.
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
    pub metrics: Vec<ScanMetric>,
    pub decision: PolicyDecision,
    pub evidence: EvidencePackage,
    pub dump: DumpDecision,
    /// The turn appended to history, when a store and session were present.
    pub turn: Option<HistoryTurn>,
}

/// Audit one turn end to end.
pub async fn run_audit(
    request: AuditRequest,
    scanners: &[Box<dyn Scanner>],
    options: &AuditOptions,
) -> Result<AuditOutcome, AuditError> {
    options.policy.validate()?;

    let result = run_pipeline(request, scanners, options).await;
    if options.auto_close_scanners {
        for scanner in scanners {
            scanner.close();
        }
    }
    result
}

async fn run_pipeline(
    request: AuditRequest,
    scanners: &[Box<dyn Scanner>],
    options: &AuditOptions,
) -> Result<AuditOutcome, AuditError> {
    let normalized = ensure_views(normalize(request, options.max_prompt_length)?);
    let normalized_canonical = normalized.canonical.clone();

    let outcome = scan(normalized, scanners, &options.scan).await?;

    let session_id = outcome
        .input
        .raw
        .session_id()
        .map(ToString::to_string);
    let recent_turns = match (&options.history, &session_id) {
        (Some(store), Some(session)) => store.get_recent(session, options.policy.escalation_window),
        _ => Vec::new(),
    };

    let base = evaluate(&outcome.findings, &options.policy);
    let decision = apply_escalations(base, &outcome.findings, &recent_turns, &options.policy);

    let scanner_infos: Vec<ScannerInfo> = outcome
        .metrics
        .iter()
        .map(|metric| ScannerInfo {
            name: metric.scanner.clone(),
            kind: metric.kind,
        })
        .collect();

    let generated_at_ms = chrono::Utc::now().timestamp_millis();
    let evidence = build_evidence(
        &normalized_canonical,
        &outcome.input,
        scanner_infos,
        &outcome.findings,
        &decision,
        generated_at_ms,
        options.include_previews,
    )?;

    let dump = DumpDecision {
        evidence: should_dump(
            options.dump.evidence,
            &options.dump,
            &decision,
            &outcome.input.request_id,
        ),
        policy: should_dump(
            options.dump.policy,
            &options.dump,
            &decision,
            &outcome.input.request_id,
        ),
    };

    let turn = build_turn(&outcome.input, &outcome.findings, &decision, generated_at_ms);
    let appended = match (&options.history, &session_id) {
        (Some(store), Some(session)) => {
            store.append(session, turn.clone());
            Some(turn)
        }
        _ => None,
    };

    tracing::debug!(
        request_id = %outcome.input.request_id,
        action = %decision.action,
        risk = %decision.risk,
        findings = outcome.findings.len(),
        "audit complete"
    );

    Ok(AuditOutcome {
        input: outcome.input,
        findings: outcome.findings,
        metrics: outcome.metrics,
        decision,
        evidence,
        dump,
        turn: appended,
    })
}

fn should_dump(
    mode: DumpMode,
    policy: &DumpPolicy,
    decision: &PolicyDecision,
    request_id: &str,
) -> bool {
    match mode {
        DumpMode::Never => false,
        DumpMode::All => true,
        DumpMode::Incidents => match decision.action {
            PolicyAction::Challenge | PolicyAction::Block => true,
            PolicyAction::AllowWithWarning => {
                policy.warn_counts_as_incident
                    || sample_fraction(policy.seed, request_id, "warn") < policy.sample_warn_rate
            }
            PolicyAction::Allow => {
                sample_fraction(policy.seed, request_id, "allow") < policy.sample_allow_rate
            }
        },
    }
}

/// Deterministic sampling fraction in [0, 1): a pure function of
/// `(seed, request_id, bucket)`, stable across runs and platforms.
fn sample_fraction(seed: u64, request_id: &str, bucket: &str) -> f64 {
    let digest = sha256_hex(&format!("{seed}:{request_id}:{bucket}"));
    let slice = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    (slice as f64) / (u64::MAX as f64)
}

fn build_turn(
    input: &NormalizedInput,
    findings: &[Finding],
    decision: &PolicyDecision,
    created_at_ms: i64,
) -> HistoryTurn {
    let succeeded_tools: Vec<String> = input
        .raw
        .tool_results
        .iter()
        .filter(|result| result.ok)
        .map(|result| result.tool_name.clone())
        .collect();
    let failed_tools: Vec<String> = input
        .raw
        .tool_results
        .iter()
        .filter(|result| !result.ok)
        .map(|result| result.tool_name.clone())
        .collect();

    let response_snippet = input
        .canonical
        .response_text
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(|text| truncate_with_ellipsis(text, RESPONSE_SNIPPET_CHARS));

    let rule_ids = sorted_unique(findings.iter().filter_map(|finding| {
        finding
            .evidence
            .get("ruleId")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
    }));
    let categories = sorted_unique(findings.iter().filter_map(|finding| {
        finding
            .evidence
            .get("category")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string)
    }));
    let detect_scanners = sorted_unique(
        findings
            .iter()
            .filter(|finding| finding.kind == FindingKind::Detect)
            .map(|finding| finding.scanner.clone()),
    );
    let detect_tags = sorted_unique(
        findings
            .iter()
            .filter(|finding| finding.kind == FindingKind::Detect)
            .flat_map(|finding| finding.tags.iter().cloned()),
    );

    HistoryTurn {
        request_id: input.request_id.clone(),
        created_at_ms,
        action: decision.action,
        risk: decision.risk,
        succeeded_tools,
        failed_tools,
        response_snippet,
        rule_ids,
        categories,
        detect_scanners,
        detect_tags,
    }
}

fn sorted_unique(values: impl Iterator<Item = String>) -> Option<Vec<String>> {
    let mut collected: Vec<String> = values.collect();
    collected.sort_unstable();
    collected.dedup();
    (!collected.is_empty()).then_some(collected)
}

#[cfg(test)]
mod tests {
    use super::{DumpMode, DumpPolicy, sample_fraction, should_dump};
    use crate::policy::{PolicyConfig, evaluate};
    use schnabel_types::{Finding, FindingKind, FindingTarget, PolicyAction, RiskLevel, ViewKind};

    #[test]
    fn sampling_is_stable_per_tuple() {
        let first = sample_fraction(7, "req-1", "allow");
        let second = sample_fraction(7, "req-1", "allow");
        assert!((first - second).abs() < f64::EPSILON);
        assert!((0.0..1.0).contains(&first));
        // Different buckets and seeds move the draw.
        assert_ne!(first, sample_fraction(7, "req-1", "warn"));
        assert_ne!(first, sample_fraction(8, "req-1", "allow"));
    }

    #[test]
    fn incidents_mode_dumps_challenges() {
        let finding = Finding::new(
            FindingKind::Detect,
            "keyword_injection",
            "req",
            "k",
            RiskLevel::High,
            0.9,
            "s",
            FindingTarget::prompt(ViewKind::Revealed),
        );
        let decision = evaluate(std::slice::from_ref(&finding), &PolicyConfig::default());
        assert_eq!(decision.action, PolicyAction::Challenge);

        let policy = DumpPolicy::default();
        assert!(should_dump(DumpMode::Incidents, &policy, &decision, "req"));
        assert!(!should_dump(DumpMode::Never, &policy, &decision, "req"));
    }

    #[test]
    fn plain_allow_respects_sampling_rates() {
        let decision = evaluate(&[], &PolicyConfig::default());
        let mut policy = DumpPolicy::default();
        assert!(!should_dump(DumpMode::Incidents, &policy, &decision, "req"));

        policy.sample_allow_rate = 1.0;
        assert!(should_dump(DumpMode::Incidents, &policy, &decision, "req"));
    }
}
