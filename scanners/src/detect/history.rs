//! Session-history detectors: unsupported prior-success claims and
//! failure-to-success flip-flops.
//!
//! Both consult the session's recent turns through the consumed
//! [`HistoryStore`] interface; findings stay self-contained (no pointer back
//! into the store). Requests without a session id produce no findings.

use std::sync::Arc;

use serde_json::json;

use schnabel_types::{
    Finding, FindingKind, FindingTarget, HistoryStore, NormalizedInput, RiskLevel, ViewKind,
};

use crate::detect::claims;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const CONTRADICTION_NAME: &str = "history_contradiction";
pub(crate) const FLIPFLOP_NAME: &str = "history_flipflop";

pub(crate) const DEFAULT_WINDOW: usize = 5;

/// Flags responses that claim something was already done in a previous turn
/// when no turn in the window recorded a successful tool outcome.
pub struct HistoryContradiction {
    store: Arc<dyn HistoryStore>,
    window: usize,
}

impl HistoryContradiction {
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self { store, window }
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();

        if let Some(session) = input.raw.session_id()
            && let Some(response) = input.response_for_detection()
            && let Some(claim) = claims::prior_success_claim(response)
        {
            let turns = self.store.get_recent(session, self.window);
            let supported = turns.iter().any(schnabel_types::HistoryTurn::had_tool_success);
            if !supported {
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        CONTRADICTION_NAME,
                        &input.request_id,
                        "history:contradiction",
                        RiskLevel::Medium,
                        0.6,
                        "Response claims prior success with no supporting tool outcome",
                        FindingTarget::response(ViewKind::Revealed),
                    )
                    .with_tag("contradiction")
                    .with_evidence("claim", json!(claim))
                    .with_evidence("windowSize", json!(self.window))
                    .with_evidence("turnsExamined", json!(turns.len())),
                );
            }
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for HistoryContradiction {
    fn name(&self) -> &'static str {
        CONTRADICTION_NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Detect
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { Ok(self.execute(input)) })
    }
}

/// Flags a success claim immediately after a turn with failure evidence
/// (a failed tool or a failure-claiming response).
pub struct HistoryFlipFlop {
    store: Arc<dyn HistoryStore>,
    window: usize,
}

impl HistoryFlipFlop {
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self { store, window }
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();

        if let Some(session) = input.raw.session_id()
            && let Some(response) = input.response_for_detection()
        {
            let claim =
                claims::success_claim(response).or_else(|| claims::prior_success_claim(response));
            if let Some(claim) = claim {
                let turns = self.store.get_recent(session, self.window);
                if let Some(previous) = turns.last() {
                    let failed_tool = !previous.failed_tools.is_empty();
                    let failure_snippet = previous
                        .response_snippet
                        .as_deref()
                        .is_some_and(|snippet| claims::failure_claim(snippet).is_some());
                    if failed_tool || failure_snippet {
                        findings.push(
                            Finding::new(
                                FindingKind::Detect,
                                FLIPFLOP_NAME,
                                &input.request_id,
                                "history:flipflop",
                                RiskLevel::High,
                                0.85,
                                "Response claims success right after a failed turn",
                                FindingTarget::response(ViewKind::Revealed),
                            )
                            .with_tag("contradiction")
                            .with_evidence("claim", json!(claim))
                            .with_evidence("previousRequestId", json!(previous.request_id))
                            .with_evidence("previousFailedTools", json!(previous.failed_tools)),
                        );
                    }
                }
            }
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for HistoryFlipFlop {
    fn name(&self) -> &'static str {
        FLIPFLOP_NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Detect
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { Ok(self.execute(input)) })
    }
}
