//! Tool-outcome vs response-claim contradiction.

use serde_json::json;

use schnabel_types::{Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind};

use crate::detect::claims;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "tool_result_contradiction";

/// Flags responses whose claims contradict the recorded tool outcomes:
/// a failed tool with a success claim is high risk; a successful tool with
/// an unqualified failure claim is medium.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolResultContradiction;

impl ToolResultContradiction {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();
        let results = &input.raw.tool_results;
        let response = input.response_for_detection();

        if let Some(response) = response
            && !results.is_empty()
        {
            let failed: Vec<&str> = results
                .iter()
                .filter(|result| !result.ok)
                .map(|result| result.tool_name.as_str())
                .collect();
            let succeeded: Vec<&str> = results
                .iter()
                .filter(|result| result.ok)
                .map(|result| result.tool_name.as_str())
                .collect();

            let success_claim = claims::success_claim(response);
            let failure_claim = claims::failure_claim(response);

            if !failed.is_empty()
                && let Some(claim) = success_claim
            {
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        "contradiction:success-claim",
                        RiskLevel::High,
                        0.8,
                        "Response claims success but a tool call failed",
                        FindingTarget::response(ViewKind::Revealed),
                    )
                    .with_tag("contradiction")
                    .with_evidence("failedTools", json!(failed))
                    .with_evidence("claim", json!(claim)),
                );
            } else if !succeeded.is_empty()
                && success_claim.is_none()
                && let Some(claim) = failure_claim
            {
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        "contradiction:failure-claim",
                        RiskLevel::Medium,
                        0.5,
                        "Response claims failure despite a successful tool call",
                        FindingTarget::response(ViewKind::Revealed),
                    )
                    .with_tag("contradiction")
                    .with_evidence("succeededTools", json!(succeeded))
                    .with_evidence("claim", json!(claim)),
                );
            }
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for ToolResultContradiction {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Detect
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { Ok(self.execute(input)) })
    }
}

#[cfg(test)]
mod tests {
    use super::ToolResultContradiction;
    use crate::Scanner;
    use crate::test_support::doc_from_request;
    use schnabel_types::{AuditRequest, NormalizedInput, RiskLevel, ToolResultRecord};
    use serde_json::json;

    fn doc(ok: bool, response: &str) -> NormalizedInput {
        let mut request = AuditRequest::new("req-contra", 0.0, "p");
        request.tool_results = vec![ToolResultRecord::new("wallet.transfer", ok, json!({}))];
        request.response_text = Some(response.to_string());
        doc_from_request(request)
    }

    #[tokio::test]
    async fn failed_tool_plus_success_claim_is_high() {
        let doc = doc(false, "The transfer completed successfully.");
        let output = ToolResultContradiction::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].risk, RiskLevel::High);
        assert_eq!(
            output.findings[0].evidence["failedTools"],
            json!(["wallet.transfer"])
        );
    }

    #[tokio::test]
    async fn succeeded_tool_plus_failure_claim_is_medium() {
        let doc = doc(true, "Sorry, the operation failed.");
        let output = ToolResultContradiction::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].risk, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn mixed_outcomes_with_failure_claim_still_fire_medium() {
        // One ok=true result is enough; other failed results don't mask it.
        let mut request = AuditRequest::new("req-contra", 0.0, "p");
        request.tool_results = vec![
            ToolResultRecord::new("wallet.transfer", true, json!({})),
            ToolResultRecord::new("wallet.notify", false, json!({})),
        ];
        request.response_text = Some("Sorry, that failed.".to_string());
        let doc = doc_from_request(request);
        let output = ToolResultContradiction::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].risk, RiskLevel::Medium);
        assert_eq!(
            output.findings[0].evidence["succeededTools"],
            json!(["wallet.transfer"])
        );
    }

    #[tokio::test]
    async fn mixed_claim_with_success_word_does_not_double_fire() {
        // "failed" appears but so does a success claim; with ok=true this is
        // not an unqualified failure claim.
        let doc = doc(true, "Retried after it failed once; now completed successfully.");
        let output = ToolResultContradiction::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
    }

    #[tokio::test]
    async fn consistent_outcomes_are_clean() {
        let doc1 = doc(true, "The transfer completed successfully.");
        let output1 = ToolResultContradiction::new().run(&doc1).await.expect("runs");
        assert!(output1.findings.is_empty());

        let doc2 = doc(false, "The transfer failed, please retry.");
        let output2 = ToolResultContradiction::new().run(&doc2).await.expect("runs");
        assert!(output2.findings.is_empty());
    }

    #[tokio::test]
    async fn no_tools_means_no_findings() {
        let mut request = AuditRequest::new("req-contra", 0.0, "p");
        request.response_text = Some("completed successfully".to_string());
        let doc = doc_from_request(request);
        let output = ToolResultContradiction::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
    }
}
