//! Tool-argument canonicalizer.
//!
//! Applies the Unicode cleanup to every string leaf of the tool-call args
//! (without trimming - whitespace may be semantic in arguments) and rewrites
//! `canonical.toolCallsJson` through the canonicalizer. One finding per
//! request when any leaf changed.

use serde_json::{Value, json};

use schnabel_types::{
    Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind, canonicalize,
};

use crate::sanitize::unicode::clean_text;
use crate::walk::map_strings;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "tool_args_canonicalizer";

/// Sanitize stage cleaning string leaves inside tool-call arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolArgsCanonicalizer;

impl ToolArgsCanonicalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut updated = input.clone();

        let Some(mut calls) = parse_tool_calls(&updated) else {
            return ScannerOutput::unchanged(updated);
        };

        let mut removed_invisible = 0;
        let mut removed_bidi = 0;
        let mut changed_paths: Vec<String> = Vec::new();

        let changed = map_strings(&mut calls, &mut |path, text| {
            let (cleaned, stats) = clean_text(text, false);
            if cleaned == text {
                return None;
            }
            removed_invisible += stats.removed_invisible;
            removed_bidi += stats.removed_bidi;
            if changed_paths.len() < 8 {
                changed_paths.push(path.to_string());
            }
            Some(cleaned)
        });

        if changed == 0 {
            return ScannerOutput::unchanged(updated);
        }

        updated.canonical.tool_calls_json = canonicalize(&calls);

        let (risk, score) = if removed_invisible + removed_bidi > 0 {
            (RiskLevel::Medium, 0.5)
        } else {
            (RiskLevel::Low, 0.2)
        };
        let finding = Finding::new(
            FindingKind::Sanitize,
            NAME,
            &updated.request_id,
            "toolArgs",
            risk,
            score,
            format!("Cleaned {changed} tool-argument string leaves"),
            FindingTarget::prompt(ViewKind::Raw),
        )
        .with_evidence("changedLeafCount", json!(changed))
        .with_evidence("removedInvisibleCount", json!(removed_invisible))
        .with_evidence("removedBidiCount", json!(removed_bidi))
        .with_evidence("changedPaths", json!(changed_paths));

        ScannerOutput {
            input: updated,
            findings: vec![finding],
        }
    }
}

/// Parse the canonical tool-call JSON, falling back to the raw list when the
/// canonical text is unparseable.
pub(crate) fn parse_tool_calls(input: &NormalizedInput) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(&input.canonical.tool_calls_json)
        && value.is_array()
    {
        return Some(value);
    }
    serde_json::to_value(&input.raw.tool_calls).ok()
}

impl Scanner for ToolArgsCanonicalizer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Sanitize
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { Ok(self.execute(input)) })
    }
}

#[cfg(test)]
mod tests {
    use super::ToolArgsCanonicalizer;
    use crate::Scanner;
    use crate::test_support::doc_from_request;
    use schnabel_types::{AuditRequest, RiskLevel, ToolCallRecord};
    use serde_json::json;

    #[tokio::test]
    async fn cleans_leaves_and_rewrites_canonical_json() {
        let mut request = AuditRequest::new("req-args", 0.0, "p");
        request.tool_calls = vec![ToolCallRecord::new(
            "files.read",
            json!({"path": "/tmp/x\u{200B}y", "note": "  keep spaces  "}),
        )];
        let doc = doc_from_request(request);
        let output = ToolArgsCanonicalizer::new().run(&doc).await.expect("runs");

        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.risk, RiskLevel::Medium);
        assert_eq!(finding.evidence["changedLeafCount"], 1);
        assert!(output.input.canonical.tool_calls_json.contains("/tmp/xy"));
        // Whitespace is preserved: leaves are not trimmed.
        assert!(
            output
                .input
                .canonical
                .tool_calls_json
                .contains("  keep spaces  ")
        );
    }

    #[tokio::test]
    async fn clean_args_pass_through() {
        let mut request = AuditRequest::new("req-args", 0.0, "p");
        request.tool_calls = vec![ToolCallRecord::new("files.read", json!({"path": "/tmp/x"}))];
        let doc = doc_from_request(request);
        let before = doc.canonical.tool_calls_json.clone();
        let output = ToolArgsCanonicalizer::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
        assert_eq!(output.input.canonical.tool_calls_json, before);
    }
}
