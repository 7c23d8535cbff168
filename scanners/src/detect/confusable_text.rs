//! UTS#39 confusable-text detection.
//!
//! For the prompt and each chunk: mixed Latin/Cyrillic/Greek script is high
//! risk (classic homoglyph spoofing); otherwise a skeleton that diverges from
//! the NFKC text is medium (confusable characters present without an outright
//! script mix).

use serde_json::json;
use unicode_normalization::UnicodeNormalization;
use unicode_script::{Script, UnicodeScript};

use schnabel_types::{
    Finding, FindingKind, NormalizedInput, RiskLevel, ViewKind, truncate_with_ellipsis,
};

use crate::confusables::confusables_table;
use crate::{ScanFut, Scanner, ScannerOutput, TargetMeta, effective_views, iter_targets};

pub(crate) const NAME: &str = "uts39_confusables";

fn scripts_present(text: &str) -> Vec<Script> {
    let mut has_latin = false;
    let mut has_cyrillic = false;
    let mut has_greek = false;
    for ch in text.chars() {
        match ch.script() {
            Script::Latin => has_latin = true,
            Script::Cyrillic => has_cyrillic = true,
            Script::Greek => has_greek = true,
            _ => {}
        }
    }
    let mut scripts = Vec::new();
    if has_latin {
        scripts.push(Script::Latin);
    }
    if has_cyrillic {
        scripts.push(Script::Cyrillic);
    }
    if has_greek {
        scripts.push(Script::Greek);
    }
    scripts
}

/// Detect stage flagging confusable or mixed-script prompt text.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfusableText;

impl ConfusableText {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> Result<ScannerOutput, schnabel_types::AuditError> {
        let table = confusables_table()?;
        let views = effective_views(input);
        let mut findings = Vec::new();

        for (meta, view_set) in iter_targets(&views) {
            // Responses are the model's own output; spoofing detection
            // targets what the model is fed.
            if meta == TargetMeta::Response {
                continue;
            }
            let text = &view_set.revealed;
            if text.is_empty() {
                continue;
            }

            let scripts = scripts_present(text);
            if scripts.len() >= 2 {
                let names: Vec<String> =
                    scripts.iter().map(|script| format!("{script:?}")).collect();
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        &format!("confusable:{}", meta.key()),
                        RiskLevel::High,
                        0.85,
                        format!("Text mixes {} scripts", names.join("/")),
                        meta.target(ViewKind::Revealed),
                    )
                    .with_tag("homoglyph")
                    .with_evidence("scripts", json!(names))
                    .with_evidence("snippet", json!(truncate_with_ellipsis(text, 80))),
                );
                continue;
            }

            let normalized: String = text.nfkc().collect();
            let skeleton = table.skeletonize(text);
            if skeleton != normalized {
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        &format!("confusable:{}", meta.key()),
                        RiskLevel::Medium,
                        0.6,
                        "Text contains confusable characters",
                        meta.target(ViewKind::Skeleton),
                    )
                    .with_tag("homoglyph")
                    .with_evidence("skeletonPreview", json!(truncate_with_ellipsis(&skeleton, 80)))
                    .with_evidence(
                        "normalizedPreview",
                        json!(truncate_with_ellipsis(&normalized, 80)),
                    ),
                );
            }
        }

        Ok(ScannerOutput {
            input: input.clone(),
            findings,
        })
    }
}

impl Scanner for ConfusableText {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Detect
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { self.execute(input) })
    }
}

#[cfg(test)]
mod tests {
    use super::ConfusableText;
    use crate::Scanner;
    use crate::test_support::doc_with_prompt;
    use schnabel_types::{RiskLevel, ViewKind};

    #[tokio::test]
    async fn mixed_script_is_high() {
        // Latin text with a Cyrillic 'а'.
        let doc = doc_with_prompt("p\u{0430}ypal login");
        let output = ConfusableText::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.risk, RiskLevel::High);
        assert_eq!(finding.target.view, ViewKind::Revealed);
    }

    #[tokio::test]
    async fn pure_cyrillic_with_confusables_is_medium() {
        // All-Cyrillic word whose skeleton maps onto Latin.
        let doc = doc_with_prompt("\u{0440}\u{0430}\u{0443}\u{0440}\u{0430}");
        let output = ConfusableText::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.risk, RiskLevel::Medium);
        assert_eq!(finding.target.view, ViewKind::Skeleton);
    }

    #[tokio::test]
    async fn plain_english_is_clean() {
        let doc = doc_with_prompt("paypal login please");
        let output = ConfusableText::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
    }

    #[tokio::test]
    async fn korean_text_is_clean() {
        let doc = doc_with_prompt("안녕하세요 반갑습니다");
        let output = ConfusableText::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
    }
}
