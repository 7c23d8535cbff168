//! Separator collapse: `i-g-n-o-r-e` style obfuscation.
//!
//! Removes characters in the class `[|._\-+]` when they sit between two
//! letter/number code points (Unicode-aware), and separator runs at the
//! string boundary adjacent to a letter. The elision applies to the
//! sanitized and revealed views only; the raw view keeps the original text.

use serde_json::json;

use schnabel_types::{Finding, FindingKind, NormalizedInput, RiskLevel, ViewKind};

use crate::sanitize::{for_each_target, propagate_canonical};
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "separator_collapse";

const SEPARATORS: [char; 5] = ['|', '.', '_', '-', '+'];

fn is_separator(ch: char) -> bool {
    SEPARATORS.contains(&ch)
}

/// Remove elidable separators; returns the collapsed text and removal count.
pub(crate) fn collapse(text: &str) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut removed = 0;

    for (index, &ch) in chars.iter().enumerate() {
        if !is_separator(ch) {
            out.push(ch);
            continue;
        }
        let prev = index.checked_sub(1).map(|i| chars[i]);
        let next = chars.get(index + 1).copied();
        let elide = match (prev, next) {
            (Some(p), Some(n)) => p.is_alphanumeric() && n.is_alphanumeric(),
            // Leading separator directly before a letter/number.
            (None, Some(n)) => n.is_alphanumeric(),
            // Trailing separator directly after a letter/number.
            (Some(p), None) => p.is_alphanumeric(),
            (None, None) => false,
        };
        if elide {
            removed += 1;
        } else {
            out.push(ch);
        }
    }

    (out, removed)
}

/// Sanitize stage collapsing separator-obfuscated words. Risk scales with
/// the number of removed characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeparatorCollapse;

impl SeparatorCollapse {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut updated = input.clone();
        let mut findings = Vec::new();
        let request_id = updated.request_id.clone();

        for_each_target(&mut updated, |meta, views| {
            let (sanitized, removed) = collapse(&views.sanitized);
            let (revealed, _) = collapse(&views.revealed);
            if removed == 0 {
                return;
            }
            views.sanitized = sanitized;
            views.revealed = revealed;

            let (risk, score) = if removed >= 6 {
                (RiskLevel::Medium, 0.45)
            } else {
                (RiskLevel::Low, 0.15)
            };
            findings.push(
                Finding::new(
                    FindingKind::Sanitize,
                    NAME,
                    &request_id,
                    &meta.key(),
                    risk,
                    score,
                    format!("Collapsed {removed} separator characters between letters"),
                    meta.target(ViewKind::Sanitized),
                )
                .with_evidence("removedSeparatorCount", json!(removed)),
            );
        });

        propagate_canonical(&mut updated);
        ScannerOutput {
            input: updated,
            findings,
        }
    }
}

impl Scanner for SeparatorCollapse {
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
