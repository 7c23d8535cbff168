//! Built-in injection keyword scanner.
//!
//! A small fixed regex list covering instruction overrides and system-prompt
//! disclosure. The rule pack covers the long tail; this scanner exists so a
//! chain without any pack still catches the classics.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use schnabel_types::{Finding, FindingKind, NormalizedInput, RiskLevel, ViewKind};

use crate::{
    ScanFut, Scanner, ScannerOutput, TargetMeta, effective_views, iter_targets, matched_views_json,
    preferred_view, snippet_centered,
};

pub(crate) const NAME: &str = "keyword_injection";

const SNIPPET_WIDTH: usize = 80;

struct BuiltinPattern {
    id: &'static str,
    tag: &'static str,
    summary: &'static str,
    risk: RiskLevel,
    score: f64,
    regex: Regex,
}

fn builtin_patterns() -> &'static [BuiltinPattern] {
    static PATTERNS: OnceLock<Vec<BuiltinPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("builtin pattern compiles");
        vec![
            BuiltinPattern {
                id: "override-ignore",
                tag: "override",
                summary: "Override of previous instructions",
                risk: RiskLevel::High,
                score: 0.85,
                regex: compile(
                    r"(?i)\b(?:ignore|disregard)\s+(?:all\s+|any\s+)?(?:previous|prior|above|earlier)\s+(?:instructions|rules|prompts|directives|guidance)\b",
                ),
            },
            BuiltinPattern {
                id: "override-forget",
                tag: "override",
                summary: "Forget-instructions override",
                risk: RiskLevel::High,
                score: 0.75,
                regex: compile(
                    r"(?i)\bforget\s+(?:everything|all|your\s+(?:instructions|rules|training))\b",
                ),
            },
            BuiltinPattern {
                id: "override-ko",
                tag: "override",
                summary: "Override of previous instructions (Korean)",
                risk: RiskLevel::High,
                score: 0.8,
                regex: compile(r"이전\s*(?:지시|명령|규칙)(?:을|를)?\s*(?:무시|잊어)"),
            },
            BuiltinPattern {
                id: "persona-switch",
                tag: "jailbreak",
                summary: "Persona-switch jailbreak",
                risk: RiskLevel::High,
                score: 0.8,
                regex: compile(
                    r"(?i)\byou\s+are\s+now\s+(?:in\s+)?(?:developer\s+mode|dan|jailbroken|unrestricted)\b",
                ),
            },
            BuiltinPattern {
                id: "system-prompt-disclosure",
                tag: "disclosure",
                summary: "Attempt to disclose the system prompt",
                risk: RiskLevel::High,
                score: 0.8,
                regex: compile(
                    r"(?i)\b(?:reveal|show|print|repeat|output)\s+(?:your\s+|the\s+)?(?:system\s+prompt|hidden\s+instructions|developer\s+message)\b",
                ),
            },
        ]
    })
}

/// Detect stage scanning every view of the prompt and each chunk for the
/// built-in injection patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordInjection;

impl KeywordInjection {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let views = effective_views(input);
        let mut findings = Vec::new();

        for (meta, view_set) in iter_targets(&views) {
            // Injection patterns target model *input*; responses are the rule
            // pack's concern.
            if meta == TargetMeta::Response {
                continue;
            }
            for pattern in builtin_patterns() {
                let mut matched: Vec<ViewKind> = Vec::new();
                let mut first_span: Option<(ViewKind, usize, usize)> = None;
                for kind in ViewKind::ALL {
                    if let Some(found) = pattern.regex.find(view_set.get(kind)) {
                        matched.push(kind);
                        if first_span.is_none() {
                            first_span = Some((kind, found.start(), found.end()));
                        }
                    }
                }
                if matched.is_empty() {
                    continue;
                }
                let view = preferred_view(&matched);
                let text = view_set.get(view);
                let (start, end) = pattern
                    .regex
                    .find(text)
                    .map(|m| (m.start(), m.end()))
                    .or(first_span.map(|(_, s, e)| (s, e)))
                    .unwrap_or((0, 0));

                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        &format!("kw:{}:{}", pattern.id, meta.key()),
                        pattern.risk,
                        pattern.score,
                        pattern.summary,
                        meta.target(view),
                    )
                    .with_tag(pattern.tag)
                    .with_evidence("patternId", json!(pattern.id))
                    .with_evidence("matchedViews", matched_views_json(&matched))
                    .with_evidence(
                        "snippet",
                        json!(snippet_centered(text, start, end, SNIPPET_WIDTH)),
                    ),
                );
            }
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for KeywordInjection {
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
