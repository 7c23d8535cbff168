//! Conservative fact-mismatch detection between tool results and response
//! claims.
//!
//! Only allow-listed keys are extracted from object results - numeric
//! `balance`, `total`, `count`, `amount`, `score` and boolean `found`,
//! `exists`, `success` - plus array lengths as `count`. Anything else is
//! ignored on purpose: a wrong match here forces a block, so precision beats
//! recall. Alias tables cover English and Korean; other locales are left
//! unspecified.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Value, json};

use schnabel_types::{Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind};

use crate::walk::MAX_WALK_DEPTH;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "tool_result_fact_mismatch";

const NUMERIC_KEYS: [(&str, &str); 5] = [
    ("balance", "잔액"),
    ("total", "합계"),
    ("count", "개수"),
    ("amount", "금액"),
    ("score", "점수"),
];

const BOOL_KEYS: [&str; 3] = ["found", "exists", "success"];

#[derive(Debug, Clone, PartialEq)]
enum FactValue {
    Number(f64),
    Bool(bool),
}

/// `<alias>[ is|=|:]? <number>` claim patterns, one per numeric key.
fn numeric_claim_patterns() -> &'static HashMap<&'static str, Regex> {
    static PATTERNS: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        NUMERIC_KEYS
            .iter()
            .map(|(key, ko_alias)| {
                let pattern = format!(
                    r"(?i)\b(?:{key}|{ko_alias})\b(?:\s+is|\s*[:=])?\s*(-?\d+(?:\.\d+)?)"
                );
                (
                    *key,
                    Regex::new(&pattern).expect("numeric claim pattern compiles"),
                )
            })
            .collect()
    })
}

fn bool_claim_patterns() -> &'static HashMap<&'static str, (Regex, Regex)> {
    static PATTERNS: OnceLock<HashMap<&'static str, (Regex, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("bool claim pattern compiles");
        HashMap::from([
            (
                "found",
                (
                    compile(r"(?i)(?:\bfound\b|발견)"),
                    compile(r"(?i)(?:\b(?:not found|no (?:\w+ )?found|couldn't find|could not find)\b|찾을 수 없)"),
                ),
            ),
            (
                "exists",
                (
                    compile(r"(?i)(?:\b(?:exists?|is present)\b|존재)"),
                    compile(r"(?i)(?:\b(?:does not exist|doesn't exist|not present|no such)\b|없습니다)"),
                ),
            ),
            (
                "success",
                (
                    compile(r"(?i)(?:\b(?:succeeded|successful(?:ly)?|success)\b|성공)"),
                    compile(r"(?i)(?:\b(?:failed|unsuccessful|did not succeed)\b|실패)"),
                ),
            ),
        ])
    })
}

/// Extract allow-listed facts from one tool result payload.
fn extract_facts(result: &Value) -> Vec<(String, FactValue)> {
    let mut facts = Vec::new();
    if let Value::Array(items) = result {
        facts.push(("count".to_string(), FactValue::Number(items.len() as f64)));
    }
    collect_facts(result, 0, &mut facts);
    facts
}

fn collect_facts(value: &Value, depth: usize, facts: &mut Vec<(String, FactValue)>) {
    if depth > MAX_WALK_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                let lowered = key.to_ascii_lowercase();
                let numeric = NUMERIC_KEYS.iter().any(|(name, _)| *name == lowered);
                if numeric {
                    match item {
                        Value::Number(number) => {
                            if let Some(as_f64) = number.as_f64() {
                                facts.push((lowered.clone(), FactValue::Number(as_f64)));
                            }
                        }
                        Value::Array(items) => {
                            facts.push((lowered.clone(), FactValue::Number(items.len() as f64)));
                        }
                        _ => {}
                    }
                } else if BOOL_KEYS.contains(&lowered.as_str())
                    && let Value::Bool(flag) = item
                {
                    facts.push((lowered.clone(), FactValue::Bool(*flag)));
                }
                collect_facts(item, depth + 1, facts);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_facts(item, depth + 1, facts);
            }
        }
        _ => {}
    }
}

/// Detect stage comparing response claims to tool-returned facts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolResultFactMismatch;

impl ToolResultFactMismatch {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();
        let Some(response) = input.response_for_detection() else {
            return ScannerOutput::unchanged(input.clone());
        };

        for result in &input.raw.tool_results {
            for (key, fact) in extract_facts(&result.result) {
                match fact {
                    FactValue::Number(actual) => {
                        let Some(pattern) = numeric_claim_patterns().get(key.as_str()) else {
                            continue;
                        };
                        let Some(captures) = pattern.captures(response) else {
                            continue;
                        };
                        let Some(claimed) = captures
                            .get(1)
                            .and_then(|group| group.as_str().parse::<f64>().ok())
                        else {
                            continue;
                        };
                        if (claimed - actual).abs() > 1e-9 {
                            findings.push(
                                Finding::new(
                                    FindingKind::Detect,
                                    NAME,
                                    &input.request_id,
                                    &format!("fact:{}:{key}", result.tool_name),
                                    RiskLevel::High,
                                    0.9,
                                    format!(
                                        "Response claims {key} {claimed} but the tool returned {actual}"
                                    ),
                                    FindingTarget::response(ViewKind::Revealed),
                                )
                                .with_tag("fact-mismatch")
                                .with_evidence("toolName", json!(result.tool_name))
                                .with_evidence("factKey", json!(key))
                                .with_evidence("toolValue", json!(actual))
                                .with_evidence("claimedValue", json!(claimed)),
                            );
                        }
                    }
                    FactValue::Bool(actual) => {
                        let Some((positive, negative)) = bool_claim_patterns().get(key.as_str())
                        else {
                            continue;
                        };
                        let negative_hit = negative.is_match(response);
                        let positive_hit = positive.is_match(response);
                        let (risk, score, claimed) = if !actual && positive_hit && !negative_hit {
                            (RiskLevel::High, 0.9, true)
                        } else if actual && negative_hit {
                            (RiskLevel::Medium, 0.6, false)
                        } else {
                            continue;
                        };
                        findings.push(
                            Finding::new(
                                FindingKind::Detect,
                                NAME,
                                &input.request_id,
                                &format!("fact:{}:{key}", result.tool_name),
                                risk,
                                score,
                                format!(
                                    "Response claims {key}={claimed} but the tool returned {actual}"
                                ),
                                FindingTarget::response(ViewKind::Revealed),
                            )
                            .with_tag("fact-mismatch")
                            .with_evidence("toolName", json!(result.tool_name))
                            .with_evidence("factKey", json!(key))
                            .with_evidence("toolValue", json!(actual))
                            .with_evidence("claimedValue", json!(claimed)),
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

impl Scanner for ToolResultFactMismatch {
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
