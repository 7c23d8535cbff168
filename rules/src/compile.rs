//! Rule validation and compilation.
//!
//! Rule authors are semi-trusted, so every pattern passes through guard
//! rails before it reaches the regex engine: a length cap, a backreference
//! ban, and two heuristics for quantifier shapes that blow up on backtracking
//! engines. The `regex` crate itself is linear-time; the guards keep packs
//! portable to runtimes that are not.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use schnabel_types::{AuditError, ChunkSource, RiskLevel, sha256_canonical_json};

use crate::spec::{PatternType, RulePackSpec, RuleScope, RuleSpec};

/// Maximum rule pattern length in characters.
pub(crate) const MAX_PATTERN_CHARS: usize = 400;

/// Compiled-regex size cap; a second line of defense behind the guards.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

const DEFAULT_SCOPES: [RuleScope; 2] = [RuleScope::Prompt, RuleScope::Chunks];

/// One compiled, guard-checked rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub category: String,
    pub pattern_type: PatternType,
    pub pattern: String,
    /// Sanitized flag string (subset of `imsu`).
    pub flags: String,
    pub negative_pattern: Option<String>,
    pub negative_flags: String,
    pub risk: RiskLevel,
    pub score: f64,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub scopes: Vec<RuleScope>,
    pub sources: Option<Vec<ChunkSource>>,
    matcher: Regex,
    negative: Option<Regex>,
    signature: String,
}

impl CompiledRule {
    /// First match in `text`, as byte offsets. A negative-pattern hit on the
    /// same text suppresses the rule entirely.
    #[must_use]
    pub fn find(&self, text: &str) -> Option<(usize, usize)> {
        if let Some(negative) = &self.negative
            && negative.is_match(text)
        {
            return None;
        }
        self.matcher.find(text).map(|m| (m.start(), m.end()))
    }

    #[must_use]
    pub fn in_scope(&self, scope: RuleScope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Whether a chunk with this provenance is eligible. No source filter
    /// means all sources.
    #[must_use]
    pub fn allows_source(&self, source: ChunkSource) -> bool {
        self.sources
            .as_ref()
            .is_none_or(|sources| sources.contains(&source))
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// An immutable compiled pack; shared behind `Arc` and swapped atomically on
/// hot reload.
#[derive(Debug, Clone)]
pub struct CompiledRulePack {
    pub version: String,
    pub rules: Vec<CompiledRule>,
}

/// Parse pack JSON and compile it. Used for both files and embedded assets;
/// `origin` only feeds diagnostics.
pub fn parse_and_compile(json: &str, origin: &str) -> Result<CompiledRulePack, AuditError> {
    let spec: RulePackSpec = serde_json::from_str(json).map_err(|err| AuditError::RulePackLoad {
        origin: origin.to_string(),
        reason: format!("invalid pack JSON: {err}"),
    })?;
    compile_pack(spec, origin)
}

/// Validate and compile a parsed pack.
///
/// Enforces unique rule ids, score bounds, and the pattern guards; rules that
/// are duplicates by content signature are dropped (first occurrence wins) and
/// the surviving rules are sorted by id.
pub fn compile_pack(spec: RulePackSpec, origin: &str) -> Result<CompiledRulePack, AuditError> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut seen_signatures: HashMap<String, String> = HashMap::new();
    let mut rules: Vec<CompiledRule> = Vec::with_capacity(spec.rules.len());

    for rule in spec.rules {
        if rule.id.trim().is_empty() {
            return Err(load_error(origin, "rule with empty id"));
        }
        if !seen_ids.insert(rule.id.clone()) {
            return Err(load_error(origin, format!("duplicate rule id '{}'", rule.id)));
        }
        if !rule.score.is_finite() || !(0.0..=1.0).contains(&rule.score) {
            return Err(load_error(
                origin,
                format!("rule '{}': score must be in [0, 1]", rule.id),
            ));
        }

        let compiled = compile_rule(rule, origin)?;
        match seen_signatures.get(compiled.signature()) {
            Some(kept) => {
                tracing::debug!(
                    dropped = %compiled.id,
                    kept = %kept,
                    "dropping duplicate rule by content signature"
                );
            }
            None => {
                seen_signatures.insert(compiled.signature().to_string(), compiled.id.clone());
                rules.push(compiled);
            }
        }
    }

    rules.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CompiledRulePack {
        version: spec.version,
        rules,
    })
}

fn compile_rule(rule: RuleSpec, origin: &str) -> Result<CompiledRule, AuditError> {
    let flags = sanitize_flags(rule.flags.as_deref().unwrap_or(""));
    let negative_flags = sanitize_flags(rule.negative_flags.as_deref().unwrap_or(""));

    let matcher = compile_matcher(rule.pattern_type, &rule.pattern, &flags)
        .map_err(|reason| load_error(origin, format!("rule '{}': {reason}", rule.id)))?;

    let negative = match rule.negative_pattern.as_deref() {
        Some(pattern) => Some(
            compile_matcher(rule.pattern_type, pattern, &negative_flags).map_err(|reason| {
                load_error(origin, format!("rule '{}' (negative): {reason}", rule.id))
            })?,
        ),
        None => None,
    };

    let scopes = rule
        .scopes
        .clone()
        .unwrap_or_else(|| DEFAULT_SCOPES.to_vec());

    let signature = signature_of(&rule, &flags, &negative_flags, &scopes)
        .map_err(|err| load_error(origin, format!("rule '{}': {err}", rule.id)))?;

    Ok(CompiledRule {
        id: rule.id,
        category: rule.category,
        pattern_type: rule.pattern_type,
        pattern: rule.pattern,
        flags,
        negative_pattern: rule.negative_pattern,
        negative_flags,
        risk: rule.risk,
        score: rule.score,
        tags: rule.tags.unwrap_or_default(),
        summary: rule.summary,
        scopes,
        sources: rule.sources,
        matcher,
        negative,
        signature,
    })
}

/// Stable content signature used for dedup across packs and reloads.
fn signature_of(
    rule: &RuleSpec,
    flags: &str,
    negative_flags: &str,
    scopes: &[RuleScope],
) -> Result<String, serde_json::Error> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct RuleSignature<'a> {
        pattern_type: PatternType,
        pattern: &'a str,
        flags: &'a str,
        negative_pattern: Option<&'a str>,
        negative_flags: &'a str,
        risk: RiskLevel,
        score: f64,
        category: &'a str,
        scopes: &'a [RuleScope],
        sources: Option<&'a [ChunkSource]>,
    }

    sha256_canonical_json(&RuleSignature {
        pattern_type: rule.pattern_type,
        pattern: &rule.pattern,
        flags,
        negative_pattern: rule.negative_pattern.as_deref(),
        negative_flags,
        risk: rule.risk,
        score: rule.score,
        category: &rule.category,
        scopes,
        sources: rule.sources.as_deref(),
    })
}

fn compile_matcher(
    pattern_type: PatternType,
    pattern: &str,
    flags: &str,
) -> Result<Regex, String> {
    if pattern.chars().count() > MAX_PATTERN_CHARS {
        return Err(format!("pattern exceeds {MAX_PATTERN_CHARS} characters"));
    }

    match pattern_type {
        PatternType::Keyword => {
            // Keyword semantics are lowercase-substring; a case-insensitive
            // escaped literal gives the same matches with byte offsets that
            // stay valid in the original text.
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|err| format!("keyword failed to compile: {err}"))
        }
        PatternType::Regex => {
            guard_pattern(pattern)?;
            RegexBuilder::new(pattern)
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .dot_matches_new_line(flags.contains('s'))
                // The `u` flag is always-on in this engine.
                .unicode(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|err| format!("pattern failed to compile: {err}"))
        }
    }
}

/// Keep only `i`, `m`, `s`, `u`; `g` and `y` are dropped silently.
fn sanitize_flags(raw: &str) -> String {
    let mut out = String::new();
    for flag in raw.chars() {
        if matches!(flag, 'i' | 'm' | 's' | 'u') && !out.contains(flag) {
            out.push(flag);
        }
    }
    out
}

fn guard_pattern(pattern: &str) -> Result<(), String> {
    if has_backreference(pattern) {
        return Err("backreferences are not allowed".to_string());
    }
    if nested_quantifier_guard().is_match(pattern) {
        return Err("nested quantifier is not allowed".to_string());
    }
    if greedy_dot_guard().is_match(pattern) {
        return Err("unbounded greedy whitespace/dot sequence is not allowed".to_string());
    }
    Ok(())
}

/// `\1`..`\9`, skipping escaped backslashes.
fn has_backreference(pattern: &str) -> bool {
    let mut escaped = false;
    for ch in pattern.chars() {
        if escaped {
            if ch.is_ascii_digit() && ch != '0' {
                return true;
            }
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        }
    }
    false
}

/// Heuristic for `( ... * ... )+`-shaped catastrophic patterns.
fn nested_quantifier_guard() -> &'static Regex {
    static GUARD: OnceLock<Regex> = OnceLock::new();
    GUARD.get_or_init(|| {
        Regex::new(r"\([^)]*[*+][^)]*\)\s*[*+]").expect("nested-quantifier guard compiles")
    })
}

/// Heuristic for greedy `\s+.*`-shaped patterns without a lazy `?`.
fn greedy_dot_guard() -> &'static Regex {
    static GUARD: OnceLock<Regex> = OnceLock::new();
    GUARD.get_or_init(|| {
        Regex::new(r"\\s[+*]\.[*+](?:[^?]|$)").expect("greedy-dot guard compiles")
    })
}

fn load_error(origin: &str, reason: impl Into<String>) -> AuditError {
    AuditError::RulePackLoad {
        origin: origin.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{compile_pack, parse_and_compile};
    use crate::spec::{PatternType, RulePackSpec, RuleSpec};
    use schnabel_types::RiskLevel;

    fn rule(id: &str, pattern: &str) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            category: "test".to_string(),
            pattern_type: PatternType::Regex,
            pattern: pattern.to_string(),
            flags: None,
            negative_pattern: None,
            negative_flags: None,
            risk: RiskLevel::High,
            score: 0.8,
            tags: None,
            summary: None,
            scopes: None,
            sources: None,
        }
    }

    fn pack(rules: Vec<RuleSpec>) -> RulePackSpec {
        RulePackSpec {
            version: "test".to_string(),
            rules,
        }
    }

    #[test]
    fn pattern_length_boundary() {
        let ok = "a".repeat(400);
        let too_long = "a".repeat(401);
        assert!(compile_pack(pack(vec![rule("r1", &ok)]), "mem").is_ok());
        assert!(compile_pack(pack(vec![rule("r1", &too_long)]), "mem").is_err());
    }

    #[test]
    fn rejects_backreferences() {
        assert!(compile_pack(pack(vec![rule("r1", r"(a)\1")]), "mem").is_err());
        // An escaped backslash before a digit is a literal, not a backref.
        assert!(compile_pack(pack(vec![rule("r2", r"a\\1b")]), "mem").is_ok());
    }

    #[test]
    fn rejects_nested_quantifiers() {
        assert!(compile_pack(pack(vec![rule("r1", r"(a+)+b")]), "mem").is_err());
        assert!(compile_pack(pack(vec![rule("r2", r"(abc)+")]), "mem").is_ok());
    }

    #[test]
    fn rejects_greedy_whitespace_dot() {
        assert!(compile_pack(pack(vec![rule("r1", r"ignore\s+.*instructions")]), "mem").is_err());
        assert!(compile_pack(pack(vec![rule("r2", r"ignore\s+.*?instructions")]), "mem").is_ok());
    }

    #[test]
    fn sanitizes_flags_silently() {
        let mut spec = rule("r1", "abc");
        spec.flags = Some("gimy".to_string());
        let compiled = compile_pack(pack(vec![spec]), "mem").expect("compiles");
        assert_eq!(compiled.rules[0].flags, "im");
    }

    #[test]
    fn duplicate_ids_are_fatal() {
        let result = compile_pack(pack(vec![rule("r1", "a"), rule("r1", "b")]), "mem");
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_content_is_deduped_and_sorted() {
        let twin = rule("r2", "same");
        let mut original = rule("r9", "same");
        original.pattern = "same".to_string();
        let compiled =
            compile_pack(pack(vec![original, twin, rule("r0", "other")]), "mem").expect("compiles");
        // r9 and r2 share a signature; first occurrence (r9) wins.
        let ids: Vec<&str> = compiled.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r9"]);
    }

    #[test]
    fn score_bounds_enforced() {
        let mut bad = rule("r1", "a");
        bad.score = 1.5;
        assert!(compile_pack(pack(vec![bad]), "mem").is_err());
    }

    #[test]
    fn negative_pattern_suppresses_match() {
        let mut spec = rule("r1", "transfer");
        spec.negative_pattern = Some("test transfer".to_string());
        let compiled = compile_pack(pack(vec![spec]), "mem").expect("compiles");
        let r = &compiled.rules[0];
        assert!(r.find("run the transfer now").is_some());
        assert!(r.find("this is a test transfer only").is_none());
    }

    #[test]
    fn keyword_matches_case_insensitively() {
        let mut spec = rule("r1", "Ignore Previous");
        spec.pattern_type = PatternType::Keyword;
        let compiled = compile_pack(pack(vec![spec]), "mem").expect("compiles");
        assert!(compiled.rules[0].find("IGNORE PREVIOUS instructions").is_some());
        assert!(compiled.rules[0].find("unrelated").is_none());
    }

    #[test]
    fn parse_and_compile_reports_origin() {
        let err = parse_and_compile("{not json", "/tmp/pack.json").expect_err("fails");
        assert_eq!(err.kind(), "rulepack_load_error");
        assert!(err.to_string().contains("/tmp/pack.json"));
    }
}
