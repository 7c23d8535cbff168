//! Wire format of a rule pack file: `{ "version": ..., "rules": [...] }`.

use serde::{Deserialize, Serialize};

use schnabel_types::{ChunkSource, RiskLevel};

/// How a rule's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Regex,
    Keyword,
}

impl PatternType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Regex => "regex",
            PatternType::Keyword => "keyword",
        }
    }
}

/// Which request fields a rule applies to. Default is prompt + chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Prompt,
    Chunks,
    Response,
}

/// One rule as authored in the pack file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub id: String,
    pub category: String,
    pub pattern_type: PatternType,
    pub pattern: String,
    /// Flag string; only `i`, `m`, `s`, `u` survive sanitization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
    /// Suppression pattern: a positive match is discarded when this matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_flags: Option<String>,
    pub risk: RiskLevel,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<RuleScope>>,
    /// Chunk-provenance filter; only meaningful for the chunks scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<ChunkSource>>,
}

/// A parsed (not yet compiled) rule pack file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePackSpec {
    pub version: String,
    pub rules: Vec<RuleSpec>,
}

#[cfg(test)]
mod tests {
    use super::{PatternType, RulePackSpec, RuleScope};

    #[test]
    fn parses_minimal_pack() {
        let json = r#"{
            "version": "1.0.0",
            "rules": [{
                "id": "inj-001",
                "category": "prompt_injection",
                "patternType": "regex",
                "pattern": "ignore previous instructions",
                "risk": "high",
                "score": 0.8
            }]
        }"#;
        let pack: RulePackSpec = serde_json::from_str(json).expect("parses");
        assert_eq!(pack.version, "1.0.0");
        assert_eq!(pack.rules[0].pattern_type, PatternType::Regex);
        assert!(pack.rules[0].scopes.is_none());
    }

    #[test]
    fn rejects_unknown_risk() {
        let json = r#"{
            "version": "1",
            "rules": [{
                "id": "x",
                "category": "c",
                "patternType": "keyword",
                "pattern": "p",
                "risk": "severe",
                "score": 0.5
            }]
        }"#;
        assert!(serde_json::from_str::<RulePackSpec>(json).is_err());
    }

    #[test]
    fn parses_scopes_and_sources() {
        let json = r#"{
            "version": "1",
            "rules": [{
                "id": "x",
                "category": "c",
                "patternType": "keyword",
                "pattern": "p",
                "risk": "low",
                "score": 0.1,
                "scopes": ["chunks", "response"],
                "sources": ["retrieval", "tool"]
            }]
        }"#;
        let pack: RulePackSpec = serde_json::from_str(json).expect("parses");
        let rule = &pack.rules[0];
        assert_eq!(
            rule.scopes.as_deref(),
            Some(&[RuleScope::Chunks, RuleScope::Response][..])
        );
        assert_eq!(rule.sources.as_ref().map(Vec::len), Some(2));
    }
}
