//! Evidence packaging (L5): deterministic hash chain over ordered sections.
//!
//! Section hashes are `sha256(canonicalize(section))`; the root hash folds
//! them in a fixed order starting from the literal `"root"`. `generatedAtMs`
//! is present in the package but excluded from every hash input, so two runs
//! over the same inputs produce the same root.

use serde::Serialize;
use serde_json::Value;

use schnabel_types::{
    Actor, AuditError, CanonicalInput, Finding, FindingKind, InputViews, NormalizedInput,
    PolicyDecision, canonical_json, sha256_hex, truncate_with_ellipsis,
};

pub const EVIDENCE_SCHEMA: &str = "schnabel-evidence-v0";

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    pub timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEntry {
    pub sha256: String,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl DigestEntry {
    fn of(text: &str, include_preview: bool) -> Self {
        Self {
            sha256: sha256_hex(text),
            length: text.chars().count(),
            preview: include_preview.then(|| truncate_with_ellipsis(text, PREVIEW_CHARS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDigest {
    pub prompt: DigestEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_chunks: Option<DigestEntry>,
    pub tool_calls: DigestEntry,
    pub tool_results: DigestEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<DigestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSection {
    pub canonical: CanonicalInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannedSection {
    pub canonical: CanonicalInput,
    pub views: Option<InputViews>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScannerInfo {
    pub name: String,
    pub kind: FindingKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityItem {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    pub algo: String,
    /// Ordered section hashes; the order is contractual.
    pub items: Vec<IntegrityItem>,
    pub root_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMeta {
    pub rule_pack_versions: Vec<String>,
}

/// The tamper-evident audit record for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackage {
    pub schema: String,
    pub request_id: String,
    /// Excluded from the hash chain.
    pub generated_at_ms: i64,
    pub request: RequestMeta,
    pub raw_digest: RawDigest,
    pub normalized: NormalizedSection,
    pub scanned: ScannedSection,
    pub scanners: Vec<ScannerInfo>,
    pub findings: Vec<Finding>,
    pub decision: PolicyDecision,
    pub integrity: Integrity,
    pub meta: EvidenceMeta,
}

/// Build the package, computing section hashes in the contractual order:
/// request, rawDigest, normalized.canonical, scanned.canonical,
/// scanned.views, findings, decision, scanners.
pub fn build_evidence(
    normalized_canonical: &CanonicalInput,
    scanned: &NormalizedInput,
    scanners: Vec<ScannerInfo>,
    findings: &[Finding],
    decision: &PolicyDecision,
    generated_at_ms: i64,
    include_previews: bool,
) -> Result<EvidencePackage, AuditError> {
    let raw = &scanned.raw;

    let request = RequestMeta {
        timestamp: raw.timestamp,
        actor: raw.actor.clone(),
        model: raw.model.clone(),
    };

    let raw_digest = RawDigest {
        prompt: DigestEntry::of(&raw.prompt, include_previews),
        prompt_chunks: match &raw.prompt_chunks {
            Some(chunks) => Some(DigestEntry::of(
                &canonical_json(chunks).map_err(serialize_error)?,
                false,
            )),
            None => None,
        },
        tool_calls: DigestEntry::of(
            &canonical_json(&raw.tool_calls).map_err(serialize_error)?,
            false,
        ),
        tool_results: DigestEntry::of(
            &canonical_json(&raw.tool_results).map_err(serialize_error)?,
            false,
        ),
        response_text: raw
            .response_text
            .as_deref()
            .map(|text| DigestEntry::of(text, include_previews)),
    };

    let normalized = NormalizedSection {
        canonical: normalized_canonical.clone(),
    };
    let scanned_section = ScannedSection {
        canonical: scanned.canonical.clone(),
        views: scanned.views.clone(),
    };

    let views_value: Value = match &scanned_section.views {
        Some(views) => serde_json::to_value(views).map_err(serialize_error)?,
        None => Value::Null,
    };

    let sections: Vec<(&str, Value)> = vec![
        ("request", serde_json::to_value(&request).map_err(serialize_error)?),
        ("rawDigest", serde_json::to_value(&raw_digest).map_err(serialize_error)?),
        (
            "normalized.canonical",
            serde_json::to_value(&normalized.canonical).map_err(serialize_error)?,
        ),
        (
            "scanned.canonical",
            serde_json::to_value(&scanned_section.canonical).map_err(serialize_error)?,
        ),
        ("scanned.views", views_value),
        ("findings", serde_json::to_value(findings).map_err(serialize_error)?),
        ("decision", serde_json::to_value(decision).map_err(serialize_error)?),
        ("scanners", serde_json::to_value(&scanners).map_err(serialize_error)?),
    ];

    let mut items = Vec::with_capacity(sections.len());
    let mut root = "root".to_string();
    for (name, value) in &sections {
        let hash = sha256_hex(&schnabel_types::canonicalize(value));
        root = sha256_hex(&format!("{root}:{name}:{hash}"));
        items.push(IntegrityItem {
            name: (*name).to_string(),
            hash,
        });
    }

    let mut rule_pack_versions: Vec<String> = findings
        .iter()
        .filter_map(|finding| finding.evidence.get("rulePackVersion"))
        .filter_map(Value::as_str)
        .map(ToString::to_string)
        .collect();
    rule_pack_versions.sort_unstable();
    rule_pack_versions.dedup();

    Ok(EvidencePackage {
        schema: EVIDENCE_SCHEMA.to_string(),
        request_id: scanned.request_id.clone(),
        generated_at_ms,
        request,
        raw_digest,
        normalized,
        scanned: scanned_section,
        scanners,
        findings: findings.to_vec(),
        decision: decision.clone(),
        integrity: Integrity {
            algo: "sha256".to_string(),
            items,
            root_hash: root,
        },
        meta: EvidenceMeta { rule_pack_versions },
    })
}

fn serialize_error(err: serde_json::Error) -> AuditError {
    AuditError::InvalidRequest {
        reason: format!("unserializable evidence section: {err}"),
    }
}
