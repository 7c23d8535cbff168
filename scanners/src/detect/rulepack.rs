//! Rule-pack detect scanner: multi-view matching with scope and source
//! filters.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use schnabel_rules::{CompiledRule, CompiledRulePack, RuleScope};
use schnabel_types::{AuditError, Finding, FindingKind, NormalizedInput, ViewKind, ViewSet};

use crate::{
    ScanFut, Scanner, ScannerOutput, TargetMeta, effective_views, iter_targets, matched_views_json,
    preferred_view, snippet_centered,
};

pub(crate) const NAME: &str = "rule_pack";

const SNIPPET_WIDTH: usize = 80;

enum PackSource {
    /// Pinned compiled pack; no reload.
    Static(Arc<CompiledRulePack>),
    /// File-backed pack with hot reload through the process cache.
    Path(PathBuf),
}

/// Detect stage evaluating a compiled rule pack against every view of every
/// eligible target. One finding per `(rule, target)` with the preferred view.
pub struct RulePackScanner {
    source: PackSource,
}

impl RulePackScanner {
    /// Use a pre-compiled pack.
    #[must_use]
    pub fn with_pack(pack: Arc<CompiledRulePack>) -> Self {
        Self {
            source: PackSource::Static(pack),
        }
    }

    /// Load from a pack file now (fatal on failure) and hot-reload on mtime
    /// changes afterwards.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        schnabel_rules::load_pack(&path)?;
        Ok(Self {
            source: PackSource::Path(path),
        })
    }

    /// Use the asset-resolver default pack.
    pub fn with_default() -> Result<Self, AuditError> {
        match schnabel_rules::resolve_default_path() {
            Some(path) => Self::from_path(path),
            None => Ok(Self::with_pack(schnabel_rules::default_pack()?)),
        }
    }

    fn current_pack(&self) -> Result<Arc<CompiledRulePack>, AuditError> {
        match &self.source {
            PackSource::Static(pack) => Ok(pack.clone()),
            PackSource::Path(path) => schnabel_rules::load_pack(path),
        }
    }

    fn execute(&self, input: &NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let pack = self.current_pack()?;
        let views = effective_views(input);
        let mut findings = Vec::new();

        for (meta, view_set) in iter_targets(&views) {
            let scope = match meta {
                TargetMeta::Prompt => RuleScope::Prompt,
                TargetMeta::Chunk { .. } => RuleScope::Chunks,
                TargetMeta::Response => RuleScope::Response,
            };
            for rule in &pack.rules {
                if !rule.in_scope(scope) {
                    continue;
                }
                if let TargetMeta::Chunk { source, .. } = meta
                    && !rule.allows_source(source)
                {
                    continue;
                }
                if let Some(finding) =
                    match_rule(rule, input, meta, view_set, &pack.version)
                {
                    findings.push(finding);
                }
            }
        }

        Ok(ScannerOutput {
            input: input.clone(),
            findings,
        })
    }
}

fn match_rule(
    rule: &CompiledRule,
    input: &NormalizedInput,
    meta: TargetMeta,
    view_set: &ViewSet,
    pack_version: &str,
) -> Option<Finding> {
    let mut matched: Vec<ViewKind> = Vec::new();
    for kind in ViewKind::ALL {
        if rule.find(view_set.get(kind)).is_some() {
            matched.push(kind);
        }
    }
    if matched.is_empty() {
        return None;
    }

    let view = preferred_view(&matched);
    let text = view_set.get(view);
    let (start, end) = rule.find(text).unwrap_or((0, 0));
    let summary = rule
        .summary
        .clone()
        .unwrap_or_else(|| format!("Rule {} matched", rule.id));

    let mut finding = Finding::new(
        FindingKind::Detect,
        NAME,
        &input.request_id,
        &format!("rule:{}:{}", rule.id, meta.key()),
        rule.risk,
        rule.score,
        summary,
        meta.target(view),
    )
    .with_evidence("ruleId", json!(rule.id))
    .with_evidence("category", json!(rule.category))
    .with_evidence("patternType", json!(rule.pattern_type.as_str()))
    .with_evidence("rulePackVersion", json!(pack_version))
    .with_evidence("matchedViews", matched_views_json(&matched))
    .with_evidence(
        "snippet",
        json!(snippet_centered(text, start, end, SNIPPET_WIDTH)),
    );
    for tag in &rule.tags {
        finding = finding.with_tag(tag.clone());
    }
    Some(finding)
}

impl Scanner for RulePackScanner {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Detect
    }

    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a> {
        Box::pin(async move { self.execute(input) })
    }

    /// Release the pack-cache entry (and its watcher state) for this path.
    fn close(&self) {
        if let PackSource::Path(path) = &self.source {
            schnabel_rules::close_path(path);
        }
    }
}
