//! Scanner implementations for the Schnabel audit pipeline.
//!
//! A scanner is one stage of the chain: it receives the working document,
//! returns an updated copy plus any findings, and never touches the `raw`
//! views. Sanitize stages rewrite the `sanitized`/`revealed` views, the
//! enrich stage derives the `skeleton` view, and detect stages read views
//! and emit findings with full target/view provenance.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use schnabel_types::{
    AuditError, ChunkSource, Finding, FindingKind, FindingTarget, HistoryStore, InputViews,
    NormalizedInput, ViewKind, ViewSet,
};

pub mod confusables;
pub mod detect;
pub mod enrich;
pub mod sanitize;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod walk;

pub use confusables::{ConfusablesTable, confusables_table};
pub use detect::confusable_text::ConfusableText;
pub use detect::fact_mismatch::ToolResultFactMismatch;
pub use detect::history::{HistoryContradiction, HistoryFlipFlop};
pub use detect::keyword::KeywordInjection;
pub use detect::path_traversal::ToolArgsPathTraversal;
pub use detect::rulepack::RulePackScanner;
pub use detect::ssrf::ToolArgsSsrf;
pub use detect::tool_result::ToolResultContradiction;
pub use enrich::SkeletonEnrich;
pub use sanitize::hidden_tags::HiddenAsciiTags;
pub use sanitize::separators::SeparatorCollapse;
pub use sanitize::tool_args::ToolArgsCanonicalizer;
pub use sanitize::unicode::UnicodeSanitizer;

/// Boxed scanner future, one per chain stage.
pub type ScanFut<'a> = Pin<Box<dyn Future<Output = Result<ScannerOutput, AuditError>> + Send + 'a>>;

/// Result of one scanner stage: the (possibly updated) working document and
/// the findings it emitted, in emission order.
#[derive(Debug)]
pub struct ScannerOutput {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
}

impl ScannerOutput {
    /// Pass the document through untouched.
    #[must_use]
    pub fn unchanged(input: NormalizedInput) -> Self {
        Self {
            input,
            findings: Vec::new(),
        }
    }
}

/// One stage of the scanner chain.
pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> FindingKind;
    /// Per-scanner time budget override; the chain default applies otherwise.
    fn timeout(&self) -> Option<Duration> {
        None
    }
    fn run<'a>(&'a self, input: &'a NormalizedInput) -> ScanFut<'a>;
    /// Release scanner-held resources (file watchers, cache entries).
    fn close(&self) {}
}

/// View preference for a detect finding's target:
/// `revealed > sanitized > raw > skeleton`.
#[must_use]
pub fn preferred_view(matched: &[ViewKind]) -> ViewKind {
    for kind in [
        ViewKind::Revealed,
        ViewKind::Sanitized,
        ViewKind::Raw,
        ViewKind::Skeleton,
    ] {
        if matched.contains(&kind) {
            return kind;
        }
    }
    ViewKind::Raw
}

/// `matchedViews` evidence value.
#[must_use]
pub fn matched_views_json(matched: &[ViewKind]) -> serde_json::Value {
    serde_json::Value::Array(
        matched
            .iter()
            .map(|kind| serde_json::Value::String(kind.as_str().to_string()))
            .collect(),
    )
}

/// 80-character snippet centered on a match, with a trailing ellipsis when
/// clipped. `start`/`end` are byte offsets into `text`.
#[must_use]
pub fn snippet_centered(text: &str, start: usize, end: usize, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let start_idx = text
        .char_indices()
        .take_while(|(offset, _)| *offset < start)
        .count();
    let end_idx = text
        .char_indices()
        .take_while(|(offset, _)| *offset < end)
        .count();
    let center = usize::midpoint(start_idx, end_idx);
    let mut from = center.saturating_sub(width / 2);
    let to = (from + width).min(chars.len());
    from = to.saturating_sub(width);
    let mut snippet: String = chars[from..to].iter().collect();
    if to < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

/// Where in the request a piece of text lives. Shared by the per-target
/// drivers in the sanitize and detect modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetMeta {
    Prompt,
    Chunk { index: usize, source: ChunkSource },
    Response,
}

impl TargetMeta {
    /// Stable finding-id key fragment for this target.
    pub(crate) fn key(self) -> String {
        match self {
            TargetMeta::Prompt => "prompt".to_string(),
            TargetMeta::Chunk { index, .. } => format!("chunk:{index}"),
            TargetMeta::Response => "response".to_string(),
        }
    }

    pub(crate) fn target(self, view: ViewKind) -> FindingTarget {
        match self {
            TargetMeta::Prompt => FindingTarget::prompt(view),
            TargetMeta::Chunk { index, source } => FindingTarget::chunk(index, source, view),
            TargetMeta::Response => FindingTarget::response(view),
        }
    }
}

/// Views to detect against: the attached payload, or a seeded set when the
/// chain has not attached one (detect scanners never throw on that).
pub(crate) fn effective_views(input: &NormalizedInput) -> std::borrow::Cow<'_, InputViews> {
    match &input.views {
        Some(views) => std::borrow::Cow::Borrowed(views),
        None => std::borrow::Cow::Owned(InputViews::from_canonical(&input.canonical)),
    }
}

/// Prompt and chunk targets in order, then the response when present.
pub(crate) fn iter_targets(views: &InputViews) -> Vec<(TargetMeta, &ViewSet)> {
    let mut targets = vec![(TargetMeta::Prompt, &views.prompt)];
    for (index, chunk) in views.chunks.iter().enumerate() {
        targets.push((
            TargetMeta::Chunk {
                index,
                source: chunk.source,
            },
            &chunk.views,
        ));
    }
    if let Some(response) = &views.response {
        targets.push((TargetMeta::Response, response));
    }
    targets
}

/// Where the default rule pack comes from.
pub enum RulePackSource {
    /// Asset-resolver default (env override, dev file, embedded copy).
    Default,
    /// A pack file with hot reload.
    Path(PathBuf),
    /// A pre-compiled pack.
    Pack(Arc<schnabel_rules::CompiledRulePack>),
}

/// Configuration for [`default_scanners`].
pub struct ChainConfig {
    pub rule_pack: Option<RulePackSource>,
    pub history: Option<Arc<dyn HistoryStore>>,
    pub history_window: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rule_pack: Some(RulePackSource::Default),
            history: None,
            history_window: 5,
        }
    }
}

/// The canonical chain: sanitizers, the skeleton enricher, then detectors.
/// History scanners are appended only when a store is configured.
pub fn default_scanners(config: ChainConfig) -> Result<Vec<Box<dyn Scanner>>, AuditError> {
    let mut scanners: Vec<Box<dyn Scanner>> = vec![
        Box::new(UnicodeSanitizer::new()),
        Box::new(HiddenAsciiTags::new()),
        Box::new(SeparatorCollapse::new()),
        Box::new(ToolArgsCanonicalizer::new()),
        Box::new(SkeletonEnrich::new()),
        Box::new(KeywordInjection::new()),
    ];
    match config.rule_pack {
        Some(RulePackSource::Default) => scanners.push(Box::new(RulePackScanner::with_default()?)),
        Some(RulePackSource::Path(path)) => {
            scanners.push(Box::new(RulePackScanner::from_path(path)?));
        }
        Some(RulePackSource::Pack(pack)) => {
            scanners.push(Box::new(RulePackScanner::with_pack(pack)));
        }
        None => {}
    }
    scanners.push(Box::new(ToolArgsSsrf::new()));
    scanners.push(Box::new(ToolArgsPathTraversal::new()));
    scanners.push(Box::new(ToolResultContradiction::new()));
    scanners.push(Box::new(ToolResultFactMismatch::new()));
    scanners.push(Box::new(ConfusableText::new()));
    if let Some(history) = config.history {
        scanners.push(Box::new(HistoryContradiction::new(
            history.clone(),
            config.history_window,
        )));
        scanners.push(Box::new(HistoryFlipFlop::new(
            history,
            config.history_window,
        )));
    }
    Ok(scanners)
}
