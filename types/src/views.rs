//! Multi-view text representation.
//!
//! Every audited text carries four parallel views:
//!
//! - `raw`: the canonical text as computed at normalization; never changes
//!   once the scanner chain starts.
//! - `sanitized`: reversible cleaning (NFKC, invisible/bidi strip, separator
//!   collapse) that preserves ASCII content.
//! - `revealed`: everything in `sanitized` plus decoded hidden payloads.
//! - `skeleton`: UTS#39 confusable skeleton of `revealed` after NFKC.
//!
//! Detection is defined across views rather than re-derived from raw text, so
//! scanners receive the full set and record which views matched.

use serde::{Deserialize, Serialize};

use crate::normalized::CanonicalInput;
use crate::request::ChunkSource;

/// Which of the four views a finding or match refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewKind {
    Raw,
    Sanitized,
    Revealed,
    Skeleton,
}

impl ViewKind {
    /// All views in rule-matching order.
    pub const ALL: [ViewKind; 4] = [
        ViewKind::Raw,
        ViewKind::Sanitized,
        ViewKind::Revealed,
        ViewKind::Skeleton,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::Raw => "raw",
            ViewKind::Sanitized => "sanitized",
            ViewKind::Revealed => "revealed",
            ViewKind::Skeleton => "skeleton",
        }
    }
}

/// The four parallel strings for one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewSet {
    pub raw: String,
    pub sanitized: String,
    pub revealed: String,
    pub skeleton: String,
}

impl ViewSet {
    /// Seed all four views from one canonical text.
    #[must_use]
    pub fn seeded(text: &str) -> Self {
        Self {
            raw: text.to_string(),
            sanitized: text.to_string(),
            revealed: text.to_string(),
            skeleton: text.to_string(),
        }
    }

    #[must_use]
    pub fn get(&self, kind: ViewKind) -> &str {
        match kind {
            ViewKind::Raw => &self.raw,
            ViewKind::Sanitized => &self.sanitized,
            ViewKind::Revealed => &self.revealed,
            ViewKind::Skeleton => &self.skeleton,
        }
    }
}

/// Views for one prompt chunk, keeping its provenance tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkViews {
    pub source: ChunkSource,
    pub views: ViewSet,
}

/// The full multi-view payload for a request.
///
/// Chunk order matches `promptChunksCanonical` by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputViews {
    pub prompt: ViewSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkViews>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ViewSet>,
}

impl InputViews {
    /// Seed a view payload from canonical text, one `ViewSet` per target.
    #[must_use]
    pub fn from_canonical(canonical: &CanonicalInput) -> Self {
        Self {
            prompt: ViewSet::seeded(&canonical.prompt),
            chunks: canonical
                .prompt_chunks_canonical
                .iter()
                .map(|chunk| ChunkViews {
                    source: chunk.source,
                    views: ViewSet::seeded(&chunk.text),
                })
                .collect(),
            response: canonical
                .response_text
                .as_deref()
                .map(ViewSet::seeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InputViews, ViewKind, ViewSet};
    use crate::normalized::{CanonicalChunk, CanonicalInput};
    use crate::request::ChunkSource;

    #[test]
    fn seeded_views_start_equal() {
        let views = ViewSet::seeded("text");
        for kind in ViewKind::ALL {
            assert_eq!(views.get(kind), "text");
        }
    }

    #[test]
    fn from_canonical_preserves_chunk_order() {
        let canonical = CanonicalInput {
            prompt: "p".into(),
            prompt_chunks_canonical: vec![
                CanonicalChunk {
                    source: ChunkSource::System,
                    text: "first".into(),
                },
                CanonicalChunk {
                    source: ChunkSource::Retrieval,
                    text: "second".into(),
                },
            ],
            tool_calls_json: "[]".into(),
            tool_results_json: "[]".into(),
            response_text: Some("r".into()),
        };
        let views = InputViews::from_canonical(&canonical);
        assert_eq!(views.chunks.len(), 2);
        assert_eq!(views.chunks[0].views.raw, "first");
        assert_eq!(views.chunks[1].source, ChunkSource::Retrieval);
        assert_eq!(views.response.as_ref().map(|v| v.raw.as_str()), Some("r"));
    }

    #[test]
    fn view_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ViewKind::Revealed).expect("serializes");
        assert_eq!(json, "\"revealed\"");
    }
}
