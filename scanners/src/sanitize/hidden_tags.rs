//! Hidden ASCII payloads encoded in Unicode TAG characters.
//!
//! The TAG block `U+E0000..U+E007F` mirrors ASCII and renders as nothing in
//! most UIs, which makes it a covert channel for instructions. This stage
//! strips the tag characters from the sanitized view and appends the decoded
//! payload to the revealed view, where downstream detectors can see it.

use serde_json::json;

use schnabel_types::{Finding, FindingKind, NormalizedInput, RiskLevel, ViewKind, truncate_with_ellipsis};

use crate::sanitize::{for_each_target, propagate_canonical};
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "hidden_ascii_tags";

const TAG_BLOCK_START: u32 = 0xE0000;
const TAG_BLOCK_END: u32 = 0xE007F;

/// Tag characters found in one text plus the printable payload they encode.
struct Decoded {
    stripped: String,
    tag_count: usize,
    payload: String,
}

fn decode_tags(text: &str) -> Decoded {
    let mut stripped = String::with_capacity(text.len());
    let mut payload = String::new();
    let mut tag_count = 0;

    for ch in text.chars() {
        let cp = u32::from(ch);
        if (TAG_BLOCK_START..=TAG_BLOCK_END).contains(&cp) {
            tag_count += 1;
            let ascii = cp - TAG_BLOCK_START;
            if (0x20..=0x7E).contains(&ascii)
                && let Some(decoded) = char::from_u32(ascii)
            {
                payload.push(decoded);
            }
        } else {
            stripped.push(ch);
        }
    }

    Decoded {
        stripped,
        tag_count,
        payload,
    }
}

/// Sanitize stage decoding TAG-block payloads. Any tag occurrence is treated
/// as high risk: there is no benign reason for tag characters in audited
/// text.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenAsciiTags;

impl HiddenAsciiTags {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut updated = input.clone();
        let mut findings = Vec::new();
        let request_id = updated.request_id.clone();

        for_each_target(&mut updated, |meta, views| {
            let decoded = decode_tags(&views.sanitized);
            if decoded.tag_count == 0 {
                return;
            }

            views.sanitized = decoded.stripped;
            let revealed_base = decode_tags(&views.revealed).stripped;
            views.revealed = if decoded.payload.is_empty() {
                revealed_base
            } else {
                format!("{revealed_base}\n{}", decoded.payload)
                    .trim()
                    .to_string()
            };

            findings.push(
                Finding::new(
                    FindingKind::Sanitize,
                    NAME,
                    &request_id,
                    &meta.key(),
                    RiskLevel::High,
                    0.85,
                    "Hidden ASCII payload encoded in Unicode tag characters",
                    meta.target(ViewKind::Revealed),
                )
                .with_tag("steganography")
                .with_evidence("tagCount", json!(decoded.tag_count))
                .with_evidence("decodedLength", json!(decoded.payload.chars().count()))
                .with_evidence(
                    "decodedPreview",
                    json!(truncate_with_ellipsis(&decoded.payload, 80)),
                ),
            );
        });

        propagate_canonical(&mut updated);
        ScannerOutput {
            input: updated,
            findings,
        }
    }
}

impl Scanner for HiddenAsciiTags {
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
