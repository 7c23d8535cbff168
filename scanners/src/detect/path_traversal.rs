//! Path traversal and sensitive-path detection over tool-call arguments.

use serde_json::{Value, json};

use schnabel_types::{Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind};

use crate::sanitize::tool_args::parse_tool_calls;
use crate::walk::walk_strings;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "tool_args_path_traversal";

/// Markers that make a normalized path high-risk on their own. Checked
/// against the double-decoded, slash-normalized, lowercased path.
const SENSITIVE_MARKERS: [&str; 11] = [
    "/etc/passwd",
    "/etc/shadow",
    "/proc/",
    "/sys/",
    "/root/",
    ".ssh",
    "id_rsa",
    ".env",
    "c:/windows/system32",
    "c:/users/",
    "c:/windows/",
];

#[derive(Debug, PartialEq, Eq)]
enum PathVerdict {
    Sensitive(&'static str),
    Traversal,
    EncodedTraversal,
}

fn looks_like_path(text: &str) -> bool {
    text.contains('/') || text.contains('\\') || {
        let lowered = text.to_ascii_lowercase();
        lowered.contains("%2e") || lowered.contains("%2f") || lowered.contains("%5c")
    }
}

/// One pass of percent-decoding; invalid escapes pass through verbatim.
fn percent_decode_once(text: &str) -> String {
    fn hex_digit(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }

    let bytes = text.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%'
            && index + 2 < bytes.len()
            && let (Some(high), Some(low)) = (hex_digit(bytes[index + 1]), hex_digit(bytes[index + 2]))
        {
            out.push(high * 16 + low);
            index += 3;
            continue;
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn classify_path(text: &str) -> Option<PathVerdict> {
    if !looks_like_path(text) {
        return None;
    }

    let decoded = percent_decode_once(&percent_decode_once(text));
    let normalized = decoded.replace('\\', "/").to_lowercase();

    for marker in SENSITIVE_MARKERS {
        if normalized.contains(marker) {
            return Some(PathVerdict::Sensitive(marker));
        }
    }
    if normalized.split('/').any(|segment| segment == "..") {
        return Some(PathVerdict::Traversal);
    }
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("%2e%2e") || lowered.contains("%2f") || lowered.contains("%5c") {
        return Some(PathVerdict::EncodedTraversal);
    }
    None
}

/// Detect stage flagging traversal sequences and sensitive filesystem paths
/// inside tool-call arguments.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolArgsPathTraversal;

impl ToolArgsPathTraversal {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();
        let Some(Value::Array(calls)) = parse_tool_calls(input) else {
            return ScannerOutput::unchanged(input.clone());
        };

        for (call_index, call) in calls.iter().enumerate() {
            let tool_name = call
                .get("toolName")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let Some(args) = call.get("args") else {
                continue;
            };
            walk_strings(args, &mut |path, text| {
                let Some(verdict) = classify_path(text) else {
                    return;
                };
                let (risk, score, reason) = match verdict {
                    PathVerdict::Sensitive(marker) => (
                        RiskLevel::High,
                        0.85,
                        format!("sensitive path marker '{marker}'"),
                    ),
                    PathVerdict::Traversal => (
                        RiskLevel::Medium,
                        0.5,
                        "path traversal sequence".to_string(),
                    ),
                    PathVerdict::EncodedTraversal => (
                        RiskLevel::Medium,
                        0.5,
                        "percent-encoded path separators".to_string(),
                    ),
                };
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        &format!("traversal:{call_index}:{path}"),
                        risk,
                        score,
                        format!("Tool argument path contains {reason}"),
                        FindingTarget::prompt(ViewKind::Raw),
                    )
                    .with_tag("path-traversal")
                    .with_evidence("toolName", json!(tool_name))
                    .with_evidence("argPath", json!(path))
                    .with_evidence("value", json!(text))
                    .with_evidence("reason", json!(reason)),
                );
            });
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for ToolArgsPathTraversal {
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
