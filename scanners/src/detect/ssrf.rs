//! SSRF detection over tool-call arguments.
//!
//! Walks the canonical tool-call JSON (depth-bounded) looking for URL-shaped
//! string leaves. Dangerous schemes are flagged outright; for HTTP-family
//! URLs the host is classified against private, loopback, link-local, and
//! carrier-grade NAT ranges plus a short list of internal hostnames.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde_json::{Value, json};
use url::{Host, Url};

use schnabel_types::{Finding, FindingKind, FindingTarget, NormalizedInput, RiskLevel, ViewKind};

use crate::sanitize::tool_args::parse_tool_calls;
use crate::walk::walk_strings;
use crate::{ScanFut, Scanner, ScannerOutput};

pub(crate) const NAME: &str = "tool_args_ssrf";

/// Schemes that reach non-HTTP attack surface; flagged without parsing.
const DANGEROUS_SCHEMES: [&str; 7] = ["file", "gopher", "dict", "ldap", "ldaps", "data", "netdoc"];

/// Schemes worth a host classification pass.
const PARSED_SCHEMES: [&str; 5] = ["http", "https", "ftp", "ws", "wss"];

/// Hostnames that resolve to internal surface regardless of DNS.
const SUSPICIOUS_HOSTS: [&str; 2] = ["metadata.google.internal", "169.254.169.254"];

#[derive(Debug)]
struct Offense {
    url: String,
    host: String,
    reason: String,
}

fn leaf_scheme(text: &str) -> Option<&str> {
    let colon = text.find(':')?;
    let scheme = &text[..colon];
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        || !scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    Some(scheme)
}

fn classify_leaf(text: &str) -> Option<Offense> {
    let scheme = leaf_scheme(text)?.to_ascii_lowercase();

    if DANGEROUS_SCHEMES.contains(&scheme.as_str()) {
        return Some(Offense {
            url: text.to_string(),
            host: String::new(),
            reason: format!("dangerous scheme '{scheme}:'"),
        });
    }
    if !PARSED_SCHEMES.contains(&scheme.as_str()) {
        return None;
    }

    let parsed = Url::parse(text).ok()?;
    let host = parsed.host()?;
    let (host_text, reason) = match &host {
        Host::Ipv4(ip) => (ip.to_string(), classify_ipv4(*ip)?),
        Host::Ipv6(ip) => (ip.to_string(), classify_ipv6(ip)?),
        Host::Domain(domain) => {
            let lowered = domain.to_ascii_lowercase();
            (lowered.clone(), classify_domain(&lowered)?)
        }
    };

    Some(Offense {
        url: text.to_string(),
        host: host_text,
        reason,
    })
}

fn classify_ipv4(ip: Ipv4Addr) -> Option<String> {
    if ip.is_loopback() {
        return Some("loopback address".to_string());
    }
    if ip.is_link_local() {
        return Some("link-local address (cloud metadata range)".to_string());
    }
    if ip.is_private() {
        return Some("private network address".to_string());
    }
    if is_cgnat(ip) {
        return Some("carrier-grade NAT address".to_string());
    }
    if ip.is_unspecified() {
        return Some("unspecified address".to_string());
    }
    None
}

/// 100.64.0.0/10.
fn is_cgnat(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (64..128).contains(&octets[1])
}

fn classify_ipv6(ip: &Ipv6Addr) -> Option<String> {
    if ip.is_loopback() {
        return Some("loopback address".to_string());
    }
    if ip.is_unspecified() {
        return Some("unspecified address".to_string());
    }
    let segments = ip.segments();
    if segments[0] & 0xfe00 == 0xfc00 {
        return Some("unique-local address".to_string());
    }
    if segments[0] & 0xffc0 == 0xfe80 {
        return Some("link-local address".to_string());
    }
    // IPv4-mapped: ::ffff:a.b.c.d
    if segments[..5] == [0, 0, 0, 0, 0] && segments[5] == 0xffff {
        let mapped = Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            (segments[6] & 0xff) as u8,
            (segments[7] >> 8) as u8,
            (segments[7] & 0xff) as u8,
        );
        return classify_ipv4(mapped).map(|reason| format!("IPv4-mapped {reason}"));
    }
    None
}

fn classify_domain(domain: &str) -> Option<String> {
    if domain == "localhost" || domain.ends_with(".localhost") {
        return Some("loopback hostname".to_string());
    }
    if domain.ends_with(".local") {
        return Some("mDNS local hostname".to_string());
    }
    if SUSPICIOUS_HOSTS.contains(&domain) {
        return Some("cloud metadata hostname".to_string());
    }
    None
}

/// Detect stage flagging tool-call arguments that point at internal or
/// non-HTTP surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct ToolArgsSsrf;

impl ToolArgsSsrf {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn execute(&self, input: &NormalizedInput) -> ScannerOutput {
        let mut findings = Vec::new();
        let Some(calls) = parse_tool_calls(input) else {
            return ScannerOutput::unchanged(input.clone());
        };
        let Value::Array(calls) = calls else {
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
                let Some(offense) = classify_leaf(text) else {
                    return;
                };
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        NAME,
                        &input.request_id,
                        &format!("ssrf:{call_index}:{path}"),
                        RiskLevel::High,
                        0.85,
                        format!("Tool argument URL targets {}", offense.reason),
                        FindingTarget::prompt(ViewKind::Raw),
                    )
                    .with_tag("ssrf")
                    .with_evidence("toolName", json!(tool_name))
                    .with_evidence("argPath", json!(path))
                    .with_evidence("url", json!(offense.url))
                    .with_evidence("host", json!(offense.host))
                    .with_evidence("reason", json!(offense.reason)),
                );
            });
        }

        ScannerOutput {
            input: input.clone(),
            findings,
        }
    }
}

impl Scanner for ToolArgsSsrf {
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

#[cfg(test)]
mod tests {
    use super::ToolArgsSsrf;
    use crate::Scanner;
    use crate::test_support::doc_from_request;
    use schnabel_types::{AuditRequest, NormalizedInput, RiskLevel, ToolCallRecord};
    use serde_json::{Value, json};

    fn doc_with_args(args: Value) -> NormalizedInput {
        let mut request = AuditRequest::new("req-ssrf", 0.0, "p");
        request.tool_calls = vec![ToolCallRecord::new("http.fetch", args)];
        doc_from_request(request)
    }

    #[tokio::test]
    async fn metadata_address_is_flagged() {
        let doc = doc_with_args(json!({"url": "http://169.254.169.254/latest/meta-data/"}));
        let output = ToolArgsSsrf::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        let finding = &output.findings[0];
        assert_eq!(finding.risk, RiskLevel::High);
        assert_eq!(finding.evidence["host"], "169.254.169.254");
        assert!(
            finding.evidence["reason"]
                .as_str()
                .expect("reason")
                .contains("metadata")
        );
        assert_eq!(finding.evidence["toolName"], "http.fetch");
    }

    #[tokio::test]
    async fn dangerous_schemes_are_flagged_without_parsing() {
        let doc = doc_with_args(json!({"target": "file:///etc/passwd"}));
        let output = ToolArgsSsrf::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        assert!(
            output.findings[0].evidence["reason"]
                .as_str()
                .expect("reason")
                .contains("file:")
        );
    }

    #[tokio::test]
    async fn private_and_loopback_hosts_are_flagged() {
        let doc = doc_with_args(json!({
            "a": "http://10.0.0.8/admin",
            "b": "https://localhost/debug",
            "c": "http://[::1]/x"
        }));
        let output = ToolArgsSsrf::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 3);
    }

    #[tokio::test]
    async fn public_urls_pass() {
        let doc = doc_with_args(json!({
            "url": "https://example.com/page",
            "note": "not a url at all",
            "version": "v1.2:3"
        }));
        let output = ToolArgsSsrf::new().run(&doc).await.expect("runs");
        assert!(output.findings.is_empty());
    }

    #[tokio::test]
    async fn nested_args_are_walked() {
        let doc = doc_with_args(json!({"request": {"urls": ["https://ok.example", "http://192.168.1.1/"]}}));
        let output = ToolArgsSsrf::new().run(&doc).await.expect("runs");
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].evidence["argPath"], "request.urls[1]");
    }
}
