//! Shared claim grammars for response text (English and Korean).
//!
//! Other locales are intentionally unspecified; these tables are the only
//! place claim phrases live, so the tool-result and history detectors agree
//! on what counts as a claim.

use std::sync::OnceLock;

use regex::Regex;

fn success_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\b(?:successfully|succeeded|success(?:ful)?|completed|has been (?:sent|completed|created|updated|transferred)|it worked|all done)\b|성공|완료)",
        )
        .expect("success-claim pattern compiles")
    })
}

fn failure_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\b(?:failed|failure|error(?:s|ed)?|could not|couldn't|unable to|did not (?:work|complete)|unsuccessful)\b|실패|오류|에러)",
        )
        .expect("failure-claim pattern compiles")
    })
}

fn prior_success_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)(?:\b(?:i (?:already|previously) (?:did|completed|fixed|sent|created|transferred|handled)|as i (?:already )?(?:did|completed|mentioned)|already (?:done|completed|fixed|sent|handled|taken care of)|was (?:already )?(?:completed|done|sent) (?:earlier|before|previously))\b|이미 완료|이전에 성공)",
        )
        .expect("prior-success-claim pattern compiles")
    })
}

/// First success claim in `text`, if any.
pub(crate) fn success_claim(text: &str) -> Option<&str> {
    success_pattern().find(text).map(|m| m.as_str())
}

/// First failure claim in `text`, if any.
pub(crate) fn failure_claim(text: &str) -> Option<&str> {
    failure_pattern().find(text).map(|m| m.as_str())
}

/// First claim that something was already done in a previous turn.
pub(crate) fn prior_success_claim(text: &str) -> Option<&str> {
    prior_success_pattern().find(text).map(|m| m.as_str())
}
