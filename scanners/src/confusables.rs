//! UTS#39 confusables table and skeletonization.
//!
//! The table is parsed once per process from `confusables.txt` (upstream
//! Unicode format) and shared as an immutable singleton. `skeletonize`
//! applies NFKC and then longest-match substitution, scanning left to right
//! with a window bounded by the longest source sequence in the table.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use unicode_normalization::UnicodeNormalization;

use schnabel_types::AuditError;

/// Environment override pointing at a full upstream `confusables.txt`.
pub const ENV_CONFUSABLES_PATH: &str = "SCHNABEL_CONFUSABLES";

/// Bundled snapshot (packaged location of the asset resolver).
const BUNDLED_CONFUSABLES: &str = include_str!("../assets/confusables.txt");

/// Longest-match confusable mapping keyed on source character sequences.
#[derive(Debug)]
pub struct ConfusablesTable {
    map: HashMap<String, String>,
    max_src_len: usize,
    version: String,
}

impl ConfusablesTable {
    /// Parse the upstream `confusables.txt` format:
    /// `<src-codepoints> ; <dst-codepoints> ; <type>`, `#` comments, and a
    /// `# Version: x.y.z` header.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut map = HashMap::new();
        let mut max_src_len = 1;
        let mut version = String::new();

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("# Version:") {
                version = rest.trim().to_string();
                continue;
            }
            let data = line.split('#').next().unwrap_or("");
            if data.trim().is_empty() {
                continue;
            }
            let mut fields = data.split(';');
            let (Some(src_field), Some(dst_field)) = (fields.next(), fields.next()) else {
                continue;
            };
            let (Some(src), Some(dst)) = (parse_codepoints(src_field), parse_codepoints(dst_field))
            else {
                continue;
            };
            if src.is_empty() {
                continue;
            }
            max_src_len = max_src_len.max(src.chars().count());
            map.insert(src, dst);
        }

        Self {
            map,
            max_src_len,
            version,
        }
    }

    /// `# Version` header value, reported in evidence.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// NFKC, then longest-match replacement; non-matching code points pass
    /// through unchanged.
    #[must_use]
    pub fn skeletonize(&self, text: &str) -> String {
        let normalized: String = text.nfkc().collect();
        let chars: Vec<char> = normalized.chars().collect();
        let mut out = String::with_capacity(normalized.len());
        let mut index = 0;
        while index < chars.len() {
            let window = self.max_src_len.min(chars.len() - index);
            let mut advanced = false;
            for len in (1..=window).rev() {
                let candidate: String = chars[index..index + len].iter().collect();
                if let Some(replacement) = self.map.get(&candidate) {
                    out.push_str(replacement);
                    index += len;
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                out.push(chars[index]);
                index += 1;
            }
        }
        out
    }
}

fn parse_codepoints(field: &str) -> Option<String> {
    let mut out = String::new();
    for token in field.split_whitespace() {
        let value = u32::from_str_radix(token, 16).ok()?;
        out.push(char::from_u32(value)?);
    }
    Some(out)
}

/// The process-wide table: the `SCHNABEL_CONFUSABLES` file when set,
/// otherwise the bundled snapshot. Missing override files are fatal on first
/// use.
pub fn confusables_table() -> Result<&'static ConfusablesTable, AuditError> {
    static TABLE: OnceLock<Result<ConfusablesTable, (String, String)>> = OnceLock::new();
    let loaded = TABLE.get_or_init(|| {
        let table = if let Ok(path) = std::env::var(ENV_CONFUSABLES_PATH)
            && !path.trim().is_empty()
        {
            let text = std::fs::read_to_string(Path::new(&path))
                .map_err(|err| (path.clone(), err.to_string()))?;
            ConfusablesTable::parse(&text)
        } else {
            ConfusablesTable::parse(BUNDLED_CONFUSABLES)
        };
        tracing::debug!(
            entries = table.len(),
            version = %table.version(),
            "confusables table loaded"
        );
        Ok(table)
    });
    match loaded {
        Ok(table) => Ok(table),
        Err((path, reason)) => Err(AuditError::AssetMissing {
            path: path.clone(),
            reason: reason.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{BUNDLED_CONFUSABLES, ConfusablesTable};

    fn table() -> ConfusablesTable {
        ConfusablesTable::parse(BUNDLED_CONFUSABLES)
    }

    #[test]
    fn bundled_table_parses() {
        let table = table();
        assert!(!table.is_empty());
        assert!(!table.version().is_empty());
    }

    #[test]
    fn cyrillic_spoof_skeletonizes_to_latin() {
        let table = table();
        // "раураl" is Cyrillic er/a/u/er/a + Latin l.
        assert_eq!(table.skeletonize("раураl"), "paypal");
    }

    #[test]
    fn plain_ascii_is_a_fixed_point() {
        let table = table();
        assert_eq!(table.skeletonize("plain ascii text"), "plain ascii text");
    }

    #[test]
    fn skeleton_is_idempotent() {
        let table = table();
        let once = table.skeletonize("Іgnоrе аll рrеviоus");
        let twice = table.skeletonize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn nfkc_applies_before_mapping() {
        let table = table();
        // Fullwidth Latin folds to ASCII under NFKC.
        assert_eq!(table.skeletonize("ｐａｙ"), "pay");
    }

    #[test]
    fn multi_codepoint_sources_use_longest_match() {
        let table = ConfusablesTable::parse(
            "# Version: 0.0.1\n0131 0307 ; 0069 ; MA\n0131 ; 0069 ; MA\n",
        );
        // Dotless i + combining dot above collapses via the 2-char entry.
        assert_eq!(table.skeletonize("\u{0131}\u{0307}"), "i");
    }
}
