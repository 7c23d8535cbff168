//! Default rule pack resolution.
//!
//! Resolution order: the `SCHNABEL_RULES` environment variable, then the
//! development asset next to this crate, then the embedded copy compiled into
//! the binary. File-backed packs go through the hot-reload cache; the
//! embedded pack is compiled once per process.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use schnabel_types::AuditError;

use crate::cache::load_pack;
use crate::compile::{CompiledRulePack, parse_and_compile};

/// Environment override for the default rule pack path.
pub const ENV_RULES_PATH: &str = "SCHNABEL_RULES";

/// The embedded default pack (packaged location of the asset resolver).
pub const DEFAULT_RULES_JSON: &str = include_str!("../assets/default-rules.json");

/// Resolve the default pack to a file path, if one exists on disk.
#[must_use]
pub fn resolve_default_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_RULES_PATH) {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return Some(path);
        }
    }
    let dev = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/default-rules.json");
    dev.is_file().then_some(dev)
}

/// The default compiled pack: a file-backed pack when one resolves (with hot
/// reload), otherwise the embedded copy.
pub fn default_pack() -> Result<Arc<CompiledRulePack>, AuditError> {
    if let Some(path) = resolve_default_path() {
        return load_pack(&path);
    }
    embedded_pack()
}

fn embedded_pack() -> Result<Arc<CompiledRulePack>, AuditError> {
    static PACK: OnceLock<Result<Arc<CompiledRulePack>, String>> = OnceLock::new();
    PACK.get_or_init(|| {
        parse_and_compile(DEFAULT_RULES_JSON, "embedded:default-rules.json")
            .map(Arc::new)
            .map_err(|err| err.to_string())
    })
    .clone()
    .map_err(|reason| AuditError::RulePackLoad {
        origin: "embedded:default-rules.json".to_string(),
        reason,
    })
}
