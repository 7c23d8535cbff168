//! Process-wide compiled-pack cache with debounced hot reload.
//!
//! Packs are cached by path. Every load re-checks the file's mtime, debounced
//! to at most once per [`RELOAD_DEBOUNCE`]; a changed mtime triggers a
//! recompile and an atomic `Arc` swap. A failed reload keeps the previous
//! pack and logs at error level - the first load is the only fatal one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use schnabel_types::AuditError;

use crate::compile::{CompiledRulePack, parse_and_compile};

/// Minimum interval between mtime checks for one pack path.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

struct CacheEntry {
    pack: Arc<CompiledRulePack>,
    mtime: Option<SystemTime>,
    checked_at: Instant,
}

type PackCache = Mutex<HashMap<PathBuf, CacheEntry>>;

fn cache() -> &'static PackCache {
    static CACHE: OnceLock<PackCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Load a pack from a file, consulting and maintaining the process cache.
pub fn load_pack(path: &Path) -> Result<Arc<CompiledRulePack>, AuditError> {
    let key = path.to_path_buf();
    let mut entries = cache().lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(entry) = entries.get_mut(&key) {
        if entry.checked_at.elapsed() < RELOAD_DEBOUNCE {
            return Ok(entry.pack.clone());
        }
        entry.checked_at = Instant::now();
        let mtime = read_mtime(path);
        if mtime != entry.mtime {
            match compile_file(path) {
                Ok(pack) => {
                    tracing::info!(path = %path.display(), version = %pack.version, "rule pack reloaded");
                    entry.pack = Arc::new(pack);
                    entry.mtime = mtime;
                }
                Err(err) => {
                    // Recoverable: readers keep the previous compiled pack.
                    tracing::error!(path = %path.display(), error = %err, "rule pack reload failed; keeping previous pack");
                    entry.mtime = mtime;
                }
            }
        }
        return Ok(entry.pack.clone());
    }

    let pack = Arc::new(compile_file(path)?);
    entries.insert(
        key,
        CacheEntry {
            pack: pack.clone(),
            mtime: read_mtime(path),
            checked_at: Instant::now(),
        },
    );
    Ok(pack)
}

/// Release the cached state for one pack path.
pub fn close_path(path: &Path) {
    let mut entries = cache().lock().unwrap_or_else(PoisonError::into_inner);
    entries.remove(path);
}

/// Drop every cached pack. Intended for tests.
pub fn clear_cache() {
    let mut entries = cache().lock().unwrap_or_else(PoisonError::into_inner);
    entries.clear();
}

fn compile_file(path: &Path) -> Result<CompiledRulePack, AuditError> {
    let text = std::fs::read_to_string(path).map_err(|err| AuditError::AssetMissing {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    parse_and_compile(&text, &path.display().to_string())
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::{RELOAD_DEBOUNCE, close_path, load_pack};
    use std::io::Write as _;

    const PACK_V1: &str = r#"{
        "version": "v1",
        "rules": [{
            "id": "r1", "category": "c", "patternType": "keyword",
            "pattern": "alpha", "risk": "low", "score": 0.2
        }]
    }"#;

    const PACK_V2: &str = r#"{
        "version": "v2",
        "rules": [{
            "id": "r1", "category": "c", "patternType": "keyword",
            "pattern": "beta", "risk": "low", "score": 0.2
        }]
    }"#;

    #[test]
    fn missing_file_is_fatal_on_first_load() {
        let err = load_pack(std::path::Path::new("/nonexistent/pack.json")).expect_err("fails");
        assert_eq!(err.kind(), "asset_missing");
    }

    #[test]
    fn reload_swaps_pack_and_bad_reload_keeps_previous() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pack.json");
        std::fs::write(&path, PACK_V1).expect("write v1");

        let first = load_pack(&path).expect("first load");
        assert_eq!(first.version, "v1");

        // Rewrite with a bumped mtime and wait out the debounce window.
        std::thread::sleep(RELOAD_DEBOUNCE + std::time::Duration::from_millis(50));
        let mut file = std::fs::File::create(&path).expect("recreate");
        file.write_all(PACK_V2.as_bytes()).expect("write v2");
        file.flush().expect("flush");
        bump_mtime(&path);

        let second = load_pack(&path).expect("reload");
        assert_eq!(second.version, "v2");

        // Corrupt pack: reload fails, previous compiled pack survives.
        std::thread::sleep(RELOAD_DEBOUNCE + std::time::Duration::from_millis(50));
        std::fs::write(&path, "{broken").expect("write broken");
        bump_mtime(&path);

        let third = load_pack(&path).expect("load after bad reload");
        assert_eq!(third.version, "v2");

        close_path(&path);
    }

    fn bump_mtime(path: &std::path::Path) {
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open for mtime bump");
        file.set_modified(future).expect("set mtime");
    }
}
