//! Rule packs: JSON-defined regex/keyword detection rules.
//!
//! A pack is parsed from JSON ([`spec`]), validated and compiled with ReDoS
//! guards ([`compile`]), and cached process-wide by file path with debounced
//! mtime-based hot reload ([`cache`]). Compiled packs are immutable values
//! behind `Arc`; a reload swaps the shared pointer atomically, so readers
//! never observe a half-compiled pack.

mod assets;
mod cache;
mod compile;
mod spec;

pub use assets::{DEFAULT_RULES_JSON, ENV_RULES_PATH, default_pack, resolve_default_path};
pub use cache::{RELOAD_DEBOUNCE, clear_cache, close_path, load_pack};
pub use compile::{CompiledRule, CompiledRulePack, compile_pack, parse_and_compile};
pub use spec::{PatternType, RulePackSpec, RuleScope, RuleSpec};
