//! Detect scanners.
//!
//! Detect stages read views (never raw request text), record `matchedViews`
//! in evidence when more than one view matched, and choose the preferred view
//! `revealed > sanitized > raw > skeleton` for the finding target. They never
//! throw on well-typed inputs; embedded-JSON parse failures fall back to the
//! raw lists.

pub(crate) mod claims;
pub mod confusable_text;
pub mod fact_mismatch;
pub mod history;
pub mod keyword;
pub mod path_traversal;
pub mod rulepack;
pub mod ssrf;
pub mod tool_result;
