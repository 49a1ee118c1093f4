//! Helpers for sanitizing data before it enters tracing span attributes or
//! stored job records.
//!
//! Access tokens never pass through here; they stay inside `SecretString`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Longest error detail kept in logs and job records.
pub const MAX_DETAIL_LEN: usize = 300;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks a remote document reference, keeping a short prefix of the id so
/// operators can still tell documents apart.
///
/// - `1AbCdEfGhIjK` → `gdoc:1AbC****`
/// - `https://docs.google.com/document/d/1AbCdEf/edit` → `gdoc:1AbC****`
pub fn redact_handle(handle: &str) -> String {
    let id = crate::parser::gdoc::document_id(handle).unwrap_or_default();
    let prefix: String = id.chars().take(4).collect();
    if prefix.is_empty() {
        format!("gdoc:#{}", &hash_value(handle)[..8])
    } else {
        format!("gdoc:{}****", prefix)
    }
}

/// Returns a short deterministic hash for correlation without exposing the
/// value itself.
pub fn hash_value(value: &str) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Cuts `detail` to [`MAX_DETAIL_LEN`] characters on a char boundary.
pub fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() <= MAX_DETAIL_LEN {
        return detail.to_string();
    }
    let mut cut: String = detail.chars().take(MAX_DETAIL_LEN).collect();
    cut.push_str("...");
    cut
}
