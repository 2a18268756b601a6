//! Deterministic natural key and content hash per source row.
//!
//! The natural key is a pipe-joined concatenation of seven normalized
//! fields in fixed order; missing parts render as empty strings so the
//! key always has the same number of slots. The row hash covers the
//! natural key plus the normalized status only: changes to any other
//! field are absorbed into the existing current fact version.

use crate::normalize::safe_key_part;
use serde_json::json;
use sha2::{Digest, Sha256};

pub const NATURAL_KEY_SLOTS: usize = 7;

/// Pipe-joined natural key: institution, program, broad field, level,
/// modality, province, canton.
pub fn natural_key(parts: [Option<&str>; NATURAL_KEY_SLOTS]) -> String {
    parts
        .iter()
        .map(|p| safe_key_part(*p))
        .collect::<Vec<_>>()
        .join("|")
}

/// Content fingerprint: sha256 of the sorted-key JSON serialization of
/// {natural_key, estado_norm}. serde_json maps are ordered, so the
/// serialization is stable across runs.
pub fn row_hash(natural_key: &str, estado_norm: Option<&str>) -> String {
    let dump = json!({
        "estado_norm": estado_norm.unwrap_or(""),
        "natural_key": natural_key,
    })
    .to_string();
    let mut hasher = Sha256::new();
    hasher.update(dump.as_bytes());
    format!("{:x}", hasher.finalize())
}
