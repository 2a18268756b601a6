//! Text and column-name normalization shared by the whole pipeline.
//!
//! `normalize_text` produces the canonical comparison form used by key
//! generation and geo matching: NFKD-decompose, keep ASCII only (accents
//! and combining marks fall away), lowercase, trim, collapse internal
//! whitespace. It must be pure and total - same input, same output.

use unicode_normalization::UnicodeNormalization;

/// Canonical comparison form of a free-text value.
pub fn normalize_text(input: &str) -> String {
    let folded: String = input.nfkd().filter(char::is_ascii).collect();
    let lowered = folded.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical column-name form: fold to ASCII, uppercase, non-alphanumeric
/// runs become a single underscore, edges trimmed.
/// "NIVEL FORMACIÓN" -> "NIVEL_FORMACION", "CANTÓN" -> "CANTON".
pub fn normalize_column_name(raw: &str) -> String {
    let folded: String = raw.nfkd().filter(char::is_ascii).collect();
    let upper = folded.trim().to_uppercase();
    let mut out = String::with_capacity(upper.len());
    for ch in upper.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Normalize a raw cell value. Missing or empty input yields `None`,
/// never a failure. NBSP and tabs are squashed to plain spaces before
/// folding so the ASCII filter cannot glue adjacent words together.
pub fn normalize_value(value: Option<&str>) -> Option<String> {
    let raw = value?;
    if raw.is_empty() {
        return None;
    }
    let cleaned = raw.replace('\u{a0}', " ").replace('\t', " ");
    let normalized = normalize_text(&cleaned);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Render one slot of the natural key: missing parts become the empty
/// string so the key always has the same shape.
pub fn safe_key_part(value: Option<&str>) -> String {
    value.map(str::trim).unwrap_or("").to_string()
}
