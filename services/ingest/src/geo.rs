//! Two-level fuzzy territory resolution against the canonical catalog.
//!
//! Provinces are matched first (exact, then fuzzy); cantons are matched
//! only against the resolved province's canton list, never the global
//! set, so similarly named cantons in other provinces cannot collide.

use crate::normalize::normalize_text;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const DEFAULT_THRESHOLD: u32 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    FailedProv,
    FailedCanton,
    NoCatalog,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::FailedProv => "failed_prov",
            MatchMethod::FailedCanton => "failed_canton",
            MatchMethod::NoCatalog => "no_catalog",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerritoryMatch {
    pub provincia: Option<String>,
    pub canton: Option<String>,
    pub score_prov: f64,
    pub score_canton: f64,
    pub method: MatchMethod,
}

impl TerritoryMatch {
    fn failed(method: MatchMethod) -> Self {
        Self {
            provincia: None,
            canton: None,
            score_prov: 0.0,
            score_canton: 0.0,
            method,
        }
    }
}

pub struct GeoMatcher {
    provinces: Vec<String>,
    cantons_by_prov: HashMap<String, Vec<String>>,
    valid_pairs: HashSet<(String, String)>,
    loaded: bool,
}

impl GeoMatcher {
    /// Matcher without a catalog: every call reports `no_catalog`.
    /// Degraded but non-fatal, the pipeline still runs.
    pub fn empty() -> Self {
        Self {
            provinces: Vec::new(),
            cantons_by_prov: HashMap::new(),
            valid_pairs: HashSet::new(),
            loaded: false,
        }
    }

    /// Build from raw (province, canton) pairs; both sides are normalized
    /// here so catalogs may carry accented originals.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut provinces = Vec::new();
        let mut cantons_by_prov: HashMap<String, Vec<String>> = HashMap::new();
        let mut valid_pairs = HashSet::new();
        for (p_raw, c_raw) in pairs {
            let p = normalize_text(&p_raw);
            let c = normalize_text(&c_raw);
            if !provinces.contains(&p) {
                provinces.push(p.clone());
            }
            let cantons = cantons_by_prov.entry(p.clone()).or_default();
            if !cantons.contains(&c) {
                cantons.push(c.clone());
            }
            valid_pairs.insert((p, c));
        }
        Self {
            provinces,
            cantons_by_prov,
            valid_pairs,
            loaded: true,
        }
    }

    /// Load the canonical catalog CSV. Accepts either pre-normalized
    /// `provincia_norm`/`canton_norm` columns or raw `provincia`/`canton`.
    pub fn from_catalog(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            eprintln!(
                "Warning: territory catalog not found at {}. Matching will fail.",
                path.display()
            );
            return Ok(Self::empty());
        }
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let (prov_idx, canton_idx) = match (find("provincia_norm"), find("canton_norm")) {
            (Some(p), Some(c)) => (p, c),
            _ => match (find("provincia"), find("canton")) {
                (Some(p), Some(c)) => (p, c),
                _ => anyhow::bail!("territory catalog missing provincia/canton columns"),
            },
        };
        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            let p = record.get(prov_idx).unwrap_or("").to_string();
            let c = record.get(canton_idx).unwrap_or("").to_string();
            if p.is_empty() && c.is_empty() {
                continue;
            }
            pairs.push((p, c));
        }
        let matcher = Self::from_pairs(pairs);
        println!(
            "Loaded territory catalog: {} provinces.",
            matcher.provinces.len()
        );
        Ok(matcher)
    }

    pub fn valid_pairs(&self) -> &HashSet<(String, String)> {
        &self.valid_pairs
    }

    /// Membership test used by the data-quality checker.
    pub fn is_valid_pair(&self, provincia_norm: &str, canton_norm: &str) -> bool {
        if provincia_norm.is_empty() || canton_norm.is_empty() {
            return false;
        }
        self.valid_pairs
            .contains(&(provincia_norm.to_string(), canton_norm.to_string()))
    }

    /// Resolve free-text province/canton to canonical names.
    pub fn match_territory(
        &self,
        provincia: Option<&str>,
        canton: Option<&str>,
        threshold: u32,
    ) -> TerritoryMatch {
        if !self.loaded {
            return TerritoryMatch::failed(MatchMethod::NoCatalog);
        }

        let prov_input = normalize_text(provincia.unwrap_or(""));
        let canton_input = normalize_text(canton.unwrap_or(""));

        let (matched_prov, prov_score) = if self.provinces.iter().any(|p| p == &prov_input) {
            (prov_input.clone(), 100.0)
        } else {
            match best_match(&prov_input, &self.provinces) {
                Some((value, dist, max_len)) if meets(dist, max_len, threshold) => {
                    (value.to_string(), score(dist, max_len))
                }
                _ => return TerritoryMatch::failed(MatchMethod::FailedProv),
            }
        };

        let scoped = self
            .cantons_by_prov
            .get(&matched_prov)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let (matched_canton, canton_score) = if scoped.iter().any(|c| c == &canton_input) {
            (canton_input.clone(), 100.0)
        } else {
            match best_match(&canton_input, scoped) {
                Some((value, dist, max_len)) if meets(dist, max_len, threshold) => {
                    (value.to_string(), score(dist, max_len))
                }
                _ => {
                    return TerritoryMatch {
                        provincia: Some(matched_prov),
                        canton: None,
                        score_prov: prov_score,
                        score_canton: 0.0,
                        method: MatchMethod::FailedCanton,
                    }
                }
            }
        };

        let method = if prov_score == 100.0 && canton_score == 100.0 {
            MatchMethod::Exact
        } else {
            MatchMethod::Fuzzy
        };
        TerritoryMatch {
            provincia: Some(matched_prov),
            canton: Some(matched_canton),
            score_prov: prov_score,
            score_canton: canton_score,
            method,
        }
    }
}

fn ratio_parts(a: &str, b: &str) -> (usize, usize) {
    let dist = strsim::levenshtein(a, b);
    let max_len = a.chars().count().max(b.chars().count());
    (dist, max_len)
}

/// Normalized edit-distance ratio on the 0-100 scale.
fn score(dist: usize, max_len: usize) -> f64 {
    if max_len == 0 {
        return 100.0;
    }
    ((max_len - dist) * 100) as f64 / max_len as f64
}

/// Integer comparison keeps the acceptance boundary exact: a candidate
/// at precisely the threshold is accepted, one point below is not.
fn meets(dist: usize, max_len: usize, threshold: u32) -> bool {
    if max_len == 0 {
        return true;
    }
    (max_len - dist) * 100 >= threshold as usize * max_len
}

/// Best fuzzy candidate; the first one wins ties so catalog order makes
/// the result deterministic.
fn best_match<'a>(input: &str, candidates: &'a [String]) -> Option<(&'a str, usize, usize)> {
    let mut best: Option<(&str, usize, usize, f64)> = None;
    for cand in candidates {
        let (dist, max_len) = ratio_parts(input, cand);
        let s = score(dist, max_len);
        if best.map_or(true, |(_, _, _, bs)| s > bs) {
            best = Some((cand.as_str(), dist, max_len, s));
        }
    }
    best.map(|(value, dist, max_len, _)| (value, dist, max_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> GeoMatcher {
        GeoMatcher::from_pairs(vec![
            ("Pichincha".to_string(), "Quito".to_string()),
            ("Pichincha".to_string(), "Cayambe".to_string()),
            ("Azuay".to_string(), "Cuenca".to_string()),
            ("Guayas".to_string(), "Guayaquil".to_string()),
        ])
    }

    // -------------------------------------------------------------------------
    // EXACT AND FUZZY RESOLUTION
    // -------------------------------------------------------------------------

    #[test]
    fn test_exact_match_both_levels() {
        let m = matcher();
        let result = m.match_territory(Some("PICHINCHA "), Some("Quitó"), DEFAULT_THRESHOLD);
        assert_eq!(result.provincia.as_deref(), Some("pichincha"));
        assert_eq!(result.canton.as_deref(), Some("quito"));
        assert_eq!(result.score_prov, 100.0);
        assert_eq!(result.score_canton, 100.0);
        assert_eq!(result.method, MatchMethod::Exact);
    }

    #[test]
    fn test_fuzzy_province_accepted() {
        let m = matcher();
        // one extra character: 9/10 similarity = 90
        let result = m.match_territory(Some("Pichinchaa"), Some("Quito"), DEFAULT_THRESHOLD);
        assert_eq!(result.provincia.as_deref(), Some("pichincha"));
        assert_eq!(result.score_prov, 90.0);
        assert_eq!(result.method, MatchMethod::Fuzzy);
    }

    #[test]
    fn test_failed_province() {
        let m = matcher();
        let result = m.match_territory(Some("Atlantida"), Some("Quito"), DEFAULT_THRESHOLD);
        assert_eq!(result.provincia, None);
        assert_eq!(result.canton, None);
        assert_eq!(result.score_prov, 0.0);
        assert_eq!(result.method, MatchMethod::FailedProv);
    }

    #[test]
    fn test_canton_scoped_to_province() {
        let m = matcher();
        // guayaquil exists, but not under azuay: must not cross provinces
        let result = m.match_territory(Some("Azuay"), Some("Guayaquil"), DEFAULT_THRESHOLD);
        assert_eq!(result.provincia.as_deref(), Some("azuay"));
        assert_eq!(result.canton, None);
        assert_eq!(result.score_prov, 100.0);
        assert_eq!(result.score_canton, 0.0);
        assert_eq!(result.method, MatchMethod::FailedCanton);
    }

    // -------------------------------------------------------------------------
    // THRESHOLD BOUNDARY - accepted at exactly 85, rejected at 84
    // -------------------------------------------------------------------------

    #[test]
    fn test_threshold_boundary_accepted_at_85() {
        // 20-char canonical name, 3 substitutions: (20-3)/20 = 85 exactly
        let m = GeoMatcher::from_pairs(vec![(
            "abcdefghijklmnopqrst".to_string(),
            "canton uno".to_string(),
        )]);
        let result = m.match_territory(
            Some("xbcxefghijklmnopqrsx"),
            Some("canton uno"),
            DEFAULT_THRESHOLD,
        );
        assert_eq!(result.provincia.as_deref(), Some("abcdefghijklmnopqrst"));
        assert_eq!(result.score_prov, 85.0);
        assert_eq!(result.method, MatchMethod::Fuzzy);
    }

    #[test]
    fn test_threshold_boundary_rejected_at_84() {
        // 25-char canonical name, 4 substitutions: (25-4)/25 = 84 exactly
        let m = GeoMatcher::from_pairs(vec![(
            "abcdefghijklmnopqrstuvwxy".to_string(),
            "canton uno".to_string(),
        )]);
        let result = m.match_territory(
            Some("xbcxefghijklmnopqrsxuvwxz"),
            Some("canton uno"),
            DEFAULT_THRESHOLD,
        );
        assert_eq!(result.provincia, None);
        assert_eq!(result.method, MatchMethod::FailedProv);
    }

    // -------------------------------------------------------------------------
    // DEGRADED MODE AND PAIR VALIDATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_no_catalog_mode() {
        let m = GeoMatcher::empty();
        let result = m.match_territory(Some("Pichincha"), Some("Quito"), DEFAULT_THRESHOLD);
        assert_eq!(result.provincia, None);
        assert_eq!(result.canton, None);
        assert_eq!(result.score_prov, 0.0);
        assert_eq!(result.score_canton, 0.0);
        assert_eq!(result.method, MatchMethod::NoCatalog);
    }

    #[test]
    fn test_missing_inputs_fail_cleanly() {
        let m = matcher();
        let result = m.match_territory(None, None, DEFAULT_THRESHOLD);
        assert_eq!(result.method, MatchMethod::FailedProv);
    }

    #[test]
    fn test_is_valid_pair() {
        let m = matcher();
        assert!(m.is_valid_pair("pichincha", "quito"));
        assert!(!m.is_valid_pair("pichincha", "cuenca"));
        assert!(!m.is_valid_pair("", "quito"));
        assert!(!m.is_valid_pair("pichincha", ""));
    }

    #[test]
    fn test_determinism_across_calls() {
        let m = matcher();
        let a = m.match_territory(Some("Pichinchaa"), Some("Quito"), DEFAULT_THRESHOLD);
        let b = m.match_territory(Some("Pichinchaa"), Some("Quito"), DEFAULT_THRESHOLD);
        assert_eq!(a.provincia, b.provincia);
        assert_eq!(a.score_prov, b.score_prov);
        assert_eq!(a.method, b.method);
    }
}
