//! Reference data loaded once at startup: the master regulatory taxonomy
//! and the canonical physical-chemical property label aliases.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct MasterLabelsFile {
    labels: Vec<String>,
    regex_map: Vec<RegexMapEntry>,
    hint_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegexMapEntry {
    pattern: String,
    canon: String,
}

/// Canonical regulatory taxonomy plus its normalized-form lookup.
pub struct MasterLabelIndex {
    pub labels: Vec<String>,
    /// (normalized form, canonical label), insertion order preserved.
    norm_index: Vec<(String, String)>,
    /// Priority patterns checked before any fuzzy matching.
    regex_map: Vec<(Regex, String)>,
    pub hint_tokens: Vec<String>,
}

impl MasterLabelIndex {
    fn build(file: MasterLabelsFile) -> Self {
        let norm_index = file
            .labels
            .iter()
            .map(|l| (normalize_label(l), l.clone()))
            .collect();
        let regex_map = file
            .regex_map
            .into_iter()
            .filter_map(|e| match Regex::new(&e.pattern) {
                Ok(re) => Some((re, e.canon)),
                Err(err) => {
                    warn!("skipping malformed master label pattern {:?}: {}", e.pattern, err);
                    None
                }
            })
            .collect();
        Self {
            labels: file.labels,
            norm_index,
            regex_map,
            hint_tokens: file.hint_tokens,
        }
    }

    /// First priority-regex hit on `text`, if any.
    pub fn regex_hit(&self, text: &str) -> Option<&str> {
        self.regex_map
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, canon)| canon.as_str())
    }

    /// Exact match of a normalized form against the index.
    pub fn exact(&self, norm: &str) -> Option<&str> {
        self.norm_index
            .iter()
            .find(|(n, _)| n == norm)
            .map(|(_, canon)| canon.as_str())
    }

    /// Normalized forms paired with their canonical labels, for fuzzy scans.
    pub fn norm_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.norm_index.iter().map(|(n, c)| (n.as_str(), c.as_str()))
    }
}

static BULLET_RUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\s\u{00A0}\u{2007}\u{202F}\u{2060}\u{00B7}\u{2022}\u{2219}\u{2027}\u{30FB}·•ㆍ∙‧・]+").unwrap()
});
static BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[【】\[\]{}<>〈〉()（）]").unwrap());

/// Normalize a regulatory label for index lookup: NFKC, drop bullet/space
/// runs and bracket characters, lowercase ASCII only.
pub fn normalize_label(s: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let s: String = s.nfkc().collect();
    let s = BULLET_RUN_RE.replace_all(&s, "");
    let s = BRACKET_RE.replace_all(&s, "");
    s.chars()
        .map(|c| if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

pub static MASTER_LABELS: LazyLock<MasterLabelIndex> = LazyLock::new(|| {
    let file: MasterLabelsFile =
        serde_json::from_str(include_str!("../data/master_labels.json"))
            .expect("data/master_labels.json is shipped with the binary and must parse");
    MasterLabelIndex::build(file)
});

#[derive(Debug, Deserialize)]
pub struct PropertyAlias {
    pub key: String,
    pub aliases: Vec<String>,
}

/// Canonical property keys with their label aliases, in matching priority
/// order (longer, more specific aliases listed first per key).
pub static PHYSCHEM_ALIASES: LazyLock<Vec<PropertyAlias>> = LazyLock::new(|| {
    serde_json::from_str(include_str!("../data/physchem_aliases.json"))
        .expect("data/physchem_aliases.json is shipped with the binary and must parse")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bullets_and_brackets() {
        assert_eq!(normalize_label("· 유독 물질 (표 1)"), "유독물질표1");
        assert_eq!(normalize_label("PRTR물질"), "prtr물질");
    }

    #[test]
    fn master_index_exact_lookup() {
        let idx = &*MASTER_LABELS;
        assert_eq!(idx.exact(&normalize_label("유독물질")), Some("유독물질"));
        assert_eq!(idx.exact("no-such-label"), None);
    }

    #[test]
    fn master_index_regex_priority() {
        let idx = &*MASTER_LABELS;
        assert_eq!(idx.regex_hit("작업 환경 측정 대상 물질"), Some("작업환경측정물질"));
        assert_eq!(idx.regex_hit("prtr 물질"), Some("PRTR물질"));
    }

    #[test]
    fn physchem_aliases_loaded() {
        assert!(PHYSCHEM_ALIASES.iter().any(|p| p.key == "ph"));
        assert!(PHYSCHEM_ALIASES.iter().any(|p| p.key == "boiling_point"));
    }
}
