//! Regulatory classification: split the section into candidate phrases,
//! map each to the canonical taxonomy (regex → repair rules → fuzzy), and
//! rank by match tier with provenance.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use strsim::jaro_winkler;
use tracing::debug;

use crate::labels::{normalize_label, MASTER_LABELS};
use crate::pipeline::normalize::Document;
use crate::pipeline::sections::Section;
use crate::template::RegulatoryRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchSource {
    Regex,
    Rule,
    Fuzzy,
    None,
}

impl MatchSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchSource::Regex => "regex",
            MatchSource::Rule => "rule",
            MatchSource::Fuzzy => "fuzzy",
            MatchSource::None => "none",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegulatoryItem {
    pub raw: String,
    pub norm: String,
    /// Parenthesised qualifier next to the label, e.g. a threshold note.
    pub threshold: String,
    pub category: Option<String>,
    pub score: u32,
    pub source: MatchSource,
}

const DEFAULT_SPLIT_TOKENS: &[&str] = &[",", ";", "·", "/", "|"];
const DEFAULT_MIN_FUZZY_SCORE: u32 = 82;

static NUMERIC_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\.\%\s\(\)\[\]\-~]+$").unwrap());
static FALLBACK_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:PRODUCT|항목|대상물질)\s*:\s*").unwrap());
static FALLBACK_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[;,/|·]\s*").unwrap());
static THRESHOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*([^()]{1,40})\s*\)").unwrap());

pub struct RegulatoryClassifier {
    split_tokens: Vec<String>,
    product_headers: Vec<String>,
    bullet_headers: Vec<String>,
    min_fuzzy_score: u32,
}

impl RegulatoryClassifier {
    pub fn new(rules: &RegulatoryRules) -> Self {
        let split_tokens = if rules.split_tokens.is_empty() {
            DEFAULT_SPLIT_TOKENS.iter().map(|s| s.to_string()).collect()
        } else {
            rules.split_tokens.clone()
        };
        Self {
            split_tokens,
            product_headers: rules.product_headers.clone(),
            bullet_headers: rules.bullet_headers.clone(),
            min_fuzzy_score: DEFAULT_MIN_FUZZY_SCORE,
        }
    }

    pub fn extract(&self, doc: &Document, section: Option<&Section>) -> Vec<RegulatoryItem> {
        let sec_text = section.map(|s| s.body.as_str()).unwrap_or("");

        let mut cands = self.split_candidates(sec_text);
        if cands.is_empty() {
            cands = fallback_regex_candidates(sec_text);
        }
        if cands.is_empty() {
            // No usable section: scan a keyword context window over
            // whatever text there is, the whole document if need be.
            let scan = if sec_text.trim().is_empty() { &doc.text } else { sec_text };
            cands = keyword_window_candidates(scan);
        }
        cands.retain(|c| !NUMERIC_ONLY_RE.is_match(c));

        let mut items: Vec<RegulatoryItem> = cands
            .into_iter()
            .map(|raw| {
                let threshold = threshold_note(&raw);
                let (category, score, source, norm) = map_label(&raw, self.min_fuzzy_score);
                RegulatoryItem { raw, norm, threshold, category, score, source }
            })
            .collect();

        // Tiered ranking; stable sort preserves candidate order per tier.
        items.sort_by_key(|i| tier(i));
        debug!("regulatory: {} candidates classified", items.len());
        items
    }

    /// Template-declared splitting: strip bullet/product headers per line,
    /// then cut on the delimiter tokens.
    fn split_candidates(&self, text: &str) -> Vec<String> {
        let mut items = Vec::new();
        for raw in text.lines() {
            let mut line = raw.trim().to_string();
            if line.chars().count() < 2 {
                continue;
            }
            for b in &self.bullet_headers {
                if let Some(rest) = line.strip_prefix(b.as_str()) {
                    line = rest.trim_start().to_string();
                }
            }
            for h in &self.product_headers {
                if let Some(rest) = line.strip_prefix(h.as_str()) {
                    line = rest.trim_start_matches([':', ' ']).to_string();
                }
            }
            let mut parts = vec![line];
            for tok in &self.split_tokens {
                parts = parts
                    .iter()
                    .flat_map(|p| p.split(tok.as_str()))
                    .map(|q| q.trim().to_string())
                    .collect();
            }
            items.extend(parts.into_iter().filter(|p| p.chars().count() >= 2));
        }
        dedup_keep_order(items)
    }
}

/// Regex fallback splitter plus canonical-pattern context capture.
fn fallback_regex_candidates(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut rough: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = FALLBACK_PREFIX_RE.replace(line, "");
        rough.extend(
            FALLBACK_SPLIT_RE
                .split(&line)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
    }

    let mut cands = Vec::new();
    let mut scan: Vec<&str> = rough.iter().map(String::as_str).collect();
    scan.push(text);
    for chunk in scan {
        for (canon_re, _) in master_regexes() {
            for m in canon_re.find_iter(chunk) {
                let extra: String = chunk[m.end()..].chars().take(40).collect();
                cands.push(format!("{}{}", m.as_str(), extra).trim().to_string());
            }
        }
    }
    dedup_keep_order(cands)
}

fn master_regexes() -> impl Iterator<Item = (&'static Regex, &'static str)> {
    static REGEXES: LazyLock<Vec<(Regex, String)>> = LazyLock::new(|| {
        // Reuse the taxonomy's priority patterns as context finders.
        MASTER_LABELS
            .labels
            .iter()
            .filter_map(|canon| {
                let escaped: Vec<String> =
                    canon.chars().map(|c| regex::escape(&c.to_string())).collect();
                Regex::new(&escaped.join(r"\s*")).ok().map(|re| (re, canon.clone()))
            })
            .collect()
    });
    REGEXES.iter().map(|(re, canon)| (re, canon.as_str()))
}

/// Last resort: lines around any regulatory hint token.
fn keyword_window_candidates(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let hints = &MASTER_LABELS.hint_tokens;
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let low = line.to_lowercase();
        if hints.iter().any(|h| low.contains(&h.to_lowercase())) {
            let from = i.saturating_sub(2);
            let to = (i + 3).min(lines.len());
            out.extend(
                lines[from..to]
                    .iter()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            );
        }
    }
    dedup_keep_order(out)
}

fn dedup_keep_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

fn threshold_note(raw: &str) -> String {
    THRESHOLD_RE
        .captures(raw)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_default()
}

/// Suffix repairs for truncated labels; these fire only after regex and
/// exact matching fail.
fn repair_rules(norm: &str) -> Option<(&'static str, u32)> {
    if norm.ends_with("작업환경측정") {
        return Some(("작업환경측정물질", 95));
    }
    if norm.ends_with("노출기준설정") {
        return Some(("노출기준설정대상물질", 95));
    }
    if norm == "prtr" {
        return Some(("PRTR물질", 95));
    }
    None
}

/// Map one candidate to the canonical taxonomy. Returns (category, score,
/// source, normalized form); unmapped candidates score 0 but are reported.
pub fn map_label(raw: &str, min_fuzzy_score: u32) -> (Option<String>, u32, MatchSource, String) {
    let norm = normalize_label(raw);

    if let Some(canon) = MASTER_LABELS.regex_hit(raw) {
        return (Some(canon.to_string()), 100, MatchSource::Regex, norm);
    }
    if let Some(canon) = MASTER_LABELS.regex_hit(&norm) {
        return (Some(canon.to_string()), 100, MatchSource::Regex, norm);
    }
    if let Some(canon) = MASTER_LABELS.exact(&norm) {
        return (Some(canon.to_string()), 100, MatchSource::Regex, norm);
    }
    if let Some((canon, score)) = repair_rules(&norm) {
        return (Some(canon.to_string()), score, MatchSource::Rule, norm);
    }
    if !norm.is_empty() {
        let best = MASTER_LABELS
            .norm_entries()
            .map(|(key, canon)| ((jaro_winkler(&norm, key) * 100.0).round() as u32, canon))
            .max_by_key(|(score, _)| *score);
        if let Some((score, canon)) = best {
            if score >= min_fuzzy_score {
                return (Some(canon.to_string()), score, MatchSource::Fuzzy, norm);
            }
        }
    }
    (None, 0, MatchSource::None, norm)
}

fn tier(item: &RegulatoryItem) -> u8 {
    if item.source == MatchSource::Regex || item.score >= 90 {
        0
    } else if item.source == MatchSource::Fuzzy {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sections::{split_sections, SectionKey};

    fn run(text: &str) -> Vec<RegulatoryItem> {
        let doc = Document::from_raw(text);
        let seg = split_sections(&doc);
        RegulatoryClassifier::new(&RegulatoryRules::default())
            .extract(&doc, seg.get(SectionKey::Regulatory))
    }

    #[test]
    fn regex_tier_maps_loose_phrasing() {
        let items = run("---- PAGE 1 ----\n15. 법적 규제현황\n작업환경측정 대상물질\n");
        let item = items
            .iter()
            .find(|i| i.raw.contains("작업환경측정"))
            .unwrap();
        assert_eq!(item.category.as_deref(), Some("작업환경측정물질"));
        assert_eq!(item.score, 100);
        assert_eq!(item.source, MatchSource::Regex);
    }

    #[test]
    fn unmapped_candidate_still_reported() {
        let items = run("---- PAGE 1 ----\n15. 법적 규제현황\n임의의 텍스트123\n");
        let item = items.iter().find(|i| i.raw.contains("임의의")).unwrap();
        assert_eq!(item.source, MatchSource::None);
        assert_eq!(item.score, 0);
        assert!(item.category.is_none());
    }

    #[test]
    fn delimiter_splitting() {
        let items = run("---- PAGE 1 ----\n15. 법적 규제현황\n유독물질 · 지정폐기물\n");
        assert!(items.iter().any(|i| i.category.as_deref() == Some("유독물질")));
        assert!(items.iter().any(|i| i.category.as_deref() == Some("지정폐기물")));
    }

    #[test]
    fn suffix_repair_rule() {
        let (canon, score, source, _) = map_label("수질오염 작업환경측정", DEFAULT_MIN_FUZZY_SCORE);
        // Regex never fires without the 물질 suffix; the repair rule does.
        assert_eq!(canon.as_deref(), Some("작업환경측정물질"));
        assert_eq!(score, 95);
        assert_eq!(source, MatchSource::Rule);
    }

    #[test]
    fn fuzzy_tier_catches_typos() {
        let (canon, score, source, _) = map_label("지성폐기물", DEFAULT_MIN_FUZZY_SCORE);
        assert_eq!(canon.as_deref(), Some("지정폐기물"));
        assert!(score >= DEFAULT_MIN_FUZZY_SCORE);
        assert_eq!(source, MatchSource::Fuzzy);
    }

    #[test]
    fn tiers_rank_and_preserve_order() {
        let items = run(
            "---- PAGE 1 ----\n15. 법적 규제현황\n무관한후보가나다\n유독물질\n또다른무관한것\n",
        );
        assert_eq!(items[0].category.as_deref(), Some("유독물질"));
        // Both unmapped candidates keep their original relative order.
        let unmapped: Vec<&str> = items
            .iter()
            .filter(|i| i.source == MatchSource::None)
            .map(|i| i.raw.as_str())
            .collect();
        assert_eq!(unmapped, vec!["무관한후보가나다", "또다른무관한것"]);
    }

    #[test]
    fn threshold_note_captured() {
        let items = run("---- PAGE 1 ----\n15. 법적 규제현황\n노출기준설정 대상물질 (25kg 이상)\n");
        let item = items.iter().find(|i| !i.threshold.is_empty()).unwrap();
        assert_eq!(item.threshold, "25kg 이상");
        assert_eq!(item.category.as_deref(), Some("노출기준설정대상물질"));
    }

    #[test]
    fn whole_document_window_when_section_missing() {
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n서두 내용\n이 제품은 작업환경측정 대상물질 입니다\n후속 내용\n",
        );
        let seg = split_sections(&doc);
        let items = RegulatoryClassifier::new(&RegulatoryRules::default())
            .extract(&doc, seg.get(SectionKey::Regulatory));
        assert!(items
            .iter()
            .any(|i| i.category.as_deref() == Some("작업환경측정물질")));
    }
}
