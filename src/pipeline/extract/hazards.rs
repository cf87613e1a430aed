//! Hazard-section extraction: GHS classification lines, H/P codes,
//! pictogram derivation, signal word, and the hazard/precaution statement
//! blocks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::normalize::Document;
use crate::pipeline::sections::Section;

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub hazard_class: String,
    pub category: String,
    pub raw: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HazardData {
    pub classifications: Vec<Classification>,
    pub h_codes: Vec<String>,
    pub p_codes: Vec<String>,
    pub pictograms: Vec<String>,
    pub hazard_text: String,
    pub precaution_text: String,
    pub signal_word: String,
}

static H_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bH\s*[1-4]\d{2}[A-Z]?\b").unwrap());
static P_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bP\d{3}[A-Z]?\b").unwrap());
static P_COMBO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bP\d{3}[A-Z]?(?:\s*\+\s*P\d{3}[A-Z]?)+\b").unwrap());

static CLASS_LINE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^\s*[-·]?\s*(?P<class>[^:\n]+?)\s*(?:구분|Category)\s*(?P<cat>\d+[A-Z]?)\b")
            .unwrap(),
        Regex::new(r"(?i)^\s*[-·]?\s*(?P<class>[^:\n]+?)\s*[:\-]\s*구분\s*(?P<cat>\d+[A-Z]?)\b")
            .unwrap(),
    ]
});

static STOP_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:예방조치문구|유해[·/\s]?위험문구|그림문자|표지요소|label\s*elements|신호어|저장|폐기|대응|응급조치|취급\s*및\s*저장|handling|first[-\s]?aid)")
        .unwrap()
});

static BULLET_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-·▪▫▶]+\s*").unwrap());

static SIGNAL_KO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"신호어\s*[:\-]?\s*(위험|경고|해당\s*없음|무\s*해당)").unwrap());
static SIGNAL_EN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)signal\s*word\s*[:\-]?\s*(danger|warning|none|not\s*applicable|not\s*classified)")
        .unwrap()
});

const HAZARD_LABELS: &[&str] = &[
    "유해·위험문구",
    "유해/위험문구",
    "hazard statements",
    "유해 위험문구",
    "경고문",
];
const PRECAUTION_LABELS: &[&str] =
    &["예방조치문구", "precautionary statements", "예방", "주의문"];

const H_TO_PICTO: &[(&str, &str)] = &[
    ("H290", "GHS05"), ("H314", "GHS05"), ("H318", "GHS05"),
    ("H302", "GHS07"), ("H312", "GHS07"), ("H315", "GHS07"),
    ("H319", "GHS07"), ("H335", "GHS07"),
    ("H300", "GHS06"), ("H310", "GHS06"), ("H330", "GHS06"),
    ("H340", "GHS08"), ("H341", "GHS08"), ("H350", "GHS08"),
    ("H351", "GHS08"), ("H360", "GHS08"), ("H361", "GHS08"),
    ("H370", "GHS08"), ("H372", "GHS08"),
    ("H224", "GHS02"), ("H225", "GHS02"), ("H226", "GHS02"),
    ("H228", "GHS02"), ("H250", "GHS02"),
    ("H280", "GHS04"),
    ("H400", "GHS09"), ("H410", "GHS09"), ("H411", "GHS09"),
    ("H412", "GHS09"), ("H413", "GHS09"),
];

pub fn extract_hazards(doc: &Document, section: Option<&Section>) -> HazardData {
    let sec_text = section.map(|s| s.body.as_str()).unwrap_or("");
    // Codes and the signal word tolerate a missed section; statement blocks
    // and classification lines do not.
    let scan_text = if sec_text.trim().is_empty() { &doc.text } else { sec_text };

    let h_codes = list_h_codes(scan_text);
    let p_codes = list_p_codes(scan_text);
    let pictograms = pictos_for(&h_codes);

    HazardData {
        classifications: extract_classifications(sec_text),
        hazard_text: slice_block(sec_text, HAZARD_LABELS),
        precaution_text: slice_precaution_block(sec_text, PRECAUTION_LABELS),
        signal_word: extract_signal_word(scan_text),
        h_codes,
        p_codes,
        pictograms,
    }
}

pub fn list_h_codes(text: &str) -> Vec<String> {
    let set: BTreeSet<String> = H_CODE_RE
        .find_iter(text)
        .map(|m| m.as_str().replace(' ', ""))
        .collect();
    set.into_iter().collect()
}

/// Combined statements (`P301+P330+P331`) are kept whole and also broken
/// into their member codes.
pub fn list_p_codes(text: &str) -> Vec<String> {
    let mut set: BTreeSet<String> = BTreeSet::new();
    for combo in P_COMBO_RE.find_iter(text) {
        let compact: String = combo.as_str().chars().filter(|c| !c.is_whitespace()).collect();
        let members: Vec<String> = P_CODE_RE
            .find_iter(&compact)
            .map(|m| m.as_str().to_string())
            .collect();
        set.extend(members);
        set.insert(compact);
    }
    for m in P_CODE_RE.find_iter(text) {
        set.insert(m.as_str().to_string());
    }
    set.into_iter().collect()
}

fn pictos_for(h_codes: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = h_codes
        .iter()
        .filter_map(|h| {
            let base = h.get(..4)?;
            H_TO_PICTO
                .iter()
                .find(|(code, _)| *code == base)
                .map(|(_, picto)| picto.to_string())
        })
        .collect();
    set.into_iter().collect()
}

fn extract_classifications(text: &str) -> Vec<Classification> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for line in text.lines() {
        let s = line.trim();
        if s.is_empty() {
            continue;
        }
        for re in CLASS_LINE_RES.iter() {
            let Some(c) = re.captures(s) else { continue };
            let class = c["class"]
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .trim_matches(|ch: char| " -:·".contains(ch))
                .to_string();
            let cat = c["cat"].trim().to_string();
            if seen.insert((class.clone(), cat.clone())) {
                out.push(Classification {
                    hazard_class: class,
                    category: cat,
                    raw: s.to_string(),
                });
            }
            break;
        }
    }
    out
}

pub fn extract_signal_word(text: &str) -> String {
    if let Some(c) = SIGNAL_KO_RE.captures(text) {
        let w = &c[1];
        return if w.contains("위험") {
            "위험".into()
        } else if w.contains("경고") {
            "경고".into()
        } else {
            "해당없음".into()
        };
    }
    if let Some(c) = SIGNAL_EN_RE.captures(text) {
        let w = c[1].to_lowercase();
        return if w.contains("danger") {
            "위험".into()
        } else if w.contains("warning") {
            "경고".into()
        } else {
            "해당없음".into()
        };
    }
    String::new()
}

/// Collect the lines after the first matching label until a stop label.
fn slice_block(text: &str, labels: &[&str]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(start) = find_label_lines(&lines, labels).into_iter().next() else {
        return String::new();
    };
    collect_until_stop(&lines[start + 1..])
}

/// Precaution labels often appear twice (label element vs body); the real
/// block is the candidate with the densest P-code run behind it.
fn slice_precaution_block(text: &str, labels: &[&str]) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let candidates = find_label_lines(&lines, labels);
    let best = candidates.into_iter().max_by_key(|&i| {
        let to = (i + 81).min(lines.len());
        let chunk = lines[i + 1..to].join("\n");
        P_CODE_RE.find_iter(&chunk).count()
    });
    match best {
        Some(i) => collect_until_stop(&lines[i + 1..]),
        None => String::new(),
    }
}

fn find_label_lines(lines: &[&str], labels: &[&str]) -> Vec<usize> {
    let mut idxs = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let low = line.trim().to_lowercase();
        if labels.iter().any(|l| low.contains(&l.to_lowercase())) {
            idxs.push(i);
        }
    }
    idxs
}

fn collect_until_stop(lines: &[&str]) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in lines {
        if STOP_LABEL_RE.is_match(line) {
            break;
        }
        out.push(BULLET_PREFIX_RE.replace(line, "").trim_end().to_string());
    }
    while out.first().is_some_and(|l| l.trim().is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sections::{split_sections, SectionKey};

    fn run(text: &str) -> HazardData {
        let doc = Document::from_raw(text);
        let seg = split_sections(&doc);
        extract_hazards(&doc, seg.get(SectionKey::Hazards))
    }

    #[test]
    fn codes_and_pictograms() {
        let data = run(
            "---- PAGE 1 ----\n2. 유해성·위험성\n피부 부식성: 구분 1\nH314 피부에 심한 화상과 눈 손상을 일으킴\nH290 금속을 부식시킬 수 있음\nP280 보호장갑을 착용하시오\n",
        );
        assert_eq!(data.h_codes, vec!["H290", "H314"]);
        assert!(data.p_codes.contains(&"P280".to_string()));
        assert_eq!(data.pictograms, vec!["GHS05"]);
    }

    #[test]
    fn combined_p_codes_split_and_kept() {
        let codes = list_p_codes("P301 + P330 + P331 입을 헹구시오");
        assert!(codes.contains(&"P301+P330+P331".to_string()));
        assert!(codes.contains(&"P330".to_string()));
    }

    #[test]
    fn classification_lines() {
        let data = run(
            "---- PAGE 1 ----\n2. 유해성·위험성\n- 피부 부식성/자극성 구분 1\n- 심한 눈 손상성/눈 자극성 : 구분 1\n",
        );
        assert_eq!(data.classifications.len(), 2);
        assert_eq!(data.classifications[0].category, "1");
        assert!(data.classifications[0].hazard_class.contains("피부"));
    }

    #[test]
    fn signal_word_korean_and_english() {
        assert_eq!(extract_signal_word("신호어: 위험"), "위험");
        assert_eq!(extract_signal_word("Signal word: Warning"), "경고");
        assert_eq!(extract_signal_word("신호어 - 해당 없음"), "해당없음");
        assert_eq!(extract_signal_word("no signal here"), "");
    }

    #[test]
    fn hazard_block_sliced_until_stop_label() {
        let data = run(
            "---- PAGE 1 ----\n2. 유해성·위험성\n유해·위험문구\nH314 심한 화상\nH318 눈 손상\n예방조치문구\nP280 보호구 착용\n",
        );
        assert!(data.hazard_text.contains("H314"));
        assert!(!data.hazard_text.contains("P280"));
        assert!(data.precaution_text.contains("P280"));
    }

    #[test]
    fn precaution_block_prefers_dense_candidate() {
        let data = run(
            "---- PAGE 1 ----\n2. 유해성·위험성\n예방조치문구 참조\n그림문자\n예방조치문구\nP210 열·불꽃 금지\nP280 보호구 착용\nP301+P330 입을 헹굼\n",
        );
        assert!(data.precaution_text.contains("P210"));
        assert!(data.precaution_text.contains("P280"));
    }

    #[test]
    fn missing_section_still_scans_codes() {
        let doc = Document::from_raw("---- PAGE 1 ----\n문서 본문 H225 표기\n신호어: 경고\n");
        let seg = split_sections(&doc);
        let data = extract_hazards(&doc, seg.get(SectionKey::Hazards));
        assert_eq!(data.h_codes, vec!["H225"]);
        assert_eq!(data.signal_word, "경고");
        assert!(data.hazard_text.is_empty());
    }
}
