use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::normalize::Document;

/// The canonical section ids this pipeline recognizes. Numbering follows the
/// GHS sheet layout; sections 5-8 and 12-13 are never extracted from and are
/// only relevant as boundary hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SectionKey {
    Identification,
    Hazards,
    Composition,
    FirstAid,
    PhysicalChemical,
    StabilityReactivity,
    Toxicological,
    Transport,
    Regulatory,
    OtherInformation,
}

impl SectionKey {
    pub const ALL: [SectionKey; 10] = [
        SectionKey::Identification,
        SectionKey::Hazards,
        SectionKey::Composition,
        SectionKey::FirstAid,
        SectionKey::PhysicalChemical,
        SectionKey::StabilityReactivity,
        SectionKey::Toxicological,
        SectionKey::Transport,
        SectionKey::Regulatory,
        SectionKey::OtherInformation,
    ];

    /// The five keys the confidence summary counts as "wanted".
    pub const WANTED: [SectionKey; 5] = [
        SectionKey::Identification,
        SectionKey::Hazards,
        SectionKey::Composition,
        SectionKey::PhysicalChemical,
        SectionKey::Regulatory,
    ];

    pub fn number(self) -> u8 {
        match self {
            SectionKey::Identification => 1,
            SectionKey::Hazards => 2,
            SectionKey::Composition => 3,
            SectionKey::FirstAid => 4,
            SectionKey::PhysicalChemical => 9,
            SectionKey::StabilityReactivity => 10,
            SectionKey::Toxicological => 11,
            SectionKey::Transport => 14,
            SectionKey::Regulatory => 15,
            SectionKey::OtherInformation => 16,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Identification => "1_identification",
            SectionKey::Hazards => "2_hazards",
            SectionKey::Composition => "3_composition",
            SectionKey::FirstAid => "4_first_aid",
            SectionKey::PhysicalChemical => "9_physical_chemical",
            SectionKey::StabilityReactivity => "10_stability_reactivity",
            SectionKey::Toxicological => "11_toxicological",
            SectionKey::Transport => "14_transport",
            SectionKey::Regulatory => "15_regulatory",
            SectionKey::OtherInformation => "16_other_information",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub key: SectionKey,
    /// The matched header line, trimmed.
    pub title: String,
    pub start: usize,
    pub end: usize,
    /// End of the header line; the body spans `header_end..end`.
    pub header_end: usize,
    pub body: String,
}

/// Ordered, non-overlapping section map. A section's end equals the next
/// detected header's start (or an earlier keyword-hint cut, or document end).
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub sections: BTreeMap<SectionKey, Section>,
    pub order: Vec<SectionKey>,
}

impl Segmentation {
    pub fn get(&self, key: SectionKey) -> Option<&Section> {
        self.sections.get(&key)
    }

    pub fn body(&self, key: SectionKey) -> Option<&str> {
        self.sections.get(&key).map(|s| s.body.as_str()).filter(|b| !b.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn wanted_filled(&self) -> usize {
        SectionKey::WANTED
            .iter()
            .filter(|k| self.body(**k).is_some())
            .count()
    }
}

// Korean keyword patterns, loose on purpose: suppliers write the same
// section under many phrasings. Checked per line.
const KW_IDENT: &str = r"(화학제품|제품).*(회사|제조회사|공급자)|제품\s*(및)?\s*회사\s*식별|식별\s*및\s*공급자";
const KW_HAZARDS: &str = r"(유해|위험).*성|위험성\s*및\s*유해성";
const KW_COMPOSITION: &str = r"(구성|성분).*(명칭|정보|함유량|함량)";
const KW_FIRST_AID: &str = r"응급\s*조치|응급조치";
const KW_PHYSCHEM: &str = r"(물리|화학).*(특성|성질)";
const KW_STABILITY: &str = r"안정성.*반응성|안정성/반응성";
const KW_TOX: &str = r"독성.*정보|독성";
const KW_TRANSPORT: &str = r"운송.*(정보)|운송\s*정보";
const KW_REGULATORY: &str = r"(법규|규제).*(현황|정보|사항)|관련\s*법규|법적\s*규제";
const KW_OTHER: &str = r"(기타|참고).*정보|그\s*밖의\s*참고사항";

// English labels with their fixed section numbers.
const EN_IDENT: &str = r"product\s*(?:and\s*company\s*)?identification";
const EN_HAZARDS: &str = r"hazards?(?:\s*identification)?";
const EN_COMPOSITION: &str = r"(?:composition|information\s+on\s+ingredients|ingredients?)";
const EN_FIRST_AID: &str = r"first\s*-?\s*aid";
const EN_PHYSCHEM: &str = r"physical\s*(?:and\s*)?chemical\s*propert(?:y|ies)";
const EN_STABILITY: &str = r"stability\s*and\s*reactivity";
const EN_TOX: &str = r"(?:toxicology|toxicological\s*information)";
const EN_TRANSPORT: &str = r"transport\s*information";
const EN_REGULATORY: &str = r"regulatory\s*(?:information|status)";
const EN_OTHER: &str = r"other\s*information";

// After NFKC, circled digits and roman numerals collapse to ASCII, so the
// numbered-header prefix only needs the plain forms.
const NUM_PREFIX: &str = r"(?i)^\s*(?:section\s+)?(?:\d{1,2}|[ivx]{1,4})\s*[.\)\]:>\-]?\s*";

static NUM_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(NUM_PREFIX).unwrap());

struct KeyMatcher {
    key: SectionKey,
    kw: Regex,
    en_numbered: Regex,
    en_bare: Regex,
}

static MATCHERS: LazyLock<Vec<KeyMatcher>> = LazyLock::new(|| {
    let specs: [(SectionKey, &str, &str); 10] = [
        (SectionKey::Identification, KW_IDENT, EN_IDENT),
        (SectionKey::Hazards, KW_HAZARDS, EN_HAZARDS),
        (SectionKey::Composition, KW_COMPOSITION, EN_COMPOSITION),
        (SectionKey::FirstAid, KW_FIRST_AID, EN_FIRST_AID),
        (SectionKey::PhysicalChemical, KW_PHYSCHEM, EN_PHYSCHEM),
        (SectionKey::StabilityReactivity, KW_STABILITY, EN_STABILITY),
        (SectionKey::Toxicological, KW_TOX, EN_TOX),
        (SectionKey::Transport, KW_TRANSPORT, EN_TRANSPORT),
        (SectionKey::Regulatory, KW_REGULATORY, EN_REGULATORY),
        (SectionKey::OtherInformation, KW_OTHER, EN_OTHER),
    ];
    specs
        .into_iter()
        .map(|(key, kw, en)| KeyMatcher {
            key,
            kw: Regex::new(kw).unwrap(),
            en_numbered: Regex::new(&format!(
                r"(?i)^\s*(?:section\s*)?{}\s*[.\)\]:>\-]?\s*(?:{})",
                key.number(),
                en
            ))
            .unwrap(),
            en_bare: Regex::new(&format!(r"(?i)^\s*(?:{})\b", en)).unwrap(),
        })
        .collect()
});

/// Boundary hints: keyword patterns implying the *next* section began even
/// though its formal header was missed. Includes sections 12/13, which have
/// no anchor of their own.
static NEXT_HINTS: LazyLock<Vec<(SectionKey, Vec<Regex>)>> = LazyLock::new(|| {
    let raw: [(SectionKey, &[&str]); 10] = [
        (SectionKey::Identification, &[KW_HAZARDS, KW_COMPOSITION]),
        (SectionKey::Hazards, &[KW_COMPOSITION, KW_FIRST_AID]),
        (SectionKey::Composition, &[KW_FIRST_AID, KW_PHYSCHEM]),
        (SectionKey::FirstAid, &[KW_PHYSCHEM, KW_STABILITY]),
        (SectionKey::PhysicalChemical, &[KW_STABILITY, KW_TOX]),
        (SectionKey::StabilityReactivity, &[KW_TOX, KW_TRANSPORT]),
        (
            SectionKey::Toxicological,
            &[
                r"환경|생태|생물|생태독성|환경영향",
                r"폐기.*(주의|방법|처리)",
                KW_TRANSPORT,
            ],
        ),
        (SectionKey::Transport, &[KW_REGULATORY, KW_OTHER]),
        (SectionKey::Regulatory, &[KW_OTHER]),
        (SectionKey::OtherInformation, &[]),
    ];
    raw.into_iter()
        .map(|(key, pats)| {
            (
                key,
                pats.iter().map(|p| Regex::new(p).unwrap()).collect(),
            )
        })
        .collect()
});

#[derive(Debug)]
struct Anchor {
    key: SectionKey,
    start: usize,
    end: usize,
    title: String,
}

fn line_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |raw| {
        let start = offset;
        offset += raw.len();
        (start, raw.trim_end_matches('\n'))
    })
}

/// Ordered anchor attempt list for one key: numbered Korean header, bare
/// Korean keyword line, numbered English label, bare English label. First
/// hit of the first successful pass wins.
fn find_anchor(text: &str, m: &KeyMatcher) -> Option<Anchor> {
    let mut numbered = None;
    let mut bare = None;
    let mut en_numbered = None;
    let mut en_bare = None;

    for (start, line) in line_spans(text) {
        if line.trim().is_empty() {
            continue;
        }
        if numbered.is_none() && NUM_PREFIX_RE.is_match(line) && m.kw.is_match(line) {
            numbered = Some((start, line));
            break; // best pass hit; nothing later can beat it
        }
        if bare.is_none() && m.kw.is_match(line) {
            bare = Some((start, line));
        }
        if en_numbered.is_none() && m.en_numbered.is_match(line) {
            en_numbered = Some((start, line));
        }
        if en_bare.is_none() && m.en_bare.is_match(line) {
            en_bare = Some((start, line));
        }
    }

    let (start, line) = numbered.or(bare).or(en_numbered).or(en_bare)?;
    Some(Anchor {
        key: m.key,
        start,
        end: start + line.len(),
        title: line.trim().to_string(),
    })
}

/// Earliest hint-pattern position in `body` implying the next section began
/// without a detected header. Offsets are relative to `body`.
fn cut_by_next_hints(key: SectionKey, body: &str) -> Option<usize> {
    let hints = NEXT_HINTS.iter().find(|(k, _)| *k == key).map(|(_, h)| h)?;
    if hints.is_empty() {
        return None;
    }
    let mut best: Option<usize> = None;
    for (start, line) in line_spans(body) {
        for hint in hints {
            let Some(found) = hint.find(line) else { continue };
            // A hint counts when the line leads with it, or when it follows
            // a numbered-header prefix.
            let leads = line[..found.start()].trim().is_empty();
            if leads || NUM_PREFIX_RE.is_match(line) {
                best = Some(best.map_or(start, |b: usize| b.min(start)));
            }
        }
        if best.is_some() {
            break;
        }
    }
    best
}

/// Split a normalized document into canonical sections. Never fails: zero
/// detected headers yields an empty map plus a diagnostic.
pub fn split_sections(doc: &Document) -> Segmentation {
    let text = &doc.text;
    let mut anchors: Vec<Anchor> = MATCHERS
        .iter()
        .filter_map(|m| find_anchor(text, m))
        .collect();

    if anchors.is_empty() {
        warn!("segmenter: no section headers detected");
        return Segmentation::default();
    }

    anchors.sort_by_key(|a| (a.start, a.key.number()));

    let mut sections = BTreeMap::new();
    let mut order = Vec::new();

    for i in 0..anchors.len() {
        let a = &anchors[i];
        let end_by_header = anchors.get(i + 1).map(|n| n.start).unwrap_or(text.len());
        let raw_body = &text[a.end.min(end_by_header)..end_by_header];
        let end = match cut_by_next_hints(a.key, raw_body) {
            Some(cut) => a.end + cut,
            None => end_by_header,
        };
        let body = text[a.end.min(end)..end].trim().to_string();
        if sections.contains_key(&a.key) {
            continue; // first anchor per key only
        }
        sections.insert(
            a.key,
            Section {
                key: a.key,
                title: a.title.clone(),
                start: a.start,
                end,
                header_end: a.end,
                body,
            },
        );
        order.push(a.key);
    }

    debug!("segmenter: {} sections detected", sections.len());
    Segmentation { sections, order }
}

/// Truncation point for a body that swallowed a later section's header.
/// Extractors use this as a defensive cut on mis-segmentation.
pub fn later_header_cut(key: SectionKey, body: &str) -> Option<usize> {
    let mut best: Option<usize> = None;
    for m in MATCHERS.iter().filter(|m| m.key.number() > key.number()) {
        for (start, line) in line_spans(body) {
            if NUM_PREFIX_RE.is_match(line) && (m.kw.is_match(line) || m.en_numbered.is_match(line))
            {
                best = Some(best.map_or(start, |b: usize| b.min(start)));
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str) -> Segmentation {
        split_sections(&Document::from_raw(text))
    }

    #[test]
    fn composition_bounded_by_next_header() {
        let text = "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nSodium hydroxide, 1310-73-2, 4~5%\n9. 물리화학적 특성\n외관: 액체\n";
        let s = seg(text);
        let comp = s.get(SectionKey::Composition).expect("composition section");
        assert!(comp.body.contains("Sodium hydroxide"));
        assert!(!comp.body.contains("물리화학적"));
        let phys = s.get(SectionKey::PhysicalChemical).expect("physchem section");
        assert_eq!(comp.end, phys.start);
    }

    #[test]
    fn sections_ordered_and_non_overlapping() {
        let text = "1. 화학제품과 회사에 관한 정보\n제품명: X\n2. 유해성·위험성\n위험\n3. 구성성분의 명칭 및 함유량\nrows\n15. 법적 규제현황\n유독물질\n";
        let s = seg(text);
        let mut prev_end = 0;
        for key in &s.order {
            let sec = s.get(*key).unwrap();
            assert!(sec.start >= prev_end);
            prev_end = sec.end;
        }
        assert_eq!(s.order.first(), Some(&SectionKey::Identification));
    }

    #[test]
    fn english_headers() {
        let text = "SECTION 1: Product and company identification\nProduct name: Acme Cleaner\nSECTION 3: Composition / information on ingredients\nrows here\nSECTION 9: Physical and chemical properties\npH: 7\n";
        let s = seg(text);
        assert!(s.get(SectionKey::Identification).is_some());
        assert!(s.get(SectionKey::Composition).is_some());
        assert!(s.get(SectionKey::PhysicalChemical).is_some());
    }

    #[test]
    fn no_headers_yields_empty_map() {
        let s = seg("완전히 무관한 텍스트\n아무 헤더도 없음\n");
        assert!(s.is_empty());
        assert!(s.order.is_empty());
    }

    #[test]
    fn segmentation_is_idempotent() {
        let text = "2. 유해성·위험성\n신호어: 위험\n3. 구성성분의 명칭 및 함유량\nrows\n";
        let a = seg(text);
        let b = seg(text);
        let spans =
            |s: &Segmentation| s.order.iter().map(|k| { let v = s.get(*k).unwrap(); (v.start, v.end) }).collect::<Vec<_>>();
        assert_eq!(spans(&a), spans(&b));
    }

    #[test]
    fn hint_cut_stops_tox_body_at_disposal() {
        let text = "11. 독성에 관한 정보\n경구 LD50 1000 mg/kg\n폐기 시 주의사항\n소각 처리\n";
        let s = seg(text);
        let tox = s.get(SectionKey::Toxicological).unwrap();
        assert!(tox.body.contains("LD50"));
        assert!(!tox.body.contains("소각"));
    }

    #[test]
    fn later_header_cut_detects_missed_boundary() {
        let body = "외관: 액체\npH: 13\n10. 안정성 및 반응성\n안정함\n";
        let cut = later_header_cut(SectionKey::PhysicalChemical, body).unwrap();
        assert!(body[..cut].contains("pH"));
        assert!(!body[..cut].contains("안정성"));
    }
}
