//! Identification metadata: product name, company, address, and the sheet's
//! own document number. Section 1 first, whole document as fallback.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::pipeline::normalize::Document;
use crate::pipeline::sections::Section;
use crate::template::{compile_rules, IdentRules, MetaRules};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Identification {
    pub product_name: String,
    pub company: String,
    pub address: String,
    pub doc_no: String,
}

static PRODUCT_BASE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(
            r"(?mi)^\s*(?:제품명|제품\s*식별자|표지명|상품명|상표명|제품명칭|Product\s*(?:name|identifier))\s*:\s*(.+)$",
        )
        .unwrap(),
        // Label on its own line, value on the next.
        Regex::new(r"(?mi)^[ \t]*(?:제품명|Product\s*name)[ \t]*\n[ \t]*(.{2,80})$").unwrap(),
    ]
});

static COMPANY_BASE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![Regex::new(
        r"(?mi)^\s*(?:제조사|제조자|회사명|공급사|공급자|수입사|Manufacturer|Supplier|Company(?:\s*name)?)\s*:\s*(.+)$",
    )
    .unwrap()]
});

static ADDRESS_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[ \t]*(?:주소|Address)\s*:\s*(.*)$").unwrap());
static ADDRESS_STOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[ \t]*(?:TEL|전화|FAX|팩스|E-?mail|Homepage|Website|웹|홈페이지|긴급|\d{1,2}[.)])")
        .unwrap()
});

static DOC_NO_FALLBACKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\bAA\d{5}-\d{10}\b").unwrap(),
        Regex::new(r"(?i)\b(?:MSDS|SDS)\s*(?:관리번호|No\.?|번호|#)\s*:?\s*([A-Z0-9\-]{10,})")
            .unwrap(),
        Regex::new(r"\b[A-Z0-9]{2,}-[A-Z0-9]{6,}\b").unwrap(),
    ]
});

pub struct IdentExtractor {
    product_extra: Vec<Regex>,
    company_extra: Vec<Regex>,
    address_extra: Vec<Regex>,
    doc_no_extra: Vec<Regex>,
}

impl IdentExtractor {
    pub fn new(ident: &IdentRules, meta: &MetaRules) -> Self {
        Self {
            product_extra: compile_rules(&ident.product_patterns),
            company_extra: compile_rules(&ident.company_patterns),
            address_extra: compile_rules(&ident.address_patterns),
            doc_no_extra: compile_rules(&meta.doc_no_patterns),
        }
    }

    pub fn extract(&self, doc: &Document, section: Option<&Section>) -> Identification {
        let sec1 = section.map(|s| s.body.as_str()).unwrap_or("");
        let full = doc.text.as_str();

        let product = first_hit(sec1, &PRODUCT_BASE, &self.product_extra)
            .or_else(|| first_hit(full, &PRODUCT_BASE, &self.product_extra))
            .or_else(|| kv_fallback(full, &["제품명", "Product name"]))
            .unwrap_or_default();

        let company = first_hit(sec1, &COMPANY_BASE, &self.company_extra)
            .or_else(|| first_hit(full, &COMPANY_BASE, &self.company_extra))
            .or_else(|| kv_fallback(full, &["제조사", "회사명", "Manufacturer", "Supplier"]))
            .unwrap_or_default();

        let address = first_hit(sec1, &[], &self.address_extra)
            .or_else(|| extract_address(sec1))
            .or_else(|| first_hit(full, &[], &self.address_extra))
            .or_else(|| extract_address(full))
            .unwrap_or_default();

        let doc_no = first_hit(full, &DOC_NO_FALLBACKS, &self.doc_no_extra).unwrap_or_default();

        Identification {
            product_name: clean(&product),
            company: clean(&company),
            address: clean(&address),
            doc_no: doc_no.trim().to_string(),
        }
    }
}

/// Template-declared patterns run before the built-in list.
fn first_hit(text: &str, base: &[Regex], extra: &[Regex]) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    extra
        .iter()
        .chain(base.iter())
        .find_map(|re| {
            re.captures(text).map(|c| {
                c.get(1)
                    .map(|m| m.as_str())
                    .unwrap_or_else(|| c.get(0).map(|m| m.as_str()).unwrap_or(""))
                    .trim()
                    .to_string()
            })
        })
        .filter(|s| !s.is_empty())
}

/// Address spans lines until a phone/fax/next-numbered-item line starts.
fn extract_address(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let Some(c) = ADDRESS_LABEL_RE.captures(line) else {
            continue;
        };
        let mut parts: Vec<String> = Vec::new();
        let head = c[1].trim();
        if !head.is_empty() {
            parts.push(head.to_string());
        }
        for follow in lines.iter().skip(i + 1).take(2) {
            let t = follow.trim();
            if t.is_empty() || ADDRESS_STOP_RE.is_match(follow) {
                break;
            }
            parts.push(t.to_string());
        }
        if !parts.is_empty() {
            return Some(parts.join(" "));
        }
    }
    None
}

/// Two-column key/value leftovers: label+tab+value, or label line with the
/// value on the next line.
fn kv_fallback(text: &str, labels: &[&str]) -> Option<String> {
    let joined = labels.iter().map(|l| regex::escape(l)).collect::<Vec<_>>().join("|");
    let tabbed = Regex::new(&format!(r"(?mi)^[ \t]*(?:{joined})\t+(.+)$")).ok()?;
    if let Some(c) = tabbed.captures(text) {
        return Some(c[1].trim().to_string());
    }
    let stacked = Regex::new(&format!(r"(?mi)^[ \t]*(?:{joined})[ \t]*\n[ \t]*(.+)$")).ok()?;
    stacked.captures(text).map(|c| c[1].trim().to_string())
}

fn clean(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| " -:·".contains(c))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sections::{split_sections, SectionKey};

    fn run(text: &str) -> Identification {
        let doc = Document::from_raw(text);
        let seg = split_sections(&doc);
        IdentExtractor::new(&IdentRules::default(), &MetaRules::default())
            .extract(&doc, seg.get(SectionKey::Identification))
    }

    #[test]
    fn colon_labels() {
        let id = run(
            "---- PAGE 1 ----\n1. 화학제품과 회사에 관한 정보\n제품명: 수산화나트륨 수용액\n제조사: 한국화학(주)\n주소: 서울시 구로구 디지털로 1\nTEL: 02-000-0000\n",
        );
        assert_eq!(id.product_name, "수산화나트륨 수용액");
        assert_eq!(id.company, "한국화학(주)");
        assert_eq!(id.address, "서울시 구로구 디지털로 1");
    }

    #[test]
    fn label_on_own_line() {
        let id = run(
            "---- PAGE 1 ----\n1. 화학제품과 회사에 관한 정보\n제품명\n차아염소산나트륨 용액\n",
        );
        assert_eq!(id.product_name, "차아염소산나트륨 용액");
    }

    #[test]
    fn address_spans_lines_until_phone() {
        let id = run(
            "---- PAGE 1 ----\n1. 화학제품과 회사에 관한 정보\n주소: 경기도 안산시\n단원구 별망로 99\n전화: 031-000-0000\n",
        );
        assert_eq!(id.address, "경기도 안산시 단원구 별망로 99");
    }

    #[test]
    fn doc_no_formats() {
        let id = run("---- PAGE 1 ----\n1. 화학제품과 회사에 관한 정보\n제품명: X\nMSDS 관리번호: AA12345-1234567890\n");
        assert_eq!(id.doc_no, "AA12345-1234567890");
    }

    #[test]
    fn falls_back_to_whole_document() {
        // No recognizable section headers at all.
        let doc = Document::from_raw("---- PAGE 1 ----\n표지\n제품명: 무수에탄올\n");
        let seg = split_sections(&doc);
        let id = IdentExtractor::new(&IdentRules::default(), &MetaRules::default())
            .extract(&doc, seg.get(SectionKey::Identification));
        assert_eq!(id.product_name, "무수에탄올");
    }

    #[test]
    fn template_pattern_takes_priority() {
        let rules = IdentRules {
            product_patterns: vec![r"(?m)^상품코드명\s*=\s*(.+)$".into()],
            ..Default::default()
        };
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n1. 화학제품과 회사에 관한 정보\n상품코드명 = ACME-100\n제품명: 다른이름\n",
        );
        let seg = split_sections(&doc);
        let id = IdentExtractor::new(&rules, &MetaRules::default())
            .extract(&doc, seg.get(SectionKey::Identification));
        assert_eq!(id.product_name, "ACME-100");
    }
}
