//! Physical-chemical property extraction: best label/value column pair from
//! recognized tables, else a mixed-orientation line parser over the section
//! body.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::labels::PHYSCHEM_ALIASES;
use crate::pipeline::normalize::Document;
use crate::pipeline::sections::{later_header_cut, Section, SectionKey};
use crate::pipeline::tables::{Table, TableEngine};
use crate::template::PhyschemRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropertySource {
    Table,
    Text,
}

impl PropertySource {
    pub fn as_str(self) -> &'static str {
        match self {
            PropertySource::Table => "table",
            PropertySource::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhysChemRow {
    /// Canonical key, or `other` when only the raw label is known.
    pub key: String,
    pub label: String,
    pub value: String,
    pub source: PropertySource,
}

static VALUE_NUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[+-]?\d+(?:[.,]\d+)?\s*(?:°C|℃|K|Pa|kPa|mmHg|cSt|%|g/cm|kg/m|mg/L|g/mol|atm|bar)?")
        .unwrap()
});
static VALUE_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"해당없음|자료없음|무취|비가연성|없음|not\s*applicable|no\s*data").unwrap());

/// Minimum table-path rows before the table result is trusted over the
/// line parser.
const TABLE_MIN_ROWS: usize = 5;
const VALUE_MAX_CHARS: usize = 300;

pub struct PhyschemExtractor {
    /// (canonical key, alias) pairs in matching priority order; template
    /// extras follow the built-in reference list.
    aliases: Vec<(String, String)>,
}

impl PhyschemExtractor {
    pub fn new(rules: &PhyschemRules) -> Self {
        let mut aliases: Vec<(String, String)> = PHYSCHEM_ALIASES
            .iter()
            .flat_map(|p| p.aliases.iter().map(|a| (p.key.clone(), a.clone())))
            .collect();
        for (key, extra) in &rules.extra_aliases {
            for alias in extra {
                aliases.push((key.clone(), alias.clone()));
            }
        }
        Self { aliases }
    }

    pub fn extract(
        &self,
        doc: &Document,
        section: Option<&Section>,
        engines: &[Box<dyn TableEngine>],
    ) -> Vec<PhysChemRow> {
        let Some(section) = section else {
            debug!("physchem: section missing, nothing to scan");
            return Vec::new();
        };

        // Mis-segmentation symptom: a later section's header swallowed into
        // this body. Cut before parsing.
        let mut body = section.body.as_str();
        if let Some(cut) = later_header_cut(SectionKey::PhysicalChemical, body) {
            debug!("physchem: truncating body at {} (later header inside)", cut);
            body = &body[..cut];
        }

        let pages = doc.pages_for_span(section.start, section.end);
        let table_rows = self.try_tables(doc, &pages, engines);
        if table_rows.len() >= TABLE_MIN_ROWS {
            return dedup(table_rows);
        }

        let text_rows = self.parse_lines_mixed(body);
        if !text_rows.is_empty() {
            return dedup(text_rows);
        }
        dedup(table_rows)
    }

    fn label_key(&self, label: &str) -> Option<String> {
        let lab = label.trim().to_lowercase();
        self.aliases
            .iter()
            .find(|(_, alias)| lab.contains(&alias.to_lowercase()))
            .map(|(key, _)| key.clone())
    }

    fn is_label_line(&self, line: &str) -> bool {
        let t = line.trim();
        if t.is_empty() {
            return false;
        }
        self.label_key(t).is_some() || t.ends_with(':')
    }

    // ── Table path ──

    fn try_tables(
        &self,
        doc: &Document,
        pages: &[u32],
        engines: &[Box<dyn TableEngine>],
    ) -> Vec<PhysChemRow> {
        for engine in engines {
            let tables = match engine.extract(doc, pages) {
                Ok(t) => t,
                Err(e) => {
                    warn!("physchem: table engine {} failed: {}", engine.name(), e);
                    continue;
                }
            };
            let mut best: Option<(usize, &Table, usize, usize)> = None;
            for table in &tables {
                if let Some((score, li, vi)) = self.best_column_pair(table) {
                    if best.as_ref().is_none_or(|(s, ..)| score > *s) {
                        best = Some((score, table, li, vi));
                    }
                }
            }
            if let Some((_, table, li, vi)) = best {
                let rows = self.rows_from_pair(table, li, vi);
                if !rows.is_empty() {
                    return rows;
                }
            }
        }
        Vec::new()
    }

    /// Score every ordered column pair by label hits in one column and
    /// numeric/unit-bearing values in the other.
    fn best_column_pair(&self, table: &Table) -> Option<(usize, usize, usize)> {
        let cols = table.col_count();
        let mut best: Option<(usize, usize, usize)> = None;
        for li in 0..cols {
            for vi in 0..cols {
                if li == vi {
                    continue;
                }
                let label_hits = table
                    .column(li)
                    .filter(|c| self.label_key(c).is_some())
                    .count();
                let value_hits = table.column(vi).filter(|c| value_like(c)).count();
                if label_hits == 0 {
                    continue;
                }
                let score = label_hits + value_hits;
                if best.is_none_or(|(s, ..)| score > s) {
                    best = Some((score, li, vi));
                }
            }
        }
        best
    }

    fn rows_from_pair(&self, table: &Table, li: usize, vi: usize) -> Vec<PhysChemRow> {
        table
            .rows
            .iter()
            .filter_map(|row| {
                let label = row.get(li)?.trim();
                let value = clean_value(row.get(vi)?);
                if label.is_empty() || value.is_empty() {
                    return None;
                }
                let key = self.label_key(label)?;
                Some(PhysChemRow {
                    key,
                    label: label.to_string(),
                    value,
                    source: PropertySource::Table,
                })
            })
            .collect()
    }

    // ── Text path: mixed horizontal/vertical layouts ──

    fn parse_lines_mixed(&self, body: &str) -> Vec<PhysChemRow> {
        let lines: Vec<&str> = body.lines().map(str::trim).collect();
        let mut out = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if line.is_empty() {
                i += 1;
                continue;
            }

            // Horizontal first: `label: value` or label-prefix layouts.
            if let Some((label, value)) = self.split_inline(line) {
                let key = self.label_key(&label).unwrap_or_else(|| "other".into());
                out.push(PhysChemRow {
                    key,
                    label,
                    value: clean_value(&value),
                    source: PropertySource::Text,
                });
                i += 1;
                continue;
            }

            // Vertical: a label line whose value follows on the next 1-2
            // lines.
            if self.is_label_line(line) {
                let mut collected: Vec<&str> = Vec::new();
                let mut j = i + 1;
                while j < lines.len() {
                    let cand = lines[j];
                    if cand.is_empty() {
                        j += 1;
                        continue;
                    }
                    if self.is_label_line(cand) {
                        break;
                    }
                    collected.push(cand);
                    j += 1;
                    if collected.len() >= 2 && !cand.ends_with(')') {
                        break;
                    }
                }
                if !collected.is_empty() {
                    let key = self.label_key(line).unwrap_or_else(|| "other".into());
                    out.push(PhysChemRow {
                        key,
                        label: line.trim_end_matches(':').trim().to_string(),
                        value: clean_value(&collected.join(" ")),
                        source: PropertySource::Text,
                    });
                }
                i = j.max(i + 1);
                continue;
            }

            i += 1;
        }
        out
    }

    /// `라벨: 값`, or a known label leading the line with the value behind
    /// it.
    fn split_inline(&self, line: &str) -> Option<(String, String)> {
        if let Some((lab, val)) = line.split_once(':') {
            let lab = lab.trim();
            let val = val.trim();
            if !lab.is_empty() && !val.is_empty() && lab.chars().count() <= 40 {
                return Some((lab.to_string(), val.to_string()));
            }
            return None;
        }
        let low = line.to_lowercase();
        for (_, alias) in &self.aliases {
            let a = alias.to_lowercase();
            if low.starts_with(&a) {
                let label = line[..a.len()].trim().to_string();
                let value = line[a.len()..].trim_matches(|c: char| c.is_whitespace() || c == '-');
                if !value.is_empty() {
                    return Some((label, value.to_string()));
                }
            }
        }
        None
    }
}

fn value_like(cell: &str) -> bool {
    let c = cell.trim();
    !c.is_empty() && (c.chars().any(|ch| ch.is_ascii_digit()) && VALUE_NUM_RE.is_match(c)
        || VALUE_WORD_RE.is_match(c))
}

fn clean_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    let mut last_space = false;
    for ch in v.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    if out.chars().count() > VALUE_MAX_CHARS {
        let truncated: String = out.chars().take(VALUE_MAX_CHARS).collect();
        return format!("{truncated}…");
    }
    out
}

fn dedup(rows: Vec<PhysChemRow>) -> Vec<PhysChemRow> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|r| seen.insert((r.key.clone(), r.label.clone(), r.value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sections::split_sections;
    use crate::pipeline::tables::default_engines;

    fn run(text: &str) -> Vec<PhysChemRow> {
        let doc = Document::from_raw(text);
        let seg = split_sections(&doc);
        PhyschemExtractor::new(&PhyschemRules::default()).extract(
            &doc,
            seg.get(SectionKey::PhysicalChemical),
            &default_engines(),
        )
    }

    #[test]
    fn inline_colon_layout() {
        let rows = run("---- PAGE 1 ----\n9. 물리화학적 특성\n외관: 무색 액체\npH: 12.5\n비중: 1.05\n10. 안정성 및 반응성\n");
        let ph = rows.iter().find(|r| r.key == "ph").unwrap();
        assert_eq!(ph.value, "12.5");
        assert_eq!(ph.source, PropertySource::Text);
        assert!(rows.iter().any(|r| r.key == "appearance"));
        assert!(rows.iter().any(|r| r.key == "relative_density"));
    }

    #[test]
    fn vertical_label_value_layout() {
        let rows = run("---- PAGE 1 ----\n9. 물리화학적 특성\n외관\n조해성 액체\n성상\n액체\n끓는점\n100 ℃\n10. 안정성 및 반응성\n");
        let appearance = rows.iter().find(|r| r.key == "appearance").unwrap();
        assert_eq!(appearance.value, "조해성 액체");
        assert!(rows.iter().any(|r| r.key == "boiling_point" && r.value.contains("100")));
    }

    #[test]
    fn table_pair_preferred_when_rich() {
        let rows = run(
            "---- PAGE 1 ----\n9. 물리화학적 특성\n항목 | 값\n외관 | 무색 액체\npH | 12.5\n끓는점 | 100 ℃\n인화점 | 해당없음\n증기압 | 17 mmHg\n비중 | 1.05\n10. 안정성 및 반응성\n",
        );
        assert!(rows.len() >= 5);
        assert!(rows.iter().all(|r| r.source == PropertySource::Table));
        assert!(rows.iter().any(|r| r.key == "vapor_pressure"));
    }

    #[test]
    fn body_truncated_at_later_header() {
        let rows = run(
            "---- PAGE 1 ----\n9. 물리화학적 특성\npH: 12.5\n11. 독성에 관한 정보\n경구독성: LD50 500\n",
        );
        // The toxicology line must not leak in as a property.
        assert!(rows.iter().any(|r| r.key == "ph"));
        assert!(!rows.iter().any(|r| r.value.contains("LD50")));
    }

    #[test]
    fn missing_section_yields_empty() {
        let doc = Document::from_raw("---- PAGE 1 ----\n아무 내용\n");
        let seg = split_sections(&doc);
        let rows = PhyschemExtractor::new(&PhyschemRules::default()).extract(
            &doc,
            seg.get(SectionKey::PhysicalChemical),
            &default_engines(),
        );
        assert!(rows.is_empty());
    }
}
