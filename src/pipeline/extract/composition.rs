//! Composition extraction: a three-stage cascade (table engines → declared
//! vendor block layouts → generic text parsing) that stops at the first
//! validated, non-empty result.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::normalize::Document;
use crate::pipeline::sections::Section;
use crate::pipeline::tables::{Table, TableEngine};
use crate::template::{compile_rules, CompositionRules};

use super::concentration::{ConcParser, Concentration};

#[derive(Debug, Clone, Serialize)]
pub struct CompositionRow {
    pub name: String,
    pub alias: String,
    pub cas: String,
    pub conc: Option<Concentration>,
}

impl CompositionRow {
    pub fn conc_raw(&self) -> &str {
        self.conc.as_ref().map(|c| c.raw.as_str()).unwrap_or("")
    }

    pub fn representative(&self) -> Option<f64> {
        self.conc.as_ref().map(|c| c.representative())
    }
}

#[derive(Debug, Default)]
pub struct CompositionOutcome {
    pub rows: Vec<CompositionRow>,
    /// Which cascade stage produced the rows, if any.
    pub strategy: Option<&'static str>,
    /// CAS-bearing lines the text stage could not complete into rows.
    pub missed: Vec<String>,
}

static EXPOSURE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)국내기준|ACGIH|TWA|STEL|노출기준").unwrap());
static EXPOSURE_TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)국내기준|ACGIH|TWA|STEL|개인보호구").unwrap());
static PERCENTISH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\s*%|\d+\s*[~\-]\s*\d+").unwrap());
static BULLET_START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[·\-○>]").unwrap());
static ALIAS_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)관용명|이명|별명|synonym").unwrap());

pub struct Compositor {
    rules: CompositionRules,
    cas_re: Regex,
    conc: ConcParser,
    name_aliases: Vec<Regex>,
    cas_aliases: Vec<Regex>,
    conc_aliases: Vec<Regex>,
    stop_rows: Option<Regex>,
    inner_stops: Vec<Regex>,
    line_patterns: Vec<Regex>,
}

impl Compositor {
    pub fn new(rules: &CompositionRules) -> Self {
        let cas_re = Regex::new(&rules.guards.cas_regex).unwrap_or_else(|e| {
            warn!("malformed cas_regex {:?}: {}; using default", rules.guards.cas_regex, e);
            Regex::new(crate::template::CAS_REGEX_DEFAULT).unwrap()
        });
        Self {
            cas_re,
            conc: ConcParser::from_rules(&rules.concentration),
            name_aliases: compile_rules(&rules.table.header_aliases.name),
            cas_aliases: compile_rules(&rules.table.header_aliases.cas),
            conc_aliases: compile_rules(&rules.table.header_aliases.conc),
            stop_rows: rules
                .table
                .stop_rows_regex
                .as_deref()
                .and_then(|p| Regex::new(p).ok()),
            inner_stops: compile_rules(&rules.blockers.inner_stop),
            line_patterns: compile_rules(&rules.block.line_patterns),
            rules: rules.clone(),
        }
    }

    /// Run the cascade over the composition section, or over the whole
    /// document when segmentation missed it.
    pub fn extract(
        &self,
        doc: &Document,
        section: Option<&Section>,
        engines: &[Box<dyn TableEngine>],
    ) -> CompositionOutcome {
        let (body, pages) = match section {
            Some(s) => (s.body.clone(), doc.pages_for_span(s.start, s.end)),
            None => {
                debug!("composition: no section, scanning whole document");
                (doc.text.clone(), doc.pages())
            }
        };

        let body = self.trim_blockers(&body);
        if body.trim().is_empty() {
            return CompositionOutcome::default();
        }

        let mut missed = Vec::new();
        for stage in &self.rules.engines_order {
            let rows = match stage.as_str() {
                "table" => self.try_tables(doc, &pages, engines),
                "block" => self.try_block(&body),
                "text" => self.try_text(&body, &mut missed),
                other => {
                    warn!("composition: unknown cascade stage {:?}", other);
                    Vec::new()
                }
            };
            let rows = self.validate(rows);
            if !rows.is_empty() {
                let strategy: &'static str = match stage.as_str() {
                    "table" => "table",
                    "block" => "block",
                    _ => "text",
                };
                debug!("composition: {} rows via {}", rows.len(), strategy);
                return CompositionOutcome {
                    rows,
                    strategy: Some(strategy),
                    missed,
                };
            }
        }

        CompositionOutcome {
            rows: Vec::new(),
            strategy: None,
            missed,
        }
    }

    /// Template blockers truncate the body before any stage runs; a body
    /// that reads like a bare exposure-limit table is discarded entirely.
    fn trim_blockers(&self, body: &str) -> String {
        let mut body = body.to_string();
        for re in &self.inner_stops {
            if let Some(m) = re.find(&body) {
                debug!("composition: blocker matched at {}, truncating", m.start());
                body.truncate(m.start());
                break;
            }
        }
        if EXPOSURE_TABLE_RE.is_match(&body) && !PERCENTISH_RE.is_match(&body) {
            debug!("composition: body looks like an exposure table, dropping");
            return String::new();
        }
        body
    }

    fn validate(&self, rows: Vec<CompositionRow>) -> Vec<CompositionRow> {
        let forbid = &self.rules.guards.forbid_cas_fragments;
        let mut seen = std::collections::HashSet::new();
        rows.into_iter()
            .filter(|r| self.cas_re.is_match(&r.cas) && !forbid.iter().any(|f| f == &r.cas))
            .filter(|r| seen.insert((r.cas.clone(), r.conc_raw().to_string(), r.name.clone())))
            .collect()
    }

    fn cas_in(&self, text: &str) -> Option<String> {
        self.cas_re
            .captures(text)
            .map(|c| c.get(1).unwrap_or_else(|| c.get(0).unwrap()).as_str().to_string())
    }

    // ── Stage 1: table engines ──

    fn try_tables(
        &self,
        doc: &Document,
        pages: &[u32],
        engines: &[Box<dyn TableEngine>],
    ) -> Vec<CompositionRow> {
        for engine in engines {
            let tables = match engine.extract(doc, pages) {
                Ok(t) => t,
                Err(e) => {
                    warn!("composition: table engine {} failed: {}", engine.name(), e);
                    continue;
                }
            };
            let mut rows = Vec::new();
            for table in &tables {
                rows.extend(self.rows_from_table(table));
            }
            if !rows.is_empty() {
                return rows;
            }
        }
        Vec::new()
    }

    fn rows_from_table(&self, table: &Table) -> Vec<CompositionRow> {
        if table.rows.len() < 2 {
            return Vec::new();
        }
        let header = &table.rows[0];

        let col_name = pick_col_by_alias(header, &self.name_aliases);
        let col_alias = pick_col_by_alias(header, std::slice::from_ref(&*ALIAS_HEADER_RE));
        let col_cas =
            pick_col_by_alias(header, &self.cas_aliases).or_else(|| self.vote_cas_column(table));
        let col_conc =
            pick_col_by_alias(header, &self.conc_aliases).or_else(|| self.vote_conc_column(table));

        let mut out = Vec::new();
        for row in &table.rows[1..] {
            let row_str = row.join(" | ");
            if self.stop_rows.as_ref().is_some_and(|re| re.is_match(&row_str)) {
                break;
            }
            let cas = col_cas
                .and_then(|i| row.get(i))
                .and_then(|cell| self.cas_in(cell))
                .or_else(|| self.cas_in(&row_str));
            let Some(cas) = cas else { continue };

            let name = col_name
                .and_then(|i| row.get(i))
                .map(|c| clean_name(c))
                .unwrap_or_default();
            let alias = col_alias
                .and_then(|i| row.get(i))
                .map(|c| clean_name(c))
                .unwrap_or_default();
            let conc = col_conc
                .and_then(|i| row.get(i))
                .and_then(|cell| self.conc.parse_guarded(cell, &cas));

            out.push(CompositionRow { name, alias, cas, conc });
        }
        out
    }

    /// Content voting: the column whose cells most often carry a CAS.
    fn vote_cas_column(&self, table: &Table) -> Option<usize> {
        let mut best = (0usize, 0usize);
        for col in 0..table.col_count() {
            let hits = table.column(col).filter(|c| self.cas_re.is_match(c)).count();
            if hits > best.1 {
                best = (col, hits);
            }
        }
        (best.1 > 0).then_some(best.0)
    }

    /// Content voting: the column whose cells most often parse as a
    /// concentration.
    fn vote_conc_column(&self, table: &Table) -> Option<usize> {
        let mut best = (0usize, 0usize);
        for col in 0..table.col_count() {
            let hits = table
                .column(col)
                .filter(|c| !self.cas_re.is_match(c) && self.conc.parse(c).is_some())
                .count();
            if hits > best.1 {
                best = (col, hits);
            }
        }
        (best.1 > 0).then_some(best.0)
    }

    // ── Stage 2: declared vendor block layouts ──

    fn try_block(&self, body: &str) -> Vec<CompositionRow> {
        if self.rules.block.transposed {
            let rows = self.parse_transposed(body);
            if !rows.is_empty() {
                return rows;
            }
        }
        let rows = self.parse_line_patterns(body);
        if !rows.is_empty() {
            return rows;
        }
        if let Some(vertical) = &self.rules.block.vertical {
            return self.parse_vertical(body, vertical);
        }
        Vec::new()
    }

    fn parse_line_patterns(&self, body: &str) -> Vec<CompositionRow> {
        let mut out = Vec::new();
        for line in body.lines() {
            let line = line.trim();
            for re in &self.line_patterns {
                let Some(c) = re.captures(line) else { continue };
                let cas = c.name("cas").map(|m| m.as_str().to_string());
                let Some(cas) = cas else { break };
                let name = c.name("name").map(|m| clean_name(m.as_str())).unwrap_or_default();
                let conc = c
                    .name("conc")
                    .and_then(|m| self.conc.parse_guarded(m.as_str(), &cas));
                out.push(CompositionRow { name, alias: String::new(), cas, conc });
                break;
            }
        }
        out
    }

    /// Fields in declared order, each found within `max_gap_lines` of the
    /// previous one; the whole group repeats down the section.
    fn parse_vertical(
        &self,
        body: &str,
        rules: &crate::template::VerticalRules,
    ) -> Vec<CompositionRow> {
        let field_res: Vec<(String, Option<Regex>)> = rules
            .order
            .iter()
            .map(|f| {
                (
                    f.clone(),
                    rules.field_regex.get(f).and_then(|p| Regex::new(p).ok()),
                )
            })
            .collect();

        let lines: Vec<&str> = body.lines().map(str::trim).collect();
        let mut out = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let mut j = i;
            let mut rec: std::collections::BTreeMap<&str, &str> = Default::default();
            let mut ok = true;
            for (field, re) in &field_res {
                let Some(re) = re else {
                    ok = false;
                    break;
                };
                let mut gap = 0;
                let mut found = false;
                while j < lines.len() && gap <= rules.max_gap_lines {
                    if re.is_match(lines[j]) {
                        rec.insert(field.as_str(), lines[j]);
                        found = true;
                        j += 1;
                        break;
                    }
                    j += 1;
                    gap += 1;
                }
                if !found {
                    ok = false;
                    break;
                }
            }
            if ok {
                let cas = rec.get("cas").and_then(|l| self.cas_in(l));
                if let Some(cas) = cas {
                    let conc = rec
                        .get("conc")
                        .and_then(|l| self.conc.parse_guarded(l, &cas));
                    out.push(CompositionRow {
                        name: rec.get("name").map(|l| clean_name(l)).unwrap_or_default(),
                        alias: String::new(),
                        cas,
                        conc,
                    });
                }
                i = j;
            } else {
                i += 1;
            }
        }
        out
    }

    /// Transposed stack: N name lines, then the same N CAS lines, then the
    /// same N concentration lines.
    fn parse_transposed(&self, body: &str) -> Vec<CompositionRow> {
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let names: Vec<&str> = lines
            .iter()
            .take_while(|l| self.looks_like_name(l))
            .copied()
            .collect();
        let n = names.len();
        if n < 2 || lines.len() < n * 3 {
            return Vec::new();
        }
        let cas_lines = &lines[n..n * 2];
        let conc_lines = &lines[n * 2..n * 3];
        if !cas_lines.iter().all(|l| self.cas_re.is_match(l)) {
            return Vec::new();
        }

        names
            .iter()
            .zip(cas_lines)
            .zip(conc_lines)
            .filter_map(|((name, cas_line), conc_line)| {
                let cas = self.cas_in(cas_line)?;
                let conc = self.conc.parse_guarded(conc_line, &cas);
                Some(CompositionRow {
                    name: clean_name(name),
                    alias: String::new(),
                    cas,
                    conc,
                })
            })
            .collect()
    }

    // ── Stage 3: generic text parsing ──

    fn try_text(&self, body: &str, missed: &mut Vec<String>) -> Vec<CompositionRow> {
        let rows = self.parse_stacked_headers(body);
        if !rows.is_empty() {
            return rows;
        }
        let rows = self.parse_horizontal(body, missed);
        if !rows.is_empty() {
            return rows;
        }
        let rows = self.parse_anchored_vertical(body);
        if !rows.is_empty() {
            return rows;
        }
        self.parse_loose_groups(body)
    }

    fn header_field_of(&self, line: &str) -> Option<&'static str> {
        let line = line.trim();
        if line.is_empty() || line.len() > 60 || line.chars().any(|c| c.is_ascii_digit()) {
            return None;
        }
        if self.cas_aliases.iter().any(|re| re.is_match(line)) {
            return Some("cas");
        }
        if self.conc_aliases.iter().any(|re| re.is_match(line)) {
            return Some("conc");
        }
        if ALIAS_HEADER_RE.is_match(line) {
            return Some("alias");
        }
        if self.name_aliases.iter().any(|re| re.is_match(line)) {
            return Some("name");
        }
        None
    }

    /// 3–5 consecutive column-label lines followed by value blocks of the
    /// same stride.
    fn parse_stacked_headers(&self, body: &str) -> Vec<CompositionRow> {
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut start = None;
        let mut fields: Vec<&'static str> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            match self.header_field_of(line) {
                Some(f) if fields.is_empty() || start.map(|s: usize| s + fields.len()) == Some(i) => {
                    if fields.is_empty() {
                        start = Some(i);
                    }
                    fields.push(f);
                }
                _ => {
                    if (3..=5).contains(&fields.len()) {
                        break;
                    }
                    fields.clear();
                    start = None;
                }
            }
        }
        if !(3..=5).contains(&fields.len()) {
            return Vec::new();
        }
        let stride = fields.len();
        let first_value = start.unwrap_or(0) + stride;

        let mut out = Vec::new();
        let mut i = first_value;
        while i + stride <= lines.len() {
            let chunk = &lines[i..i + stride];
            let mut name = String::new();
            let mut alias = String::new();
            let mut cas = None;
            let mut conc_line = "";
            for (field, value) in fields.iter().zip(chunk) {
                match *field {
                    "name" => name = clean_name(value),
                    "alias" => alias = clean_name(value),
                    "cas" => cas = self.cas_in(value),
                    "conc" => conc_line = value,
                    _ => {}
                }
            }
            let Some(cas) = cas else { break };
            let conc = self.conc.parse_guarded(conc_line, &cas);
            out.push(CompositionRow { name, alias, cas, conc });
            i += stride;
        }
        out
    }

    /// Name + CAS + concentration on one line, with the concentration
    /// allowed to spill to the neighbouring line.
    fn parse_horizontal(&self, body: &str, missed: &mut Vec<String>) -> Vec<CompositionRow> {
        let lines: Vec<&str> = body.lines().collect();
        let mut out = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !self.cas_re.is_match(line) {
                continue;
            }
            // Exposure-limit rows carry CAS numbers too; never rows.
            if EXPOSURE_LINE_RE.is_match(line) {
                continue;
            }
            let prev = if i > 0 { lines[i - 1] } else { "" };
            let next = lines.get(i + 1).copied().unwrap_or("");

            for c in self.cas_re.captures_iter(line) {
                let m = c.get(1).unwrap_or_else(|| c.get(0).unwrap());
                let cas = m.as_str().to_string();
                let name = clean_name(&line[..m.start()]);
                let conc_same = self.conc.parse_guarded(&line[m.end()..], &cas);
                let conc = conc_same
                    .clone()
                    .or_else(|| self.conc.parse_guarded(next, &cas))
                    .or_else(|| self.conc.parse_guarded(prev, &cas));
                match conc {
                    // A bare CAS with only a neighbouring concentration and
                    // no name on its line is a vertical layout; leave it for
                    // the vertical parsers.
                    Some(_) if conc_same.is_none() && name.is_empty() => {}
                    Some(c) => {
                        out.push(CompositionRow {
                            name,
                            alias: String::new(),
                            cas,
                            conc: Some(c),
                        })
                    }
                    None => missed.push(line.trim().to_string()),
                }
            }
        }
        out
    }

    fn looks_like_name(&self, line: &str) -> bool {
        !line.is_empty()
            && !self.cas_re.is_match(line)
            && !self.conc.mentions(line)
            && line.chars().any(|c| c.is_alphabetic())
    }

    /// Repeating 4-line (name, alias, CAS, conc) or 3-line (name, CAS,
    /// conc) vertical blocks.
    fn parse_anchored_vertical(&self, body: &str) -> Vec<CompositionRow> {
        let lines: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut out = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            if i + 3 < lines.len()
                && self.looks_like_name(lines[i])
                && self.looks_like_name(lines[i + 1])
                && self.cas_re.is_match(lines[i + 2])
                && self.conc.mentions(lines[i + 3])
            {
                if let Some(cas) = self.cas_in(lines[i + 2]) {
                    let conc = self.conc.parse_guarded(lines[i + 3], &cas);
                    if conc.is_some() {
                        out.push(CompositionRow {
                            name: clean_name(lines[i]),
                            alias: clean_name(lines[i + 1]),
                            cas,
                            conc,
                        });
                        i += 4;
                        continue;
                    }
                }
            }
            if i + 2 < lines.len()
                && self.looks_like_name(lines[i])
                && self.cas_re.is_match(lines[i + 1])
                && self.conc.mentions(lines[i + 2])
            {
                if let Some(cas) = self.cas_in(lines[i + 1]) {
                    let conc = self.conc.parse_guarded(lines[i + 2], &cas);
                    if conc.is_some() {
                        out.push(CompositionRow {
                            name: clean_name(lines[i]),
                            alias: String::new(),
                            cas,
                            conc,
                        });
                        i += 3;
                        continue;
                    }
                }
            }
            i += 1;
        }
        out
    }

    /// Last resort: bullet/paragraph chunks that each mention one CAS and
    /// one concentration somewhere.
    fn parse_loose_groups(&self, body: &str) -> Vec<CompositionRow> {
        let mut chunks: Vec<Vec<&str>> = Vec::new();
        let mut current = Vec::new();
        for line in body.lines() {
            let trimmed = line.trim();
            let boundary = trimmed.is_empty() || BULLET_START_RE.is_match(line);
            if boundary && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            if !trimmed.is_empty() {
                current.push(trimmed);
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .filter_map(|chunk| {
                let joined = chunk.join("\n");
                let cas = self.cas_in(&joined)?;
                let conc = self.conc.parse_guarded(&joined, &cas)?;
                let name = chunk
                    .iter()
                    .find(|l| self.looks_like_name(l))
                    .map(|l| clean_name(l))
                    .unwrap_or_default();
                Some(CompositionRow { name, alias: String::new(), cas, conc: Some(conc) })
            })
            .collect()
    }
}

fn pick_col_by_alias(header: &[String], aliases: &[Regex]) -> Option<usize> {
    header
        .iter()
        .position(|cell| aliases.iter().any(|re| re.is_match(cell)))
}

fn clean_name(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || "-:|·".contains(c));
    let mut out = String::with_capacity(trimmed.len());
    let mut last_space = false;
    for ch in trimmed.chars() {
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
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::concentration::ConcValue;
    use crate::pipeline::sections::{split_sections, SectionKey};
    use crate::pipeline::tables::default_engines;

    fn run(text: &str) -> CompositionOutcome {
        let doc = Document::from_raw(text);
        let seg = split_sections(&doc);
        let compositor = Compositor::new(&CompositionRules::default());
        compositor.extract(&doc, seg.get(SectionKey::Composition), &default_engines())
    }

    #[test]
    fn delimited_line_yields_single_row() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nSodium hydroxide, 1310-73-2, 4~5%\n9. 물리화학적 특성\n외관: 액체\n",
        );
        assert_eq!(out.rows.len(), 1);
        let row = &out.rows[0];
        assert_eq!(row.name, "Sodium hydroxide");
        assert_eq!(row.cas, "1310-73-2");
        let conc = row.conc.as_ref().unwrap();
        assert_eq!(conc.value, ConcValue::Range { low: 4.0, high: 5.0 });
        assert_eq!(row.representative(), Some(4.5));
    }

    #[test]
    fn pipe_table_extracted_by_table_stage() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\n성분명 | CAS No. | 함유량(%)\n수산화나트륨 | 1310-73-2 | 4~5\n정제수 | 7732-18-5 | 95~96\n4. 응급조치 요령\n",
        );
        assert_eq!(out.strategy, Some("table"));
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].name, "수산화나트륨");
        assert_eq!(out.rows[1].cas, "7732-18-5");
        assert_eq!(out.rows[1].representative(), Some(95.5));
    }

    #[test]
    fn stacked_headers_with_stride() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\n물질명\nCAS 번호\n함유량\n수산화나트륨\n1310-73-2\n4~5%\nEthanol\n64-17-5\n10%\n4. 응급조치 요령\n",
        );
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].cas, "1310-73-2");
        assert_eq!(out.rows[1].name, "Ethanol");
        assert_eq!(out.rows[1].representative(), Some(10.0));
    }

    #[test]
    fn anchored_vertical_blocks() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nSodium hypochlorite\n차아염소산나트륨\n7681-52-9\n4~6%\n4. 응급조치 요령\n",
        );
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].alias, "차아염소산나트륨");
        assert_eq!(out.rows[0].cas, "7681-52-9");
    }

    #[test]
    fn duplicate_rows_kept_first() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nEthanol, 64-17-5, 10%\nEthanol, 64-17-5, 10%\n4. 응급조치 요령\n",
        );
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn exposure_limit_lines_are_not_rows() {
        let out = run(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nEthanol, 64-17-5, 10%\n노출기준 ACGIH TWA 1000ppm 64-17-5\n4. 응급조치 요령\n",
        );
        assert_eq!(out.rows.len(), 1);
    }

    #[test]
    fn exposure_only_body_is_dropped() {
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\n국내기준 TWA STEL\nACGIH 기준 참조\n4. 응급조치 요령\n",
        );
        let seg = split_sections(&doc);
        let compositor = Compositor::new(&CompositionRules::default());
        let out = compositor.extract(&doc, seg.get(SectionKey::Composition), &default_engines());
        assert!(out.rows.is_empty());
        assert!(out.strategy.is_none());
    }

    #[test]
    fn blocker_truncates_before_parsing() {
        let mut rules = CompositionRules::default();
        rules.blockers.inner_stop = vec!["노출한계\\s*정보".into()];
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nEthanol, 64-17-5, 10%\n노출한계 정보\nMethanol, 67-56-1, 5%\n4. 응급조치 요령\n",
        );
        let seg = split_sections(&doc);
        let compositor = Compositor::new(&rules);
        let out = compositor.extract(&doc, seg.get(SectionKey::Composition), &default_engines());
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].cas, "64-17-5");
    }

    #[test]
    fn transposed_stack_layout() {
        let mut rules = CompositionRules::default();
        rules.block.transposed = true;
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nSodium hydroxide\nPotassium hydroxide\n1310-73-2\n1310-58-3\n4~5%\n1~2%\n4. 응급조치 요령\n",
        );
        let seg = split_sections(&doc);
        let compositor = Compositor::new(&rules);
        let out = compositor.extract(&doc, seg.get(SectionKey::Composition), &default_engines());
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].name, "Sodium hydroxide");
        assert_eq!(out.rows[0].cas, "1310-73-2");
        assert_eq!(out.rows[1].cas, "1310-58-3");
    }

    #[test]
    fn declared_vertical_layout() {
        let mut rules = CompositionRules::default();
        rules.block.vertical = Some(crate::template::VerticalRules::default());
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\n수산화나트륨\n1310-73-2\n4~5%\nEthanol\n64-17-5\n10%\n4. 응급조치 요령\n",
        );
        let seg = split_sections(&doc);
        let compositor = Compositor::new(&rules);
        let out = compositor.extract(&doc, seg.get(SectionKey::Composition), &default_engines());
        assert_eq!(out.strategy, Some("block"));
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].name, "수산화나트륨");
        assert_eq!(out.rows[1].cas, "64-17-5");
    }

    #[test]
    fn no_section_no_rows_is_explicit_empty() {
        let doc = Document::from_raw("---- PAGE 1 ----\n무관한 텍스트\n");
        let compositor = Compositor::new(&CompositionRules::default());
        let out = compositor.extract(&doc, None, &default_engines());
        assert!(out.rows.is_empty());
        assert!(out.strategy.is_none());
    }
}
