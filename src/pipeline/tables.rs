//! Boundary to tabular-structure recognition. Real recognizers (layout
//! models, PDF table engines) plug in behind [`TableEngine`]; the built-in
//! engine recovers delimiter-aligned grids straight from the page text so
//! the cascade works on plain dumps.

use anyhow::Result;

use super::normalize::Document;

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn col_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(move |r| r.get(idx).map(|c| c.as_str()))
    }
}

/// One bounded, fallible extraction attempt. The cascade consumes engines
/// in order and moves on when one fails or returns nothing.
pub trait TableEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, doc: &Document, pages: &[u32]) -> Result<Vec<Table>>;
}

/// Recovers pipe- or tab-delimited grids from page text. Normalization has
/// already collapsed space runs, so single `|` and tab characters are the
/// only cell separators left to split on.
pub struct TextGridEngine;

impl TextGridEngine {
    fn split_cells(line: &str) -> Option<Vec<String>> {
        if !line.contains('|') && !line.contains('\t') {
            return None;
        }
        let mut cells: Vec<String> = line
            .split(['|', '\t'])
            .map(|c| c.trim().to_string())
            .collect();
        // `| a | b |` produces empty edge cells; drop them.
        while cells.first().is_some_and(|c| c.is_empty()) {
            cells.remove(0);
        }
        while cells.last().is_some_and(|c| c.is_empty()) {
            cells.pop();
        }
        if cells.len() >= 2 {
            Some(cells)
        } else {
            None
        }
    }

    fn tables_in(text: &str) -> Vec<Table> {
        let mut tables = Vec::new();
        let mut current = Table::default();
        for line in text.lines() {
            match Self::split_cells(line) {
                Some(cells) => current.rows.push(cells),
                None => {
                    if current.rows.len() >= 2 {
                        tables.push(std::mem::take(&mut current));
                    } else {
                        current.rows.clear();
                    }
                }
            }
        }
        if current.rows.len() >= 2 {
            tables.push(current);
        }
        tables
    }
}

impl TableEngine for TextGridEngine {
    fn name(&self) -> &'static str {
        "text-grid"
    }

    fn extract(&self, doc: &Document, pages: &[u32]) -> Result<Vec<Table>> {
        let mut tables = Vec::new();
        if pages.is_empty() {
            tables.extend(Self::tables_in(&doc.text));
        } else {
            for page in pages {
                tables.extend(Self::tables_in(doc.page_text(*page)));
            }
        }
        Ok(tables)
    }
}

pub fn default_engines() -> Vec<Box<dyn TableEngine>> {
    vec![Box::new(TextGridEngine)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_grid_detected() {
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n머리말\n성분명 | CAS번호 | 함유량\n수산화나트륨 | 1310-73-2 | 4~5%\n정제수 | 7732-18-5 | 95~96%\n꼬리말\n",
        );
        let tables = TextGridEngine.extract(&doc, &[1]).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].rows[1][1], "1310-73-2");
    }

    #[test]
    fn single_grid_line_is_not_a_table() {
        let doc = Document::from_raw("---- PAGE 1 ----\na | b\nplain line\n");
        let tables = TextGridEngine.extract(&doc, &[1]).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn edge_pipes_trimmed() {
        let cells = TextGridEngine::split_cells("| 성분 | CAS | 함량 |").unwrap();
        assert_eq!(cells, vec!["성분", "CAS", "함량"]);
    }

    #[test]
    fn page_scoping() {
        let doc = Document::from_raw(
            "---- PAGE 1 ----\na | b\nc | d\n---- PAGE 2 ----\ne | f\ng | h\n",
        );
        let tables = TextGridEngine.extract(&doc, &[2]).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0][0], "e");
    }
}
