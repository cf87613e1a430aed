use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static PAGE_MARK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)----\s*PAGE\s+(\d+)\s*----").unwrap());
static LINE_EDGE_WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]*\n[ \t]*").unwrap());
static WS_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());

/// NFKC plus the character folds OCR output needs before any pattern runs.
/// Idempotent: normalizing already-normalized text is a no-op.
pub fn normalize_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let s: String = raw.nfkc().collect();
    let s: String = s
        .chars()
        .map(|c| match c {
            '\u{00A0}' => ' ',
            '：' => ':',
            '‐' | '–' | '—' => '-',
            '・' | '∙' | '•' | 'ㆍ' => '·',
            _ => c,
        })
        .collect();
    // Frequent OCR mis-read in Korean regulatory sections.
    let s = s.replace("규졔", "규제");
    let s = LINE_EDGE_WS_RE.replace_all(&s, "\n");
    WS_RUN_RE.replace_all(&s, " ").into_owned()
}

#[derive(Debug, Clone, Copy)]
struct PageMark {
    start: usize,
    body_start: usize,
    page: u32,
}

/// Normalized document text plus the page-boundary index derived from the
/// inline `---- PAGE n ----` markers.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    marks: Vec<PageMark>,
}

impl Document {
    pub fn from_raw(raw: &str) -> Self {
        let text = normalize_text(raw);
        let marks = PAGE_MARK_RE
            .captures_iter(&text)
            .filter_map(|c| {
                let m = c.get(0)?;
                let page = c[1].parse().ok()?;
                Some(PageMark {
                    start: m.start(),
                    body_start: m.end(),
                    page,
                })
            })
            .collect();
        Self { text, marks }
    }

    pub fn has_page_markers(&self) -> bool {
        !self.marks.is_empty()
    }

    /// Length with all whitespace removed; the fatal-gate measure.
    pub fn squeezed_len(&self) -> usize {
        self.text.chars().filter(|c| !c.is_whitespace()).count()
    }

    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.marks.iter().map(|m| m.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    /// Physical pages overlapping the byte span `[start, end)`.
    pub fn pages_for_span(&self, start: usize, end: usize) -> Vec<u32> {
        let mut pages = Vec::new();
        for (i, mark) in self.marks.iter().enumerate() {
            let seg_start = mark.start;
            let seg_end = self
                .marks
                .get(i + 1)
                .map(|m| m.start)
                .unwrap_or(self.text.len());
            if seg_start.max(start) < seg_end.min(end) {
                pages.push(mark.page);
            }
        }
        pages.sort_unstable();
        pages.dedup();
        pages
    }

    /// Text belonging to one physical page (marker line excluded).
    pub fn page_text(&self, page: u32) -> &str {
        for (i, mark) in self.marks.iter().enumerate() {
            if mark.page == page {
                let end = self
                    .marks
                    .get(i + 1)
                    .map(|m| m.start)
                    .unwrap_or(self.text.len());
                return &self.text[mark.body_start..end];
            }
        }
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let raw = "제품명：  수산화나트륨\u{00A0}용액\n비중 – 2.13\n•  유독물질";
        let once = normalize_text(raw);
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn normalize_folds_variants() {
        let s = normalize_text("항목： 값 – 범위 • 불릿");
        assert!(s.contains("항목: 값 - 범위 · 불릿"));
    }

    #[test]
    fn normalize_repairs_ocr_typo() {
        assert!(normalize_text("법적 규졔 현황").contains("규제"));
    }

    #[test]
    fn page_index_from_markers() {
        let doc = Document::from_raw("---- PAGE 1 ----\nfirst\n---- PAGE 2 ----\nsecond\n");
        assert!(doc.has_page_markers());
        assert_eq!(doc.pages(), vec![1, 2]);
        assert!(doc.page_text(1).contains("first"));
        assert!(doc.page_text(2).contains("second"));
    }

    #[test]
    fn pages_for_span_overlap() {
        let doc = Document::from_raw("---- PAGE 1 ----\naaaa\n---- PAGE 2 ----\nbbbb\n");
        let p2_off = doc.text.find("bbbb").unwrap();
        assert_eq!(doc.pages_for_span(0, 5), vec![1]);
        assert_eq!(doc.pages_for_span(p2_off, p2_off + 4), vec![2]);
        assert_eq!(doc.pages_for_span(0, doc.text.len()), vec![1, 2]);
    }

    #[test]
    fn no_markers() {
        let doc = Document::from_raw("plain text without markers");
        assert!(!doc.has_page_markers());
        assert!(doc.pages_for_span(0, 5).is_empty());
    }
}
