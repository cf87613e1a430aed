pub mod extract;
pub mod normalize;
pub mod router;
pub mod sections;
pub mod tables;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::DocumentError;
use crate::template::{Template, TemplateStore, FALLBACK_TEMPLATE};

use extract::regulatory::MatchSource;
use extract::{extract_all, ExtractedData};
use normalize::Document;
use router::{route, RouteOutcome, ScoringConfig};
use sections::{split_sections, Segmentation};
use tables::{default_engines, TableEngine};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scoring: ScoringConfig,
    /// Minimum non-whitespace chars before a document is worth parsing.
    pub min_text_chars: usize,
    /// Synthesize and persist a template when routing misses.
    pub auto_create: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            min_text_chars: 200,
            auto_create: true,
        }
    }
}

/// Per-document result: extraction output plus enough routing and
/// confidence detail to tell partial extraction from full success.
pub struct DocumentReport {
    pub file: String,
    pub pages: usize,
    pub chars: usize,
    /// Fatal-gate failure; when set, downstream stages were skipped.
    pub error: Option<String>,
    pub route: Option<RouteOutcome>,
    pub segmentation: Segmentation,
    /// 20 points per filled wanted section, capped at 100.
    pub extract_score: u32,
    pub data: Option<ExtractedData>,
    pub processed_at: DateTime<Utc>,
}

impl DocumentReport {
    fn fatal(file: &str, doc: &Document, err: DocumentError) -> Self {
        Self {
            file: file.to_string(),
            pages: doc.pages().len(),
            chars: doc.squeezed_len(),
            error: Some(err.to_string()),
            route: None,
            segmentation: Segmentation::default(),
            extract_score: 0,
            data: None,
            processed_at: Utc::now(),
        }
    }

    pub fn composition_rows(&self) -> usize {
        self.data.as_ref().map(|d| d.composition.rows.len()).unwrap_or(0)
    }

    /// Composition extraction produced at least one validated CAS row.
    pub fn composition_ok(&self) -> bool {
        self.composition_rows() > 0
    }

    /// At least one regulatory candidate mapped to the taxonomy.
    pub fn regulatory_mapped(&self) -> usize {
        self.data
            .as_ref()
            .map(|d| {
                d.regulatory
                    .iter()
                    .filter(|i| !matches!(i.source, MatchSource::None))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Worth a human look: fatal, unrouted, or visibly incomplete.
    pub fn flagged(&self) -> bool {
        self.error.is_some()
            || self.extract_score < 100
            || self.route.as_ref().is_none_or(|r| r.selected == FALLBACK_TEMPLATE)
    }
}

pub struct Pipeline {
    store: Arc<TemplateStore>,
    engines: Vec<Box<dyn TableEngine>>,
    cfg: PipelineConfig,
}

impl Pipeline {
    pub fn new(store: Arc<TemplateStore>, cfg: PipelineConfig) -> Self {
        Self::with_engines(store, cfg, default_engines())
    }

    pub fn with_engines(
        store: Arc<TemplateStore>,
        cfg: PipelineConfig,
        engines: Vec<Box<dyn TableEngine>>,
    ) -> Self {
        Self { store, engines, cfg }
    }

    /// Full pass over one document. Never panics and never aborts a batch:
    /// fatal conditions land in the report's `error`.
    pub fn process(&self, file: &str, raw: &str) -> DocumentReport {
        let doc = Document::from_raw(raw);

        let chars = doc.squeezed_len();
        if chars < self.cfg.min_text_chars {
            warn!("{}: too little text ({} chars), skipping", file, chars);
            return DocumentReport::fatal(
                file,
                &doc,
                DocumentError::TooLittleText { chars, min: self.cfg.min_text_chars },
            );
        }
        if !doc.has_page_markers() {
            warn!("{}: no page markers, skipping", file);
            return DocumentReport::fatal(file, &doc, DocumentError::NoPageMarkers);
        }

        let seg = split_sections(&doc);
        let mut outcome = route(&doc.text, &self.store.snapshot(), &self.cfg.scoring);

        if self.should_auto_create(&outcome, &seg) {
            match self.store.add(Template::synthesize_from(&seg)) {
                Ok(name) => {
                    info!("{}: no close template, created {}", file, name);
                    outcome = route(&doc.text, &self.store.snapshot(), &self.cfg.scoring);
                    outcome.created = true;
                    outcome.reason = format!("created {name}: {}", outcome.reason);
                }
                Err(e) => warn!("{}: template auto-creation failed: {}", file, e),
            }
        }

        let template = self
            .store
            .get(&outcome.selected)
            .unwrap_or_else(Template::generic);
        let data = extract_all(&doc, &seg, &template, &self.engines);
        let extract_score = (20 * seg.wanted_filled() as u32).min(100);

        DocumentReport {
            file: file.to_string(),
            pages: doc.pages().len(),
            chars,
            error: None,
            route: Some(outcome),
            segmentation: seg,
            extract_score,
            data: Some(data),
            processed_at: Utc::now(),
        }
    }

    /// Report stub for a file the reader could not even load.
    pub fn process_unreadable(&self, file: &str, err: &str) -> DocumentReport {
        warn!("{}: unreadable input: {}", file, err);
        DocumentReport::fatal(
            file,
            &Document::from_raw(""),
            DocumentError::Unreadable(err.to_string()),
        )
    }

    /// Auto-generation gate: routing fell through (or scored below the
    /// threshold) while segmentation still found enough signal to seed a
    /// template from.
    fn should_auto_create(&self, outcome: &RouteOutcome, seg: &Segmentation) -> bool {
        self.cfg.auto_create
            && !seg.is_empty()
            && !outcome.locked
            && (outcome.selected == FALLBACK_TEMPLATE
                || outcome.score < self.cfg.scoring.min_confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(dir: &std::path::Path, auto_create: bool) -> Pipeline {
        let store = Arc::new(TemplateStore::open(dir).unwrap());
        let cfg = PipelineConfig { auto_create, ..Default::default() };
        Pipeline::new(store, cfg)
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{name}")).unwrap()
    }

    #[test]
    fn korean_fixture_full_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), false);
        let report = p.process("hansol_ko.txt", &fixture("hansol_ko.txt"));

        assert!(report.error.is_none());
        assert_eq!(report.extract_score, 100);

        let data = report.data.as_ref().unwrap();
        assert_eq!(data.ident.product_name, "수산화나트륨 수용액 50%");
        assert!(data.composition.rows.iter().any(|r| r.cas == "1310-73-2"));
        assert!(data.physchem.iter().any(|r| r.key == "ph"));
        assert!(data
            .regulatory
            .iter()
            .any(|i| i.category.as_deref() == Some("작업환경측정물질")));
        assert!(data.hazards.h_codes.contains(&"H314".to_string()));
        assert_eq!(data.hazards.signal_word, "위험");
    }

    #[test]
    fn english_fixture_full_pass() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), false);
        let report = p.process("acme_en.txt", &fixture("acme_en.txt"));

        assert!(report.error.is_none());
        let data = report.data.as_ref().unwrap();
        assert_eq!(data.ident.product_name, "Acme Degreaser 7");
        assert!(data.composition.rows.iter().any(|r| r.cas == "64-17-5"));
    }

    #[test]
    fn auto_created_template_doc_locks_on_rerun() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), true);
        let text = fixture("hansol_ko.txt");

        let first = p.process("hansol_ko.txt", &text);
        let first_route = first.route.as_ref().unwrap();
        assert!(first_route.created);
        assert_eq!(first_route.selected, "pattern_0001");
        assert!(first_route.locked, "fresh template must match its own seeds");

        let second = p.process("hansol_ko.txt", &text);
        let second_route = second.route.as_ref().unwrap();
        assert!(!second_route.created);
        assert_eq!(second_route.selected, "pattern_0001");
        assert_eq!(second_route.score, 100.0);
        assert!(second_route.locked);
    }

    #[test]
    fn too_little_text_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), false);
        let report = p.process("stub.txt", "---- PAGE 1 ----\n짧음\n");
        assert!(report.error.is_some());
        assert!(report.data.is_none());
        assert_eq!(report.extract_score, 0);
    }

    #[test]
    fn missing_page_markers_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), false);
        let long_text = "긴 텍스트 ".repeat(100);
        let report = p.process("stub.txt", &long_text);
        assert!(report.error.as_deref().unwrap_or("").contains("PAGE"));
    }

    #[test]
    fn headerless_document_is_nonfatal_with_zero_score() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), false);
        let body = "아무 헤더도 없는 본문입니다 ".repeat(30);
        let report = p.process("stub.txt", &format!("---- PAGE 1 ----\n{body}\n"));
        assert!(report.error.is_none());
        assert!(report.segmentation.is_empty());
        assert_eq!(report.extract_score, 0);
        assert!(report.flagged());
        // Explicit empty result, not a fabricated one.
        assert_eq!(report.composition_rows(), 0);
    }
}
