//! Extraction templates ("profiles"): one named bundle of detection and
//! extraction rules per observed document layout. Profiles live as YAML
//! files in a directory; the store owns every mutation of that directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::pipeline::sections::Segmentation;

/// Name of the built-in fallback template. Never persisted.
pub const FALLBACK_TEMPLATE: &str = "_generic";

pub const CAS_REGEX_DEFAULT: &str = r"\b(\d{2,7}-\d{2}-\d)\b";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Template {
    pub name: String,
    pub detect: DetectRules,
    pub composition: CompositionRules,
    pub physchem: PhyschemRules,
    pub regulatory: RegulatoryRules,
    pub identification: IdentRules,
    pub meta: MetaRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectRules {
    /// Layout-identifying signatures ("core" patterns).
    pub doc_signatures: Vec<String>,
    /// Minimal regexes captured from the document a template was generated
    /// from. A fully matched, non-empty seed set doc-locks the template.
    pub seed_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionRules {
    /// Cascade order; entries are `table`, `block`, `text`.
    pub engines_order: Vec<String>,
    pub guards: GuardRules,
    pub concentration: ConcentrationRules,
    pub table: TableRules,
    pub block: BlockRules,
    pub blockers: BlockerRules,
}

impl Default for CompositionRules {
    fn default() -> Self {
        Self {
            engines_order: vec!["table".into(), "block".into(), "text".into()],
            guards: GuardRules::default(),
            concentration: ConcentrationRules::default(),
            table: TableRules::default(),
            block: BlockRules::default(),
            blockers: BlockerRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardRules {
    pub cas_regex: String,
    /// CAS prefixes that coincidentally match inside longer digit runs;
    /// `7732-18` is the head of water's CAS.
    pub forbid_cas_fragments: Vec<String>,
}

impl Default for GuardRules {
    fn default() -> Self {
        Self {
            cas_regex: CAS_REGEX_DEFAULT.into(),
            forbid_cas_fragments: vec!["7732-18".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcentrationRules {
    pub default_unit: String,
    pub range_regex: String,
    pub cmp_regex: String,
    pub single_regex: String,
}

impl Default for ConcentrationRules {
    fn default() -> Self {
        Self {
            default_unit: "%".into(),
            range_regex: r"(\d+(?:\.\d+)?)\s*[~\-]\s*(\d+(?:\.\d+)?)\s*%?".into(),
            cmp_regex: r"(<=|>=|<|>|≤|≥)\s*(\d+(?:\.\d+)?)\s*%?".into(),
            single_regex: r"(\d+(?:\.\d+)?)\s*%?".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRules {
    pub header_aliases: HeaderAliases,
    /// A row matching this stops table consumption (e.g. footnote rows).
    pub stop_rows_regex: Option<String>,
}

impl Default for TableRules {
    fn default() -> Self {
        Self {
            header_aliases: HeaderAliases::default(),
            stop_rows_regex: Some(r"^\s*표기되지\s*않은\s*구성성분".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderAliases {
    pub name: Vec<String>,
    pub cas: Vec<String>,
    pub conc: Vec<String>,
}

impl Default for HeaderAliases {
    fn default() -> Self {
        Self {
            name: vec![r"(?i)구성성분|성분|물질명|관용명|name|chemical".into()],
            cas: vec![r"(?i)cas\s*no\.?|cas\s*번호|\bcas\b|식별번호".into()],
            conc: vec![r"(?i)함유율|함유량|함량|농도|content|concentration|conc".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockRules {
    /// Horizontal layouts: one row per line, named groups `name`/`cas`/`conc`.
    pub line_patterns: Vec<String>,
    /// Vertical layout: fields in declared order, each within `max_gap_lines`.
    pub vertical: Option<VerticalRules>,
    /// Transposed layout: N name lines, then N CAS lines, then N
    /// concentration lines.
    pub transposed: bool,
}

impl Default for BlockRules {
    fn default() -> Self {
        // Only the delimiter-anchored horizontal pattern by default; loose
        // vertical strides are for templates that declare them, the generic
        // text stage covers the rest.
        Self {
            line_patterns: vec![
                r"(?P<name>[^\t,|\n]{2,}?)\s*[\t,|]+\s*(?P<cas>\d{2,7}-\d{2}-\d)\s*[\t,|]+\s*(?P<conc>[^\n%]{1,30}%?)".into(),
            ],
            vertical: None,
            transposed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerticalRules {
    pub order: Vec<String>,
    pub field_regex: BTreeMap<String, String>,
    pub max_gap_lines: usize,
}

impl Default for VerticalRules {
    fn default() -> Self {
        let mut field_regex = BTreeMap::new();
        field_regex.insert("name".into(), r"^\s*[^\d\s][^\n]{1,}$".into());
        field_regex.insert("cas".into(), r"\b\d{2,7}-\d{2}-\d\b".into());
        field_regex.insert("conc".into(), r"%|~|\d|<=|>=|≤|≥".into());
        Self {
            order: vec!["name".into(), "cas".into(), "conc".into()],
            field_regex,
            max_gap_lines: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlockerRules {
    /// A match inside the section truncates the body before any parsing
    /// stage runs (e.g. an exposure-limit table shaped like a composition
    /// table).
    pub inner_stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PhyschemRules {
    /// Template additions on top of the built-in alias reference data.
    pub extra_aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegulatoryRules {
    pub split_tokens: Vec<String>,
    pub product_headers: Vec<String>,
    pub bullet_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentRules {
    pub product_patterns: Vec<String>,
    pub company_patterns: Vec<String>,
    pub address_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetaRules {
    pub doc_no_patterns: Vec<String>,
}

impl Template {
    /// The built-in fallback: generic defaults, no seed evidence.
    pub fn generic() -> Self {
        Self {
            name: FALLBACK_TEMPLATE.into(),
            detect: DetectRules {
                doc_signatures: vec![r"(?i)MSDS|SDS|물질안전보건자료|safety\s+data\s+sheet".into()],
                seed_patterns: Vec::new(),
            },
            ..Self::default()
        }
    }

    /// Synthesize a template from an unmatched document: the observed
    /// section-header lines become the seed set, everything else stays at
    /// the generic defaults. The source document matches every seed, so it
    /// doc-locks on the next routing pass.
    pub fn synthesize_from(seg: &Segmentation) -> Self {
        let seed_patterns = seg
            .order
            .iter()
            .filter_map(|k| seg.get(*k))
            .map(|s| header_seed_pattern(&s.title))
            .collect();
        let mut tpl = Self::generic();
        tpl.name = String::new(); // assigned by the store
        tpl.detect.seed_patterns = seed_patterns;
        tpl
    }
}

/// Escape one observed header line into a seed regex that survives
/// re-normalization: literal tokens joined by flexible whitespace.
fn header_seed_pattern(title: &str) -> String {
    let escaped: Vec<String> = title.split_whitespace().map(regex::escape).collect();
    format!(r"(?m)^\s*{}", escaped.join(r"\s+"))
}

/// Compile a pattern list, skipping malformed entries with a diagnostic.
/// A bad rule never aborts the document it came from.
pub fn compile_rules(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("skipping malformed rule pattern {:?}: {}", p, e);
                None
            }
        })
        .collect()
}

// ── Profile store ──

static NAME_RE: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^pattern_(\d+)$").unwrap());

/// Owns the profile directory. Templates are immutable during a pass;
/// auto-generation appends a new profile under the next sequence-numbered
/// name and reloads. Creation is serialized so concurrent batch workers
/// cannot produce duplicate or interleaved profiles.
pub struct TemplateStore {
    dir: PathBuf,
    inner: RwLock<BTreeMap<String, Template>>,
    create_lock: Mutex<()>,
}

impl TemplateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating template dir {}", dir.display()))?;
        let map = Self::load_dir(&dir)?;
        Ok(Self {
            dir,
            inner: RwLock::new(map),
            create_lock: Mutex::new(()),
        })
    }

    fn load_dir(dir: &Path) -> Result<BTreeMap<String, Template>> {
        let mut map = BTreeMap::new();
        map.insert(FALLBACK_TEMPLATE.to_string(), Template::generic());
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
            if !is_yaml {
                continue;
            }
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("unreadable profile {}: {}", path.display(), e);
                    continue;
                }
            };
            match serde_yaml::from_str::<Template>(&raw) {
                Ok(mut tpl) => {
                    if tpl.name.is_empty() {
                        tpl.name = path
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or_default()
                            .to_string();
                    }
                    map.insert(tpl.name.clone(), tpl);
                }
                Err(e) => warn!("unparseable profile {}: {}", path.display(), e),
            }
        }
        Ok(map)
    }

    pub fn reload(&self) -> Result<usize> {
        let map = Self::load_dir(&self.dir)?;
        let n = map.len();
        *self.inner.write().expect("template store lock poisoned") = map;
        Ok(n)
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("template store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("template store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Template> {
        self.inner
            .read()
            .expect("template store lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Template> {
        self.inner
            .read()
            .expect("template store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Persist a new profile under the next free sequence name and reload.
    /// `create_new` keeps the name unique even across processes sharing the
    /// directory.
    pub fn add(&self, mut template: Template) -> Result<String> {
        let _guard = self.create_lock.lock().expect("template store lock poisoned");
        loop {
            let name = self.next_name()?;
            let path = self.dir.join(format!("{name}.yaml"));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    template.name = name.clone();
                    let yaml = serde_yaml::to_string(&template)?;
                    file.write_all(yaml.as_bytes())?;
                    self.reload()?;
                    info!("created profile {}", name);
                    return Ok(name);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("creating profile {}", path.display()))
                }
            }
        }
    }

    fn next_name(&self) -> Result<String> {
        let mut max_n = 0u32;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(caps) = NAME_RE.captures(stem) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    max_n = max_n.max(n);
                }
            }
        }
        Ok(format!("pattern_{:04}", max_n + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::Document;
    use crate::pipeline::sections::split_sections;

    #[test]
    fn store_assigns_increasing_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(tmp.path()).unwrap();
        let a = store.add(Template::generic()).unwrap();
        let b = store.add(Template::generic()).unwrap();
        assert_eq!(a, "pattern_0001");
        assert_eq!(b, "pattern_0002");
        assert!(store.get(&a).is_some());
        assert!(store.get(&b).is_some());
    }

    #[test]
    fn reload_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(tmp.path()).unwrap();
        store.add(Template::generic()).unwrap();
        let before = store.names();
        store.reload().unwrap();
        assert_eq!(store.names(), before);
    }

    #[test]
    fn fallback_always_present() {
        let tmp = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(tmp.path()).unwrap();
        assert!(store.get(FALLBACK_TEMPLATE).is_some());
    }

    #[test]
    fn synthesized_seeds_match_source_document() {
        let doc = Document::from_raw(
            "---- PAGE 1 ----\n3. 구성성분의 명칭 및 함유량\nrows\n9. 물리화학적 특성\npH: 7\n",
        );
        let seg = split_sections(&doc);
        let tpl = Template::synthesize_from(&seg);
        assert!(!tpl.detect.seed_patterns.is_empty());
        for pat in &tpl.detect.seed_patterns {
            let re = Regex::new(pat).unwrap();
            assert!(re.is_match(&doc.text), "seed {:?} must match its source", pat);
        }
    }

    #[test]
    fn malformed_rule_is_skipped() {
        let rules = vec!["[unclosed".to_string(), r"\d+".to_string()];
        let compiled = compile_rules(&rules);
        assert_eq!(compiled.len(), 1);
    }
}
