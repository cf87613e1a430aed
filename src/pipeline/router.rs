use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::template::{Template, FALLBACK_TEMPLATE};

/// Every routing weight and threshold in one place.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub core_weight: f64,
    pub seed_weight: f64,
    /// Seed hit-ratio is capped here before blending, so seed evidence
    /// alone can never clear the confidence threshold. Only the doc-lock
    /// path promotes seeds to a win.
    pub seed_cap: f64,
    pub min_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            core_weight: 0.6,
            seed_weight: 0.4,
            seed_cap: 80.0,
            min_confidence: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub name: String,
    pub score: f64,
    pub locked: bool,
    pub core_hit: usize,
    pub core_tot: usize,
    pub seed_hit: usize,
    pub seed_tot: usize,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub selected: String,
    pub score: f64,
    pub locked: bool,
    /// Set by the pipeline when this outcome follows an auto-generation.
    pub created: bool,
    pub candidates: Vec<Candidate>,
    pub reason: String,
}

fn ratio(hit: usize, tot: usize) -> f64 {
    if tot == 0 {
        0.0
    } else {
        100.0 * hit as f64 / tot as f64
    }
}

fn count_hits(text: &str, patterns: &[String]) -> (usize, usize) {
    let mut hit = 0;
    let mut tot = 0;
    for p in patterns {
        match Regex::new(p) {
            Ok(re) => {
                tot += 1;
                if re.is_match(text) {
                    hit += 1;
                }
            }
            Err(e) => warn!("skipping malformed detect pattern {:?}: {}", p, e),
        }
    }
    (hit, tot)
}

/// Score one template against a document. A non-empty, fully matched seed
/// set is a doc-lock: the document is the one this template was generated
/// from, score 100 regardless of core evidence.
pub fn score_template(text: &str, template: &Template, cfg: &ScoringConfig) -> Candidate {
    let (core_hit, core_tot) = count_hits(text, &template.detect.doc_signatures);
    let (seed_hit, seed_tot) = count_hits(text, &template.detect.seed_patterns);

    let locked = seed_tot > 0 && seed_hit == seed_tot;
    let score = if locked {
        100.0
    } else {
        let core_pct = ratio(core_hit, core_tot);
        let seed_pct = ratio(seed_hit, seed_tot).min(cfg.seed_cap);
        cfg.core_weight * core_pct + cfg.seed_weight * seed_pct
    };

    Candidate {
        name: template.name.clone(),
        score,
        locked,
        core_hit,
        core_tot,
        seed_hit,
        seed_tot,
    }
}

/// Pick the best-scoring template; below the confidence threshold the
/// fallback is selected instead. Ties break on lock status, then core-hit
/// count, then name order, so routing is deterministic.
pub fn route(text: &str, templates: &[Template], cfg: &ScoringConfig) -> RouteOutcome {
    let mut candidates: Vec<Candidate> = templates
        .iter()
        .map(|t| score_template(text, t, cfg))
        .collect();

    candidates.sort_by(|a, b| {
        b.locked
            .cmp(&a.locked)
            .then(b.score.total_cmp(&a.score))
            .then(b.core_hit.cmp(&a.core_hit))
            .then(a.name.cmp(&b.name))
    });
    candidates.truncate(8);

    let Some(best) = candidates.first() else {
        return RouteOutcome {
            selected: FALLBACK_TEMPLATE.into(),
            score: 0.0,
            locked: false,
            created: false,
            candidates,
            reason: "no templates loaded".into(),
        };
    };

    let (selected, reason) = if best.locked {
        (best.name.clone(), format!("doc-lock on {}", best.name))
    } else if best.score >= cfg.min_confidence {
        (
            best.name.clone(),
            format!("core/seed match = {:.1}", best.score),
        )
    } else {
        (
            FALLBACK_TEMPLATE.into(),
            format!(
                "best candidate {} at {:.1} below threshold {:.0}",
                best.name, best.score, cfg.min_confidence
            ),
        )
    };

    debug!("router: selected {} ({})", selected, reason);

    RouteOutcome {
        score: best.score,
        locked: best.locked,
        created: false,
        selected,
        candidates,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::DetectRules;

    fn template(name: &str, core: &[&str], seed: &[&str]) -> Template {
        let mut t = Template::generic();
        t.name = name.into();
        t.detect = DetectRules {
            doc_signatures: core.iter().map(|s| s.to_string()).collect(),
            seed_patterns: seed.iter().map(|s| s.to_string()).collect(),
        };
        t
    }

    #[test]
    fn doc_lock_wins_outright() {
        let text = "물질안전보건자료\n3. 구성성분의 명칭 및 함유량\n";
        let specific = template("specific", &["구성성분", "물질안전보건자료", "없는패턴"], &[]);
        let seeded = template("seeded", &[], &["구성성분의 명칭"]);
        let out = route(text, &[specific, seeded], &ScoringConfig::default());
        assert_eq!(out.selected, "seeded");
        assert_eq!(out.score, 100.0);
        assert!(out.locked);
    }

    #[test]
    fn seed_evidence_alone_stays_below_threshold() {
        let cfg = ScoringConfig::default();
        // Seeds partially matched: no lock, and the capped blend cannot
        // reach the threshold without core hits.
        let t = template("seed_only", &[], &["매칭됨", "절대로안매칭됨xyz"]);
        let cand = score_template("매칭됨 텍스트", &t, &cfg);
        assert!(!cand.locked);
        assert!(cand.score < cfg.min_confidence);
        assert!(cand.score <= cfg.seed_weight * cfg.seed_cap);
    }

    #[test]
    fn blend_selects_highest_core() {
        let text = "MSDS 문서 구성성분 함유량 물리화학적 특성";
        let good = template("good", &["구성성분", "함유량", "물리화학"], &[]);
        let poor = template("poor", &["구성성분", "전혀없는시그니처", "다른없는것"], &[]);
        let cfg = ScoringConfig {
            min_confidence: 50.0,
            ..Default::default()
        };
        let out = route(text, &[poor, good], &cfg);
        assert_eq!(out.selected, "good");
        assert!(!out.locked);
    }

    #[test]
    fn below_threshold_falls_back() {
        let text = "아무 시그니처도 없는 문서";
        let t = template("t1", &["구성성분"], &[]);
        let out = route(text, &[t], &ScoringConfig::default());
        assert_eq!(out.selected, FALLBACK_TEMPLATE);
        assert!(!out.created);
    }

    #[test]
    fn malformed_detect_pattern_is_skipped() {
        let t = template("broken", &["[unclosed", "구성성분"], &[]);
        let cand = score_template("구성성분", &t, &ScoringConfig::default());
        assert_eq!(cand.core_tot, 1);
        assert_eq!(cand.core_hit, 1);
    }

    #[test]
    fn routing_is_deterministic() {
        let text = "MSDS 구성성분 함유량";
        let ts = vec![
            template("a", &["구성성분", "함유량"], &[]),
            template("b", &["구성성분", "함유량"], &[]),
        ];
        let cfg = ScoringConfig {
            min_confidence: 50.0,
            ..Default::default()
        };
        let first = route(text, &ts, &cfg);
        let second = route(text, &ts, &cfg);
        assert_eq!(first.selected, second.selected);
        assert_eq!(first.selected, "a"); // name order breaks the tie
    }
}
