//! Shared concentration parsing: range, then comparator, then single value,
//! with percent-range validation and a representative numeric summary.

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::template::ConcentrationRules;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConcValue {
    Range { low: f64, high: f64 },
    Comparator { op: String, value: f64 },
    Single { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Concentration {
    /// The matched concentration expression.
    pub raw: String,
    pub value: ConcValue,
    pub unit: String,
}

impl Concentration {
    /// Range midpoint, comparator value, or the single value.
    pub fn representative(&self) -> f64 {
        match &self.value {
            ConcValue::Range { low, high } => (low + high) / 2.0,
            ConcValue::Comparator { value, .. } => *value,
            ConcValue::Single { value } => *value,
        }
    }
}

fn normalize_op(op: &str) -> String {
    match op {
        "<=" => "≤".into(),
        ">=" => "≥".into(),
        other => other.into(),
    }
}

fn valid_percent(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}

/// A numeric match only counts when it is not glued to surrounding digits
/// or a trailing `-digit` run; that shape is a CAS number, not a
/// concentration.
fn standalone(s: &str, start: usize, end: usize) -> bool {
    if let Some(before) = s[..start].chars().next_back() {
        if before.is_ascii_digit() || before == '-' || before == '.' {
            return false;
        }
    }
    let after = s[end..].trim_start();
    if let Some(rest) = after.strip_prefix('-') {
        if rest.trim_start().starts_with(|c: char| c.is_ascii_digit()) {
            return false;
        }
    }
    true
}

/// True when `token` is the leading `NNNN-NN` fragment of `cas`, a digit
/// run that looks like a concentration but is really part of the CAS.
pub fn is_cas_fragment(token: &str, cas: &str) -> bool {
    let mut parts = cas.split('-');
    let (Some(a), Some(b)) = (parts.next(), parts.next()) else {
        return false;
    };
    token.replace(' ', "") == format!("{a}-{b}")
}

pub struct ConcParser {
    range: Option<Regex>,
    cmp: Option<Regex>,
    single: Option<Regex>,
    default_unit: String,
}

impl ConcParser {
    pub fn from_rules(rules: &ConcentrationRules) -> Self {
        let compile = |pat: &str| match Regex::new(pat) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("skipping malformed concentration pattern {:?}: {}", pat, e);
                None
            }
        };
        Self {
            range: compile(&rules.range_regex),
            cmp: compile(&rules.cmp_regex),
            single: compile(&rules.single_regex),
            default_unit: rules.default_unit.clone(),
        }
    }

    /// Range → comparator → single, first valid match under percent
    /// semantics wins.
    pub fn parse(&self, cell: &str) -> Option<Concentration> {
        let s = cell.trim();
        if s.is_empty() {
            return None;
        }

        if let Some(re) = &self.range {
            if let Some(c) = re.captures(s) {
                let m = c.get(0)?;
                let low: f64 = c.get(1)?.as_str().parse().ok()?;
                let high: f64 = c.get(2)?.as_str().parse().ok()?;
                if valid_percent(low)
                    && valid_percent(high)
                    && low <= high
                    && standalone(s, m.start(), m.end())
                {
                    return Some(Concentration {
                        raw: m.as_str().trim().to_string(),
                        value: ConcValue::Range { low, high },
                        unit: self.default_unit.clone(),
                    });
                }
            }
        }

        if let Some(re) = &self.cmp {
            if let Some(c) = re.captures(s) {
                let value: f64 = c.get(2)?.as_str().parse().ok()?;
                if valid_percent(value) {
                    return Some(Concentration {
                        raw: c[0].trim().to_string(),
                        value: ConcValue::Comparator {
                            op: normalize_op(&c[1]),
                            value,
                        },
                        unit: self.default_unit.clone(),
                    });
                }
            }
        }

        if let Some(re) = &self.single {
            if let Some(c) = re.captures(s) {
                let m = c.get(0)?;
                let value: f64 = c.get(1)?.as_str().parse().ok()?;
                if valid_percent(value) && standalone(s, m.start(), m.end()) {
                    return Some(Concentration {
                        raw: m.as_str().trim().to_string(),
                        value: ConcValue::Single { value },
                        unit: self.default_unit.clone(),
                    });
                }
            }
        }

        None
    }

    /// Like [`parse`](Self::parse), but rejects a match that is really the
    /// leading fragment of the row's own CAS number.
    pub fn parse_guarded(&self, text: &str, cas: &str) -> Option<Concentration> {
        let conc = self.parse(text)?;
        if is_cas_fragment(&conc.raw, cas) {
            return None;
        }
        Some(conc)
    }

    /// Does this line carry anything concentration-shaped at all?
    pub fn mentions(&self, line: &str) -> bool {
        [&self.range, &self.cmp, &self.single]
            .into_iter()
            .flatten()
            .any(|re| re.is_match(line))
    }
}

impl Default for ConcParser {
    fn default() -> Self {
        Self::from_rules(&ConcentrationRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_midpoint() {
        let p = ConcParser::default();
        let c = p.parse("4~5%").unwrap();
        assert_eq!(c.value, ConcValue::Range { low: 4.0, high: 5.0 });
        assert_eq!(c.representative(), 4.5);
        assert_eq!(c.unit, "%");
    }

    #[test]
    fn comparator_normalized() {
        let p = ConcParser::default();
        let c = p.parse("<= 30 %").unwrap();
        assert_eq!(
            c.value,
            ConcValue::Comparator { op: "≤".into(), value: 30.0 }
        );
        assert_eq!(c.representative(), 30.0);
    }

    #[test]
    fn single_value() {
        let p = ConcParser::default();
        let c = p.parse("95.5").unwrap();
        assert_eq!(c.value, ConcValue::Single { value: 95.5 });
    }

    #[test]
    fn out_of_percent_range_rejected() {
        let p = ConcParser::default();
        assert!(p.parse("150~200%").is_none());
        assert!(p.parse("1310").is_none());
    }

    #[test]
    fn inverted_range_rejected() {
        let p = ConcParser::default();
        // 73-2 inside a CAS tail must not become a range.
        assert!(!matches!(
            p.parse("73-2").map(|c| c.value),
            Some(ConcValue::Range { .. })
        ));
    }

    #[test]
    fn cas_fragment_guard() {
        let p = ConcParser::default();
        assert!(is_cas_fragment("50-00", "50-00-0"));
        assert!(p.parse_guarded("50-00", "50-00-0").is_none());
        assert!(p.parse_guarded("45~50%", "50-00-0").is_some());
    }
}
