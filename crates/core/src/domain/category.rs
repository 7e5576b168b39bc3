use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::processing_unit::{ProcessingUnitId, PuType};
use crate::errors::DomainError;

/// Marker joining the required substrings of a pattern.
pub const PATTERN_CONJUNCTION: &str = "&&";

/// Authored pattern that stands for "every benchmark not matched by an earlier pattern".
pub const DEFAULT_PATTERN: &str = "*";

/// Raw weight used when a rule set has no `*` entry.
pub const DEFAULT_RAW_WEIGHT: f64 = 1.0;

/// A conjunction of required substrings. Matching is case-sensitive, as authored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BenchmarkPattern {
    required: Vec<String>,
}

impl BenchmarkPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw == DEFAULT_PATTERN {
            return Err("`*` is the default entry, not a positional pattern".to_string());
        }
        let required: Vec<String> = raw.split(PATTERN_CONJUNCTION).map(str::to_string).collect();
        if required.iter().any(|part| part.is_empty()) {
            return Err(format!("pattern `{raw}` contains an empty required substring"));
        }
        Ok(Self { required })
    }

    pub fn matches(&self, benchmark_name: &str) -> bool {
        self.required.iter().all(|part| benchmark_name.contains(part.as_str()))
    }
}

impl TryFrom<String> for BenchmarkPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BenchmarkPattern> for String {
    fn from(value: BenchmarkPattern) -> Self {
        value.required.join(PATTERN_CONJUNCTION)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: BenchmarkPattern,
    pub raw_weight: f64,
}

/// Ordered rules for one (category, pu type). Order is precedence: the first matching
/// pattern wins.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<PatternRule>,
    pub default_weight: Option<f64>,
}

impl RuleSet {
    /// Builds a rule set from authored `(pattern, raw weight)` pairs, lifting any `*` entry
    /// out of the positional list into the default.
    pub fn from_authored(
        category: &str,
        entries: impl IntoIterator<Item = (String, f64)>,
    ) -> Result<Self, DomainError> {
        let invalid = |reason: String| DomainError::InvalidRuleSet {
            category: category.to_string(),
            reason,
        };

        let mut rule_set = RuleSet::default();
        for (pattern, raw_weight) in entries {
            if !raw_weight.is_finite() || raw_weight < 0.0 {
                return Err(invalid(format!(
                    "weight of `{pattern}` must be a finite non-negative number"
                )));
            }
            if pattern == DEFAULT_PATTERN {
                if rule_set.default_weight.replace(raw_weight).is_some() {
                    return Err(invalid("`*` appears more than once".to_string()));
                }
                continue;
            }
            let pattern = BenchmarkPattern::parse(&pattern).map_err(invalid)?;
            rule_set.rules.push(PatternRule { pattern, raw_weight });
        }
        Ok(rule_set)
    }

    pub fn raw_weight_for(&self, benchmark_name: &str) -> f64 {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(benchmark_name))
            .map(|rule| rule.raw_weight)
            .unwrap_or_else(|| self.default_weight.unwrap_or(DEFAULT_RAW_WEIGHT))
    }
}

/// The authored rules of one category for one processing unit type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryRules {
    pub category: String,
    pub pu_type: PuType,
    pub rule_set: RuleSet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryWeight {
    pub category: String,
    pub pu_type: PuType,
    pub benchmark_name: String,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedScore {
    pub processing_unit_id: ProcessingUnitId,
    pub pu_type: PuType,
    pub category: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{BenchmarkPattern, RuleSet};

    fn authored(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
        entries.iter().map(|(pattern, weight)| (pattern.to_string(), *weight)).collect()
    }

    #[test]
    fn pattern_requires_every_substring() {
        let pattern = BenchmarkPattern::parse("dev&&multi").expect("pattern");
        assert!(pattern.matches("dev_multi_core"));
        assert!(pattern.matches("multi_dev"));
        assert!(!pattern.matches("dev_single_core"));
        assert!(!pattern.matches("Dev_Multi_core"));
    }

    #[test]
    fn first_matching_rule_wins_over_later_rules() {
        let rules = RuleSet::from_authored(
            "dev",
            authored(&[("multi", 3.0), ("multi&&core", 7.0), ("*", 1.0)]),
        )
        .expect("rules");

        assert_eq!(rules.raw_weight_for("multi_core"), 3.0);
        assert_eq!(rules.raw_weight_for("single_core"), 1.0);
    }

    #[test]
    fn star_is_only_a_fallback_even_when_listed_first() {
        let rules =
            RuleSet::from_authored("dev", authored(&[("*", 0.5), ("gaming", 4.0)])).expect("rules");

        assert_eq!(rules.raw_weight_for("gaming_fps"), 4.0);
        assert_eq!(rules.raw_weight_for("office"), 0.5);
    }

    #[test]
    fn missing_star_defaults_to_one() {
        let rules = RuleSet::from_authored("dev", authored(&[("gaming", 4.0)])).expect("rules");
        assert_eq!(rules.raw_weight_for("office"), 1.0);
    }

    #[test]
    fn rejects_malformed_rule_sets() {
        assert!(RuleSet::from_authored("dev", authored(&[("a&&", 1.0)])).is_err());
        assert!(RuleSet::from_authored("dev", authored(&[("a", -1.0)])).is_err());
        assert!(RuleSet::from_authored("dev", authored(&[("*", 1.0), ("*", 2.0)])).is_err());
    }

    #[test]
    fn rule_set_survives_json_storage() {
        let rules = RuleSet::from_authored("dev", authored(&[("dev&&multi", 3.0), ("*", 1.0)]))
            .expect("rules");
        let json = serde_json::to_string(&rules).expect("serialize");
        assert!(json.contains("\"dev&&multi\""));

        let restored: RuleSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, rules);
    }
}
