use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lapsel_core::domain::category::{CategoryRules, RuleSet};
use lapsel_core::domain::processing_unit::PuType;
use serde::Deserialize;

use crate::commands::{engine_failure, input_failure, with_engine, CommandResult};

/// One category of the rules file. Entries keep their authored order because the first
/// matching pattern wins.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CategoryEntry {
    cpu: Vec<(String, f64)>,
    gpu: Vec<(String, f64)>,
}

pub fn run(path: &Path) -> CommandResult {
    let rules = match read_rules_file(path) {
        Ok(rules) => rules,
        Err(error) => {
            let (class, message, code) = input_failure(format!("{error:#}"));
            return CommandResult::failure("load-rules", class, message, code);
        }
    };

    with_engine("load-rules", |engine| async move {
        let rule_sets = rules.len();
        let recomputed = engine.ingestor.load_rules(rules).await.map_err(engine_failure)?;
        Ok(format!("loaded {rule_sets} rule sets, recomputed {recomputed} processing units"))
    })
}

pub fn read_rules_file(path: &Path) -> Result<Vec<CategoryRules>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read rules file `{}`", path.display()))?;
    parse_rules(&raw).with_context(|| format!("invalid rules file `{}`", path.display()))
}

/// Parses `{category: {cpu: [[pattern, weight], ...], gpu: [...]}}` into one rule set per
/// (category, type).
pub fn parse_rules(raw: &str) -> Result<Vec<CategoryRules>> {
    let file: BTreeMap<String, CategoryEntry> = serde_json::from_str(raw)?;
    anyhow::ensure!(!file.is_empty(), "rules file declares no categories");

    let mut rules = Vec::with_capacity(file.len() * 2);
    for (category, entry) in file {
        for (pu_type, entries) in [(PuType::Cpu, entry.cpu), (PuType::Gpu, entry.gpu)] {
            let rule_set = RuleSet::from_authored(&category, entries)?;
            rules.push(CategoryRules { category: category.clone(), pu_type, rule_set });
        }
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use lapsel_core::domain::processing_unit::PuType;

    use super::parse_rules;

    #[test]
    fn rules_keep_authored_order_and_lift_default() {
        let rules = parse_rules(
            r#"{
                "gaming": {
                    "cpu": [["single", 2.0], ["*", 0.5]],
                    "gpu": [["fps&&1080p", 4.0], ["fps", 3.0]]
                }
            }"#,
        )
        .expect("rules");

        assert_eq!(rules.len(), 2);
        let cpu = &rules[0];
        assert_eq!((cpu.category.as_str(), cpu.pu_type), ("gaming", PuType::Cpu));
        assert_eq!(cpu.rule_set.default_weight, Some(0.5));
        assert_eq!(cpu.rule_set.raw_weight_for("cinebench_single"), 2.0);
        assert_eq!(cpu.rule_set.raw_weight_for("cinebench_multi"), 0.5);

        let gpu = &rules[1];
        assert_eq!(gpu.pu_type, PuType::Gpu);
        assert_eq!(gpu.rule_set.raw_weight_for("fps_1080p_ultra"), 4.0);
        assert_eq!(gpu.rule_set.raw_weight_for("fps_4k"), 3.0);
        assert_eq!(gpu.rule_set.raw_weight_for("timespy"), 1.0);
    }

    #[test]
    fn rules_reject_negative_weights_and_missing_sides() {
        let negative = parse_rules(r#"{"dev": {"cpu": [["compile", -1]], "gpu": []}}"#)
            .expect_err("negative weight");
        assert!(format!("{negative:#}").contains("compile"));

        parse_rules(r#"{"dev": {"cpu": []}}"#).expect_err("gpu side is required");
        parse_rules("{}").expect_err("empty file");
    }
}
