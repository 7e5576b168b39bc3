use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use crate::catalog::CatalogStore;
use crate::domain::category::{CategoryRules, CategoryWeight, RuleSet};
use crate::domain::processing_unit::PuType;
use crate::errors::ApplicationError;

/// Resolves a raw weight for every known benchmark name and normalizes them to sum to 1.
///
/// When every raw weight is 0 the result is all zeros.
pub fn derive_weights<'a>(
    rule_set: &RuleSet,
    known_benchmark_names: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, f64> {
    let raw: BTreeMap<String, f64> = known_benchmark_names
        .into_iter()
        .map(|name| (name.to_string(), rule_set.raw_weight_for(name)))
        .collect();

    let total: f64 = raw.values().sum();
    raw.into_iter()
        .map(|(name, raw_weight)| {
            let weight = if total > 0.0 { raw_weight / total } else { 0.0 };
            (name, weight)
        })
        .collect()
}

/// Persists derived weights for every (category, pu type) that has authored rules.
///
/// Derivation is always a full recompute over every benchmark name known for the type, since
/// a single new name shifts the normalizing denominator of all the others.
pub struct CategoryWeightDeriver {
    store: Arc<dyn CatalogStore>,
}

impl CategoryWeightDeriver {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Re-derives every category of `pu_type`. Returns the categories that were written.
    pub async fn rederive(&self, pu_type: PuType) -> Result<BTreeSet<String>, ApplicationError> {
        let known_names = self.known_benchmark_names(pu_type).await?;
        let rules = self.store.list_category_rules().await?;

        let mut derived = BTreeSet::new();
        for category_rules in rules.iter().filter(|rules| rules.pu_type == pu_type) {
            self.persist(category_rules, &known_names).await?;
            derived.insert(category_rules.category.clone());
        }

        info!(
            event_name = "scoring.weights.rederived",
            pu_type = %pu_type,
            categories = derived.len(),
            benchmark_names = known_names.len(),
            "category weights re-derived"
        );
        Ok(derived)
    }

    async fn known_benchmark_names(&self, pu_type: PuType) -> Result<Vec<String>, ApplicationError> {
        let stats = self.store.list_stats(pu_type).await?;
        Ok(stats.into_iter().map(|stat| stat.name).collect())
    }

    async fn persist(
        &self,
        category_rules: &CategoryRules,
        known_names: &[String],
    ) -> Result<Vec<CategoryWeight>, ApplicationError> {
        let weights: Vec<CategoryWeight> =
            derive_weights(&category_rules.rule_set, known_names.iter().map(String::as_str))
                .into_iter()
                .map(|(benchmark_name, weight)| CategoryWeight {
                    category: category_rules.category.clone(),
                    pu_type: category_rules.pu_type,
                    benchmark_name,
                    weight,
                })
                .collect();

        self.store
            .replace_category_weights(
                &category_rules.category,
                category_rules.pu_type,
                weights.clone(),
            )
            .await?;
        Ok(weights)
    }
}
