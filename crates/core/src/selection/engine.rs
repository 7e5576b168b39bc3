use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::CatalogStore;
use crate::domain::laptop::Laptop;
use crate::domain::processing_unit::{ProcessingUnitId, PuType};
use crate::errors::{ApplicationError, DomainError};
use crate::selection::top_k::{Ranked, TopK};

pub const DEFAULT_AMOUNT: usize = 5;
pub const DEFAULT_MAX_AMOUNT: usize = 50;

/// Scale of the per-category breakdown: two shares in [0,1] map onto [0,100].
const CATEGORY_PERCENT_SCALE: f64 = 50.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub category_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedLaptop {
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub url: Option<String>,
    pub image_urls: Vec<String>,
    pub ram_gigabytes: Option<u32>,
    pub weight_grams: Option<f64>,
    pub cpu_name: String,
    pub gpu_name: String,
    /// Sum of the normalized CPU and GPU scores, in [0,2].
    pub score: f64,
    /// Percentage in [0,100] per requested category.
    pub scores_in_categories: BTreeMap<String, f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionLimits {
    pub default_amount: usize,
    pub max_amount: usize,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self { default_amount: DEFAULT_AMOUNT, max_amount: DEFAULT_MAX_AMOUNT }
    }
}

/// Read-only ranking over cached category scores. Requests have no side effects and can be
/// dropped at any await point.
pub struct SelectionEngine {
    store: Arc<dyn CatalogStore>,
    limits: SelectionLimits,
}

impl SelectionEngine {
    pub fn new(store: Arc<dyn CatalogStore>, limits: SelectionLimits) -> Self {
        Self { store, limits }
    }

    pub async fn categories(&self) -> Result<Vec<String>, ApplicationError> {
        Ok(self.store.list_categories().await?)
    }

    pub async fn select(
        &self,
        request: &SelectionRequest,
    ) -> Result<Vec<RankedLaptop>, ApplicationError> {
        let known_categories = self.store.list_categories().await?;
        let (weights, amount) = self.validate(request, &known_categories)?;

        let cpu_scores = UnitScores::load(self.store.as_ref(), PuType::Cpu, &weights).await?;
        let gpu_scores = UnitScores::load(self.store.as_ref(), PuType::Gpu, &weights).await?;

        let laptops = self.store.list_laptops(request.max_price).await?;
        let candidates = laptops.len();
        let mut top = TopK::new(amount);
        for laptop in laptops {
            let score =
                cpu_scores.normalized(&laptop.cpu_id) + gpu_scores.normalized(&laptop.gpu_id);
            let price = laptop.price;
            top.offer(laptop, score, price);
        }

        let mut selected = Vec::with_capacity(amount);
        for ranked in top.into_ranked() {
            selected.push(self.describe(ranked, &weights, &cpu_scores, &gpu_scores).await?);
        }

        info!(
            event_name = "selection.completed",
            categories = weights.len(),
            candidates,
            returned = selected.len(),
            amount,
            "laptops ranked"
        );
        Ok(selected)
    }

    /// Returns the request's weights normalized to sum to 1, and the effective amount.
    fn validate(
        &self,
        request: &SelectionRequest,
        known_categories: &[String],
    ) -> Result<(BTreeMap<String, f64>, usize), DomainError> {
        if request.category_scores.is_empty() {
            return Err(DomainError::InvalidSelection(
                "at least one category score is required".to_string(),
            ));
        }
        for (category, weight) in &request.category_scores {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(DomainError::InvalidSelection(format!(
                    "score for `{category}` must be a finite non-negative number"
                )));
            }
        }
        if let Some(unknown) = request
            .category_scores
            .keys()
            .find(|category| !known_categories.contains(*category))
        {
            return Err(DomainError::UnknownCategory(unknown.clone()));
        }

        let total: f64 = request.category_scores.values().sum();
        if !total.is_finite() {
            return Err(DomainError::InvalidSelection(
                "category scores are too large to combine".to_string(),
            ));
        }
        if total <= 0.0 {
            return Err(DomainError::InvalidSelection(
                "category scores must not all be zero".to_string(),
            ));
        }

        let amount = request.amount.unwrap_or(self.limits.default_amount);
        if amount == 0 || amount > self.limits.max_amount {
            return Err(DomainError::InvalidSelection(format!(
                "amount must be between 1 and {}",
                self.limits.max_amount
            )));
        }

        let weights = request
            .category_scores
            .iter()
            .map(|(category, weight)| (category.clone(), weight / total))
            .collect();
        Ok((weights, amount))
    }

    async fn describe(
        &self,
        ranked: Ranked<Laptop>,
        weights: &BTreeMap<String, f64>,
        cpu_scores: &UnitScores,
        gpu_scores: &UnitScores,
    ) -> Result<RankedLaptop, ApplicationError> {
        let laptop = ranked.item;
        let cpu_name = self.unit_name(PuType::Cpu, &laptop.cpu_id).await?;
        let gpu_name = self.unit_name(PuType::Gpu, &laptop.gpu_id).await?;

        let scores_in_categories = weights
            .keys()
            .map(|category| {
                let share = cpu_scores.category_share(&laptop.cpu_id, category)
                    + gpu_scores.category_share(&laptop.gpu_id, category);
                (category.clone(), CATEGORY_PERCENT_SCALE * share)
            })
            .collect();

        Ok(RankedLaptop {
            name: laptop.name,
            price: laptop.price,
            url: laptop.url,
            image_urls: laptop.image_urls,
            ram_gigabytes: laptop.ram_gigabytes,
            weight_grams: laptop.weight_grams,
            cpu_name,
            gpu_name,
            score: ranked.score,
            scores_in_categories,
        })
    }

    async fn unit_name(
        &self,
        pu_type: PuType,
        id: &ProcessingUnitId,
    ) -> Result<String, ApplicationError> {
        self.store
            .find_processing_unit(pu_type, id)
            .await?
            .map(|unit| unit.name)
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!(
                    "laptop references missing {pu_type} processing unit `{id}`"
                ))
                .into()
            })
    }
}

/// Request-scoped working set for one pu type: cached scores of the requested categories and
/// the weighted sum per unit, computed once and shared by every laptop using that unit.
struct UnitScores {
    per_category: HashMap<ProcessingUnitId, HashMap<String, f64>>,
    combined: HashMap<ProcessingUnitId, f64>,
    max_combined: f64,
    max_per_category: HashMap<String, f64>,
}

impl UnitScores {
    async fn load(
        store: &dyn CatalogStore,
        pu_type: PuType,
        weights: &BTreeMap<String, f64>,
    ) -> Result<Self, ApplicationError> {
        let mut per_category: HashMap<ProcessingUnitId, HashMap<String, f64>> = HashMap::new();
        let mut max_per_category: HashMap<String, f64> = HashMap::new();
        for row in store.list_cached_scores(pu_type).await? {
            if !weights.contains_key(&row.category) {
                continue;
            }
            let max = max_per_category.entry(row.category.clone()).or_insert(0.0);
            *max = max.max(row.score);
            per_category.entry(row.processing_unit_id).or_default().insert(row.category, row.score);
        }

        // a missing (unit, category) row contributes 0
        let combined: HashMap<ProcessingUnitId, f64> = per_category
            .iter()
            .map(|(unit_id, scores)| {
                let sum = weights
                    .iter()
                    .map(|(category, weight)| scores.get(category).copied().unwrap_or(0.0) * weight)
                    .sum();
                (unit_id.clone(), sum)
            })
            .collect();
        let max_combined = combined.values().copied().fold(0.0, f64::max);

        Ok(Self { per_category, combined, max_combined, max_per_category })
    }

    fn normalized(&self, unit_id: &ProcessingUnitId) -> f64 {
        ratio(self.combined.get(unit_id).copied().unwrap_or(0.0), self.max_combined)
    }

    fn category_share(&self, unit_id: &ProcessingUnitId, category: &str) -> f64 {
        let score = self
            .per_category
            .get(unit_id)
            .and_then(|scores| scores.get(category))
            .copied()
            .unwrap_or(0.0);
        ratio(score, self.max_per_category.get(category).copied().unwrap_or(0.0))
    }
}

fn ratio(value: f64, max: f64) -> f64 {
    if max <= 0.0 || !max.is_finite() {
        return 0.0;
    }
    value / max
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{SelectionEngine, SelectionLimits, SelectionRequest};
    use crate::catalog::{CatalogStore, InMemoryCatalogStore};
    use crate::domain::category::{CachedScore, CategoryRules, RuleSet};
    use crate::domain::laptop::{Laptop, LaptopId};
    use crate::domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
    use crate::errors::{ApplicationError, DomainError};

    struct Catalog {
        store: Arc<InMemoryCatalogStore>,
    }

    impl Catalog {
        async fn new(categories: &[&str]) -> Self {
            let store = Arc::new(InMemoryCatalogStore::default());
            let rules = categories
                .iter()
                .flat_map(|category| {
                    PuType::ALL.into_iter().map(move |pu_type| CategoryRules {
                        category: category.to_string(),
                        pu_type,
                        rule_set: RuleSet::default(),
                    })
                })
                .collect();
            store.replace_category_rules(rules).await.expect("rules");
            Self { store }
        }

        async fn unit(
            &self,
            pu_type: PuType,
            name: &str,
            scores: &[(&str, f64)],
        ) -> ProcessingUnitId {
            let unit = ProcessingUnit::new(pu_type, name);
            self.store.insert_processing_unit(unit.clone()).await.expect("unit");
            let rows = scores
                .iter()
                .map(|(category, score)| CachedScore {
                    processing_unit_id: unit.id.clone(),
                    pu_type,
                    category: category.to_string(),
                    score: *score,
                    updated_at: Utc::now(),
                })
                .collect();
            self.store.upsert_cached_scores(pu_type, &unit.id, rows).await.expect("scores");
            unit.id
        }

        async fn laptop(
            &self,
            name: &str,
            price: i64,
            cpu: &ProcessingUnitId,
            gpu: &ProcessingUnitId,
        ) {
            self.store
                .save_laptop(Laptop {
                    id: LaptopId::generate(),
                    name: name.to_string(),
                    price: Decimal::from(price),
                    cpu_id: cpu.clone(),
                    gpu_id: gpu.clone(),
                    url: None,
                    image_urls: Vec::new(),
                    ram_gigabytes: None,
                    weight_grams: None,
                    created_at: Utc::now(),
                })
                .await
                .expect("laptop");
        }

        fn engine(&self) -> SelectionEngine {
            SelectionEngine::new(self.store.clone(), SelectionLimits::default())
        }
    }

    fn request(scores: &[(&str, f64)]) -> SelectionRequest {
        SelectionRequest {
            category_scores: scores
                .iter()
                .map(|(category, weight)| (category.to_string(), *weight))
                .collect::<BTreeMap<_, _>>(),
            max_price: None,
            amount: None,
        }
    }

    #[tokio::test]
    async fn stronger_cpu_ranks_first_when_gpu_is_shared() {
        let catalog = Catalog::new(&["dev"]).await;
        let strong = catalog.unit(PuType::Cpu, "i9", &[("dev", 0.8)]).await;
        let weak = catalog.unit(PuType::Cpu, "i3", &[("dev", 0.2)]).await;
        let gpu = catalog.unit(PuType::Gpu, "RTX 3060", &[("dev", 0.5)]).await;
        catalog.laptop("Weak", 1_000, &weak, &gpu).await;
        catalog.laptop("Strong", 1_000, &strong, &gpu).await;

        let ranked = catalog.engine().select(&request(&[("dev", 1.0)])).await.expect("select");

        let names: Vec<&str> = ranked.iter().map(|laptop| laptop.name.as_str()).collect();
        assert_eq!(names, vec!["Strong", "Weak"]);
        assert!((ranked[0].score - 2.0).abs() < 1e-9);
        assert!((ranked[1].score - 1.25).abs() < 1e-9);
        assert_eq!(ranked[0].cpu_name, "i9");
        assert_eq!(ranked[0].gpu_name, "RTX 3060");
        assert!((ranked[1].scores_in_categories["dev"] - 62.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn equal_scores_rank_the_cheaper_laptop_first() {
        let catalog = Catalog::new(&["gaming"]).await;
        let cpu = catalog.unit(PuType::Cpu, "r7", &[("gaming", 0.4)]).await;
        let gpu = catalog.unit(PuType::Gpu, "RX 7600", &[("gaming", 0.6)]).await;
        catalog.laptop("Pricey", 1_500, &cpu, &gpu).await;
        catalog.laptop("Cheap", 1_100, &cpu, &gpu).await;

        let ranked = catalog.engine().select(&request(&[("gaming", 3.0)])).await.expect("select");
        assert_eq!(ranked[0].name, "Cheap");
        assert_eq!(ranked[1].name, "Pricey");
    }

    #[tokio::test]
    async fn price_ceiling_and_amount_bound_the_result() {
        let catalog = Catalog::new(&["office"]).await;
        let cpu = catalog.unit(PuType::Cpu, "i5", &[("office", 0.5)]).await;
        let gpu = catalog.unit(PuType::Gpu, "Iris", &[("office", 0.5)]).await;
        for (name, price) in [("A", 500), ("B", 700), ("C", 900), ("D", 2_000)] {
            catalog.laptop(name, price, &cpu, &gpu).await;
        }

        let mut within_budget = request(&[("office", 1.0)]);
        within_budget.max_price = Some(Decimal::from(900));
        within_budget.amount = Some(2);

        let ranked = catalog.engine().select(&within_budget).await.expect("select");
        let names: Vec<&str> = ranked.iter().map(|laptop| laptop.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn missing_cached_score_counts_as_zero() {
        let catalog = Catalog::new(&["dev", "gaming"]).await;
        let cpu = catalog.unit(PuType::Cpu, "i7", &[("dev", 0.9)]).await;
        let unscored_gpu = catalog.unit(PuType::Gpu, "Arc", &[]).await;
        catalog.laptop("Half scored", 999, &cpu, &unscored_gpu).await;

        let ranked = catalog
            .engine()
            .select(&request(&[("dev", 1.0), ("gaming", 1.0)]))
            .await
            .expect("select");

        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].score - 1.0).abs() < 1e-9);
        assert_eq!(ranked[0].scores_in_categories["gaming"], 0.0);
        assert!((ranked[0].scores_in_categories["dev"] - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_catalog_returns_no_laptops() {
        let catalog = Catalog::new(&["dev"]).await;
        let ranked = catalog.engine().select(&request(&[("dev", 1.0)])).await.expect("select");
        assert!(ranked.is_empty());
    }

    #[tokio::test]
    async fn rejects_unknown_category_before_ranking() {
        let catalog = Catalog::new(&["dev"]).await;
        let error = catalog
            .engine()
            .select(&request(&[("dev", 1.0), ("cooking", 1.0)]))
            .await
            .expect_err("unknown category");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::UnknownCategory("cooking".into()))
        );
    }

    #[tokio::test]
    async fn rejects_malformed_requests() {
        let catalog = Catalog::new(&["dev"]).await;
        let engine = catalog.engine();

        let mut over_limit = request(&[("dev", 1.0)]);
        over_limit.amount = Some(51);
        let mut zero_amount = request(&[("dev", 1.0)]);
        zero_amount.amount = Some(0);

        for invalid in [
            request(&[]),
            request(&[("dev", 0.0)]),
            request(&[("dev", -1.0)]),
            request(&[("dev", f64::NAN)]),
            over_limit,
            zero_amount,
        ] {
            let error = engine.select(&invalid).await.expect_err("invalid request");
            assert!(
                matches!(error, ApplicationError::Domain(DomainError::InvalidSelection(_))),
                "unexpected error {error:?}"
            );
        }
    }

    #[tokio::test]
    async fn overflowing_weight_sum_is_not_reported_as_all_zero() {
        let catalog = Catalog::new(&["dev", "gaming"]).await;
        let error = catalog
            .engine()
            .select(&request(&[("dev", 1e308), ("gaming", 1e308)]))
            .await
            .expect_err("overflowing weights");

        let ApplicationError::Domain(DomainError::InvalidSelection(reason)) = &error else {
            panic!("unexpected error {error:?}");
        };
        assert!(reason.contains("too large"), "unexpected reason `{reason}`");
        assert!(!reason.contains("zero"));
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_persistence_failure() {
        let catalog = Catalog::new(&["dev"]).await;
        catalog.store.set_unavailable(true);

        let error = catalog.engine().select(&request(&[("dev", 1.0)])).await.expect_err("outage");
        assert!(matches!(error, ApplicationError::Persistence(_)));
    }

    #[test]
    fn request_reads_front_end_field_names() {
        let parsed: SelectionRequest = serde_json::from_str(
            r#"{"categoryScores": {"dev": 2, "gaming": 1}, "maxPrice": 1500, "amount": 3}"#,
        )
        .expect("request");

        assert_eq!(parsed.category_scores["dev"], 2.0);
        assert_eq!(parsed.max_price, Some(Decimal::from(1500)));
        assert_eq!(parsed.amount, Some(3));
    }
}
