//! Catalog ingestion and the recompute triggers it drives.
//!
//! Every batch folds its samples into the global aggregates first and only then recomputes
//! cached scores, once, from a plan that records what the batch changed:
//!
//! * a benchmark name seen for the first time re-derives the weights of its type, which
//!   invalidates every unit of that type;
//! * a raised `max_score_seen` invalidates every unit of the type in the categories that
//!   weight that benchmark;
//! * a moved running mean invalidates the units that fall back to it;
//! * a new unit needs every category, and a new sample on an existing unit needs the
//!   categories that weight it.
//!
//! A batch interrupted by a store failure can leave samples stored but not aggregated. Such a
//! type is repaired by rebuilding its aggregates from the stored samples, either when a retry
//! finds the damage or on `recompute_all`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::CatalogStore;
use crate::domain::benchmark::{BenchmarkResults, BenchmarkSample};
use crate::domain::category::CategoryRules;
use crate::domain::laptop::{Laptop, LaptopId};
use crate::domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
use crate::errors::{ApplicationError, DomainError};
use crate::scoring::{
    CategoryWeightDeriver, GlobalBenchmarkAggregator, RecomputeTargets, ScoreCacheMaintainer,
};

/// A processing unit as delivered by a loader, with its raw benchmark statistics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PuRecord {
    pub name: String,
    #[serde(default)]
    pub benchmarks: BTreeMap<String, BenchmarkResults>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaptopRecord {
    pub name: String,
    pub price: Decimal,
    pub cpu: PuRecord,
    pub gpu: PuRecord,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub ram_gigabytes: Option<u32>,
    #[serde(default)]
    pub weight_grams: Option<f64>,
}

impl LaptopRecord {
    pub fn validate(&self) -> Result<(), DomainError> {
        let invalid = |reason: &str| DomainError::InvalidLaptop {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.price.is_sign_negative() {
            return Err(invalid("price must not be negative"));
        }
        if self.cpu.name.trim().is_empty() {
            return Err(invalid("cpu name must not be empty"));
        }
        if self.gpu.name.trim().is_empty() {
            return Err(invalid("gpu name must not be empty"));
        }
        if self.weight_grams.is_some_and(|weight| !weight.is_finite() || weight < 0.0) {
            return Err(invalid("weight must be a finite non-negative number"));
        }
        for (benchmark, results) in self.cpu.benchmarks.iter().chain(&self.gpu.benchmarks) {
            validate_sample(benchmark, results)?;
        }
        Ok(())
    }
}

fn validate_sample(benchmark: &str, results: &BenchmarkResults) -> Result<(), DomainError> {
    if benchmark.trim().is_empty() {
        return Err(DomainError::InvalidSample {
            benchmark: benchmark.to_string(),
            reason: "benchmark name must not be empty".to_string(),
        });
    }
    results.validate(benchmark)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub laptops_saved: usize,
    pub units_created: usize,
    pub units_reused: usize,
    pub samples_recorded: usize,
    pub units_recomputed: usize,
    pub rederived_types: Vec<PuType>,
}

/// Which scores of one unit a batch invalidated.
#[derive(Clone, Debug, PartialEq, Eq)]
enum UnitChange {
    New,
    Samples(BTreeSet<String>),
}

#[derive(Debug, Default)]
struct RecomputePlan {
    /// Types whose aggregates must be rebuilt from stored samples before re-deriving.
    repair: BTreeSet<PuType>,
    rederive: BTreeSet<PuType>,
    raised: BTreeMap<PuType, BTreeSet<String>>,
    mean_moved: BTreeMap<PuType, BTreeSet<String>>,
    units: BTreeMap<(PuType, ProcessingUnitId), UnitChange>,
}

impl RecomputePlan {
    fn unit_created(&mut self, pu_type: PuType, unit_id: ProcessingUnitId) {
        self.units.insert((pu_type, unit_id), UnitChange::New);
    }

    fn sample_added(&mut self, pu_type: PuType, unit_id: ProcessingUnitId, name: &str) {
        let change = self
            .units
            .entry((pu_type, unit_id))
            .or_insert_with(|| UnitChange::Samples(BTreeSet::new()));
        if let UnitChange::Samples(names) = change {
            names.insert(name.to_string());
        }
    }

    fn repair(&mut self, pu_type: PuType) {
        self.repair.insert(pu_type);
        self.rederive.insert(pu_type);
    }

    fn is_empty(&self) -> bool {
        self.rederive.is_empty()
            && self.raised.is_empty()
            && self.mean_moved.is_empty()
            && self.units.is_empty()
    }
}

/// Feeds loader output into the catalog and keeps the score cache consistent with it.
pub struct CatalogIngestor {
    store: Arc<dyn CatalogStore>,
    aggregator: Arc<GlobalBenchmarkAggregator>,
    deriver: CategoryWeightDeriver,
    cache: ScoreCacheMaintainer,
    // recompute passes read a snapshot then write; serializing them keeps an older snapshot
    // from overwriting a newer pass
    passes: Mutex<()>,
}

impl CatalogIngestor {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        aggregator: Arc<GlobalBenchmarkAggregator>,
        max_concurrent_recomputes: usize,
    ) -> Self {
        Self {
            deriver: CategoryWeightDeriver::new(store.clone()),
            cache: ScoreCacheMaintainer::new(store.clone(), max_concurrent_recomputes),
            store,
            aggregator,
            passes: Mutex::new(()),
        }
    }

    /// Ingests a batch of laptops. The whole batch is validated before anything is written.
    pub async fn ingest_laptops(
        &self,
        records: Vec<LaptopRecord>,
    ) -> Result<IngestionReport, ApplicationError> {
        for record in &records {
            record.validate()?;
        }

        let mut report = IngestionReport::default();
        let mut plan = RecomputePlan::default();
        let categorized = !self.store.list_categories().await?.is_empty();
        for record in records {
            let cpu_id = self
                .resolve_unit(PuType::Cpu, &record.cpu, categorized, &mut plan, &mut report)
                .await?;
            let gpu_id = self
                .resolve_unit(PuType::Gpu, &record.gpu, categorized, &mut plan, &mut report)
                .await?;

            self.store
                .save_laptop(Laptop {
                    id: LaptopId::generate(),
                    name: record.name,
                    price: record.price,
                    cpu_id,
                    gpu_id,
                    url: record.url,
                    image_urls: record.image_urls,
                    ram_gigabytes: record.ram_gigabytes,
                    weight_grams: record.weight_grams,
                    created_at: Utc::now(),
                })
                .await?;
            report.laptops_saved += 1;
        }

        report.rederived_types = plan.rederive.iter().copied().collect();
        report.units_recomputed = self.execute(plan).await?;

        info!(
            event_name = "ingestion.laptops.completed",
            laptops_saved = report.laptops_saved,
            units_created = report.units_created,
            units_reused = report.units_reused,
            samples_recorded = report.samples_recorded,
            units_recomputed = report.units_recomputed,
            "laptop batch ingested"
        );
        Ok(report)
    }

    /// Adds one benchmark sample to an existing unit. Re-submitting a sample that is already
    /// stored with the same results is a retry and repairs the aggregates of its type.
    pub async fn ingest_sample(
        &self,
        unit_id: &ProcessingUnitId,
        pu_type: PuType,
        benchmark_name: &str,
        results: BenchmarkResults,
    ) -> Result<IngestionReport, ApplicationError> {
        validate_sample(benchmark_name, &results)?;
        if self.store.find_processing_unit(pu_type, unit_id).await?.is_none() {
            return Err(
                DomainError::UnknownProcessingUnit { pu_type, id: unit_id.0.clone() }.into()
            );
        }

        let mut report = IngestionReport::default();
        let mut plan = RecomputePlan::default();
        match self.store.find_sample(pu_type, unit_id, benchmark_name).await? {
            Some(stored) if stored.results == results => plan.repair(pu_type),
            Some(_) => {
                return Err(DomainError::InvalidSample {
                    benchmark: benchmark_name.to_string(),
                    reason: format!("already recorded for {pu_type} `{unit_id}`"),
                }
                .into());
            }
            None => {
                self.record(pu_type, unit_id, benchmark_name, results, &mut plan).await?;
                plan.sample_added(pu_type, unit_id.clone(), benchmark_name);
                report.samples_recorded = 1;
            }
        }
        report.rederived_types = plan.rederive.iter().copied().collect();
        report.units_recomputed = self.execute(plan).await?;

        info!(
            event_name = "ingestion.sample.completed",
            pu_type = %pu_type,
            unit_id = %unit_id,
            benchmark = benchmark_name,
            units_recomputed = report.units_recomputed,
            "benchmark sample ingested"
        );
        Ok(report)
    }

    /// Makes `rules` the complete rule catalog, then re-derives every weight and rebuilds the
    /// whole cache. Categories missing from `rules` stop being offered, and their weights and
    /// cached scores are dropped.
    pub async fn load_rules(&self, rules: Vec<CategoryRules>) -> Result<usize, ApplicationError> {
        let mut seen = HashSet::new();
        for category_rules in &rules {
            let invalid = |reason: &str| DomainError::InvalidRuleSet {
                category: category_rules.category.clone(),
                reason: reason.to_string(),
            };
            if category_rules.category.trim().is_empty() {
                return Err(invalid("category name must not be empty").into());
            }
            if !seen.insert((category_rules.category.as_str(), category_rules.pu_type)) {
                return Err(invalid("rules for the same pu type given twice").into());
            }
        }

        let rule_sets = rules.len();
        self.store.replace_category_rules(rules).await?;
        let recomputed = self.recompute_all(None).await?;

        info!(
            event_name = "ingestion.rules.loaded",
            rule_sets,
            units_recomputed = recomputed,
            "category rules loaded"
        );
        Ok(recomputed)
    }

    /// Rebuilds the aggregates from stored samples, re-derives weights and rebuilds every
    /// cached score of one type, or of both.
    pub async fn recompute_all(&self, pu_type: Option<PuType>) -> Result<usize, ApplicationError> {
        let _pass = self.passes.lock().await;
        let types = match pu_type {
            Some(pu_type) => vec![pu_type],
            None => PuType::ALL.to_vec(),
        };

        let mut recomputed = 0;
        for pu_type in types {
            self.aggregator.rebuild(pu_type).await?;
            self.deriver.rederive(pu_type).await?;
            recomputed += self.cache.recompute_all(pu_type).await?;
        }
        Ok(recomputed)
    }

    async fn resolve_unit(
        &self,
        pu_type: PuType,
        record: &PuRecord,
        categorized: bool,
        plan: &mut RecomputePlan,
        report: &mut IngestionReport,
    ) -> Result<ProcessingUnitId, ApplicationError> {
        let existing = self.store.find_processing_unit_by_name(pu_type, &record.name).await?;
        if let Some(existing) = existing {
            report.units_reused += 1;
            // every unit that finished ingestion has a row per known category
            if categorized
                && !plan.repair.contains(&pu_type)
                && self.store.list_cached_scores_for_unit(pu_type, &existing.id).await?.is_empty()
            {
                warn!(
                    event_name = "ingestion.unit.unfinished",
                    pu_type = %pu_type,
                    unit_id = %existing.id,
                    "reused unit has no cached scores; repairing its type"
                );
                plan.repair(pu_type);
            }
            return Ok(existing.id);
        }

        let unit = ProcessingUnit::new(pu_type, record.name.clone());
        self.store.insert_processing_unit(unit.clone()).await?;
        for (benchmark_name, results) in &record.benchmarks {
            self.record(pu_type, &unit.id, benchmark_name, *results, plan).await?;
            report.samples_recorded += 1;
        }
        plan.unit_created(pu_type, unit.id.clone());
        report.units_created += 1;
        Ok(unit.id)
    }

    async fn record(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        benchmark_name: &str,
        results: BenchmarkResults,
        plan: &mut RecomputePlan,
    ) -> Result<(), ApplicationError> {
        let outcome = self
            .aggregator
            .record_sample(BenchmarkSample {
                name: benchmark_name.to_string(),
                processing_unit_id: unit_id.clone(),
                pu_type,
                results,
            })
            .await?;

        if outcome.first_for_name {
            plan.rederive.insert(pu_type);
        } else if outcome.max_raised {
            plan.raised.entry(pu_type).or_default().insert(benchmark_name.to_string());
        } else {
            plan.mean_moved.entry(pu_type).or_default().insert(benchmark_name.to_string());
        }
        Ok(())
    }

    async fn execute(&self, mut plan: RecomputePlan) -> Result<usize, ApplicationError> {
        if plan.is_empty() {
            return Ok(0);
        }
        let _pass = self.passes.lock().await;

        let mut recomputed = 0;
        for pu_type in PuType::ALL {
            if plan.repair.contains(&pu_type) {
                self.aggregator.rebuild(pu_type).await?;
            }
            if plan.rederive.contains(&pu_type) {
                self.deriver.rederive(pu_type).await?;
                recomputed += self.cache.recompute_all(pu_type).await?;
                continue;
            }

            let snapshot = self.cache.snapshot(pu_type).await?;
            let mut targets: BTreeMap<ProcessingUnitId, RecomputeTargets> = BTreeMap::new();
            let mut target = |unit_id: ProcessingUnitId, categories: RecomputeTargets| {
                targets
                    .entry(unit_id)
                    .and_modify(|current| current.merge(categories.clone()))
                    .or_insert(categories);
            };

            let raised = plan.raised.remove(&pu_type).unwrap_or_default();
            let mean_moved = plan.mean_moved.remove(&pu_type).unwrap_or_default();
            let needs_units = !raised.is_empty() || !mean_moved.is_empty();
            let units = if needs_units {
                self.store.list_processing_units(pu_type).await?
            } else {
                Vec::new()
            };

            let bulk_categories = snapshot.categories_weighting(&raised);
            if !bulk_categories.is_empty() {
                for unit in &units {
                    target(unit.id.clone(), RecomputeTargets::Only(bulk_categories.clone()));
                }
            }

            for benchmark_name in mean_moved.difference(&raised) {
                let categories = snapshot.categories_weighting([benchmark_name]);
                if categories.is_empty() {
                    continue;
                }
                let measured: HashSet<ProcessingUnitId> = self
                    .store
                    .list_samples_for_benchmark(pu_type, benchmark_name)
                    .await?
                    .into_iter()
                    .map(|sample| sample.processing_unit_id)
                    .collect();
                for unit in units.iter().filter(|unit| !measured.contains(&unit.id)) {
                    target(unit.id.clone(), RecomputeTargets::Only(categories.clone()));
                }
            }

            let changed_units: Vec<(ProcessingUnitId, UnitChange)> = plan
                .units
                .iter()
                .filter(|((unit_type, _), _)| *unit_type == pu_type)
                .map(|((_, unit_id), change)| (unit_id.clone(), change.clone()))
                .collect();
            for (unit_id, change) in changed_units {
                match change {
                    UnitChange::New => target(unit_id, RecomputeTargets::All),
                    UnitChange::Samples(names) => {
                        let categories = snapshot.categories_weighting(&names);
                        if !categories.is_empty() {
                            target(unit_id, RecomputeTargets::Only(categories));
                        }
                    }
                }
            }

            recomputed += self.cache.recompute_units(Arc::new(snapshot), pu_type, targets).await?;
        }
        Ok(recomputed)
    }
}
