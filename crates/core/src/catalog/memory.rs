use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::benchmark::{BenchmarkSample, GlobalBenchmarkStat};
use crate::domain::category::{CachedScore, CategoryRules, CategoryWeight};
use crate::domain::laptop::Laptop;
use crate::domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
use crate::errors::StoreError;

use super::CatalogStore;

type UnitKey = (PuType, String);
type SampleKey = (PuType, String, String);

/// Process-local catalog store. Backs tests and embedders that do not need persistence.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    units: RwLock<HashMap<UnitKey, ProcessingUnit>>,
    samples: RwLock<HashMap<SampleKey, BenchmarkSample>>,
    stats: RwLock<HashMap<UnitKey, GlobalBenchmarkStat>>,
    rules: RwLock<BTreeMap<(String, PuType), CategoryRules>>,
    weights: RwLock<HashMap<(String, PuType), Vec<CategoryWeight>>>,
    cached_scores: RwLock<HashMap<SampleKey, CachedScore>>,
    laptops: RwLock<Vec<Laptop>>,
    unavailable: AtomicBool,
    failing_stat_reads: AtomicUsize,
}

impl InMemoryCatalogStore {
    /// Makes every subsequent call fail as if the backing store were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` aggregate lookups fail while everything else keeps working.
    pub fn fail_stat_reads(&self, count: usize) {
        self.failing_stat_reads.store(count, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn find_processing_unit(
        &self,
        pu_type: PuType,
        id: &ProcessingUnitId,
    ) -> Result<Option<ProcessingUnit>, StoreError> {
        self.ensure_available()?;
        let units = self.units.read().await;
        Ok(units.get(&(pu_type, id.0.clone())).cloned())
    }

    async fn find_processing_unit_by_name(
        &self,
        pu_type: PuType,
        name: &str,
    ) -> Result<Option<ProcessingUnit>, StoreError> {
        self.ensure_available()?;
        let units = self.units.read().await;
        Ok(units.values().find(|unit| unit.pu_type == pu_type && unit.name == name).cloned())
    }

    async fn insert_processing_unit(&self, unit: ProcessingUnit) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut units = self.units.write().await;
        units.insert((unit.pu_type, unit.id.0.clone()), unit);
        Ok(())
    }

    async fn list_processing_units(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<ProcessingUnit>, StoreError> {
        self.ensure_available()?;
        let units = self.units.read().await;
        let mut found: Vec<ProcessingUnit> =
            units.values().filter(|unit| unit.pu_type == pu_type).cloned().collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn save_sample(&self, sample: BenchmarkSample) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut samples = self.samples.write().await;
        let key = (sample.pu_type, sample.processing_unit_id.0.clone(), sample.name.clone());
        samples.insert(key, sample);
        Ok(())
    }

    async fn find_sample(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        benchmark_name: &str,
    ) -> Result<Option<BenchmarkSample>, StoreError> {
        self.ensure_available()?;
        let samples = self.samples.read().await;
        Ok(samples.get(&(pu_type, unit_id.0.clone(), benchmark_name.to_string())).cloned())
    }

    async fn list_samples_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<BenchmarkSample>, StoreError> {
        self.ensure_available()?;
        let samples = self.samples.read().await;
        let mut found: Vec<BenchmarkSample> = samples
            .values()
            .filter(|sample| sample.pu_type == pu_type && &sample.processing_unit_id == unit_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn list_samples_for_benchmark(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Vec<BenchmarkSample>, StoreError> {
        self.ensure_available()?;
        let samples = self.samples.read().await;
        let mut found: Vec<BenchmarkSample> = samples
            .values()
            .filter(|sample| sample.pu_type == pu_type && sample.name == benchmark_name)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.processing_unit_id.cmp(&b.processing_unit_id));
        Ok(found)
    }

    async fn list_benchmark_names(&self, pu_type: PuType) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let samples = self.samples.read().await;
        let names: BTreeSet<String> = samples
            .values()
            .filter(|sample| sample.pu_type == pu_type)
            .map(|sample| sample.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn find_stat(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Option<GlobalBenchmarkStat>, StoreError> {
        self.ensure_available()?;
        let injected = self
            .failing_stat_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::Unavailable("aggregate lookup failed".to_string()));
        }
        let stats = self.stats.read().await;
        Ok(stats.get(&(pu_type, benchmark_name.to_string())).cloned())
    }

    async fn upsert_stat(&self, stat: GlobalBenchmarkStat) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut stats = self.stats.write().await;
        stats.insert((stat.pu_type, stat.name.clone()), stat);
        Ok(())
    }

    async fn list_stats(&self, pu_type: PuType) -> Result<Vec<GlobalBenchmarkStat>, StoreError> {
        self.ensure_available()?;
        let stats = self.stats.read().await;
        let mut found: Vec<GlobalBenchmarkStat> =
            stats.values().filter(|stat| stat.pu_type == pu_type).cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn replace_category_rules(&self, rules: Vec<CategoryRules>) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut stored = self.rules.write().await;
        let mut weights = self.weights.write().await;
        let mut cached_scores = self.cached_scores.write().await;

        *stored = rules
            .into_iter()
            .map(|rules| ((rules.category.clone(), rules.pu_type), rules))
            .collect();
        weights.retain(|key, _| stored.contains_key(key));
        let categories: BTreeSet<&str> =
            stored.keys().map(|(category, _)| category.as_str()).collect();
        cached_scores.retain(|_, score| categories.contains(score.category.as_str()));
        Ok(())
    }

    async fn list_category_rules(&self) -> Result<Vec<CategoryRules>, StoreError> {
        self.ensure_available()?;
        let stored = self.rules.read().await;
        Ok(stored.values().cloned().collect())
    }

    async fn list_categories(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let stored = self.rules.read().await;
        let names: BTreeSet<String> = stored.keys().map(|(category, _)| category.clone()).collect();
        Ok(names.into_iter().collect())
    }

    async fn replace_category_weights(
        &self,
        category: &str,
        pu_type: PuType,
        weights: Vec<CategoryWeight>,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut stored = self.weights.write().await;
        stored.insert((category.to_string(), pu_type), weights);
        Ok(())
    }

    async fn list_category_weights(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<CategoryWeight>, StoreError> {
        self.ensure_available()?;
        let stored = self.weights.read().await;
        let mut found: Vec<CategoryWeight> = stored
            .iter()
            .filter(|((_, stored_type), _)| *stored_type == pu_type)
            .flat_map(|(_, weights)| weights.iter().cloned())
            .collect();
        found.sort_by(|a, b| {
            (a.category.as_str(), a.benchmark_name.as_str())
                .cmp(&(b.category.as_str(), b.benchmark_name.as_str()))
        });
        Ok(found)
    }

    async fn upsert_cached_scores(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        scores: Vec<CachedScore>,
    ) -> Result<(), StoreError> {
        self.ensure_available()?;
        // single write guard, so readers see all of a unit's rows or none of them
        let mut cached = self.cached_scores.write().await;
        for score in scores {
            cached.insert((pu_type, unit_id.0.clone(), score.category.clone()), score);
        }
        Ok(())
    }

    async fn list_cached_scores(&self, pu_type: PuType) -> Result<Vec<CachedScore>, StoreError> {
        self.ensure_available()?;
        let cached = self.cached_scores.read().await;
        Ok(cached.values().filter(|score| score.pu_type == pu_type).cloned().collect())
    }

    async fn list_cached_scores_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<CachedScore>, StoreError> {
        self.ensure_available()?;
        let cached = self.cached_scores.read().await;
        let mut found: Vec<CachedScore> = cached
            .values()
            .filter(|score| score.pu_type == pu_type && &score.processing_unit_id == unit_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(found)
    }

    async fn save_laptop(&self, laptop: Laptop) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut laptops = self.laptops.write().await;
        match laptops.iter_mut().find(|existing| existing.id == laptop.id) {
            Some(existing) => *existing = laptop,
            None => laptops.push(laptop),
        }
        Ok(())
    }

    async fn list_laptops(&self, max_price: Option<Decimal>) -> Result<Vec<Laptop>, StoreError> {
        self.ensure_available()?;
        let laptops = self.laptops.read().await;
        Ok(laptops.iter().filter(|laptop| laptop.within_budget(max_price)).cloned().collect())
    }
}
