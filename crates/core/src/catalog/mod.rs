//! Catalog Store seam.
//!
//! The engine reads and writes every persisted entity through [`CatalogStore`]; it keeps no
//! copy of the catalog beyond request-scoped working sets.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::benchmark::{BenchmarkSample, GlobalBenchmarkStat};
use crate::domain::category::{CachedScore, CategoryRules, CategoryWeight};
use crate::domain::laptop::Laptop;
use crate::domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
use crate::errors::StoreError;

pub mod memory;

pub use memory::InMemoryCatalogStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_processing_unit(
        &self,
        pu_type: PuType,
        id: &ProcessingUnitId,
    ) -> Result<Option<ProcessingUnit>, StoreError>;

    async fn find_processing_unit_by_name(
        &self,
        pu_type: PuType,
        name: &str,
    ) -> Result<Option<ProcessingUnit>, StoreError>;

    async fn insert_processing_unit(&self, unit: ProcessingUnit) -> Result<(), StoreError>;

    async fn list_processing_units(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<ProcessingUnit>, StoreError>;

    /// Upserts by (pu type, unit, benchmark name).
    async fn save_sample(&self, sample: BenchmarkSample) -> Result<(), StoreError>;

    async fn find_sample(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        benchmark_name: &str,
    ) -> Result<Option<BenchmarkSample>, StoreError>;

    async fn list_samples_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<BenchmarkSample>, StoreError>;

    async fn list_samples_for_benchmark(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Vec<BenchmarkSample>, StoreError>;

    /// Sorted, de-duplicated names of every benchmark with at least one stored sample.
    async fn list_benchmark_names(&self, pu_type: PuType) -> Result<Vec<String>, StoreError>;

    async fn find_stat(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Option<GlobalBenchmarkStat>, StoreError>;

    /// Upserts by (pu type, benchmark name). Callers serialize read-modify-write cycles.
    async fn upsert_stat(&self, stat: GlobalBenchmarkStat) -> Result<(), StoreError>;

    async fn list_stats(&self, pu_type: PuType) -> Result<Vec<GlobalBenchmarkStat>, StoreError>;

    /// Makes `rules` the complete rule catalog in one write. Weights of (category, pu type)
    /// pairs and cached scores of categories that are no longer present go with it.
    async fn replace_category_rules(&self, rules: Vec<CategoryRules>) -> Result<(), StoreError>;

    async fn list_category_rules(&self) -> Result<Vec<CategoryRules>, StoreError>;

    /// Sorted, de-duplicated names of every category that has rules.
    async fn list_categories(&self) -> Result<Vec<String>, StoreError>;

    /// Replaces every weight row of one (category, pu type) pair.
    async fn replace_category_weights(
        &self,
        category: &str,
        pu_type: PuType,
        weights: Vec<CategoryWeight>,
    ) -> Result<(), StoreError>;

    async fn list_category_weights(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<CategoryWeight>, StoreError>;

    /// Upserts every given row of one unit as a single all-or-nothing write.
    async fn upsert_cached_scores(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        scores: Vec<CachedScore>,
    ) -> Result<(), StoreError>;

    async fn list_cached_scores(&self, pu_type: PuType) -> Result<Vec<CachedScore>, StoreError>;

    async fn list_cached_scores_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<CachedScore>, StoreError>;

    async fn save_laptop(&self, laptop: Laptop) -> Result<(), StoreError>;

    /// Laptops priced at or below `max_price`, or every laptop when no ceiling is given.
    async fn list_laptops(&self, max_price: Option<Decimal>) -> Result<Vec<Laptop>, StoreError>;
}
