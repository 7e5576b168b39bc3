pub mod catalog;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod ingestion;
pub mod scoring;
pub mod selection;

pub use catalog::{CatalogStore, InMemoryCatalogStore};
pub use domain::benchmark::{BenchmarkResults, BenchmarkSample, GlobalBenchmarkStat};
pub use domain::category::{CachedScore, CategoryRules, CategoryWeight, RuleSet};
pub use domain::laptop::{Laptop, LaptopId};
pub use domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
pub use engine::Engine;
pub use errors::{ApplicationError, DomainError, InterfaceError, StoreError};
pub use ingestion::{CatalogIngestor, IngestionReport, LaptopRecord, PuRecord};
pub use scoring::{CategoryWeightDeriver, GlobalBenchmarkAggregator, ScoreCacheMaintainer};
pub use selection::{RankedLaptop, SelectionEngine, SelectionLimits, SelectionRequest, TopK};
