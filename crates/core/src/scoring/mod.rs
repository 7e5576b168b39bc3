//! Benchmark normalization, category weights and the per-unit score cache.

pub mod aggregator;
pub mod cache;
pub mod weights;

pub use aggregator::{GlobalBenchmarkAggregator, SampleOutcome};
pub use cache::{RecomputeTargets, ScoreCacheMaintainer, ScoringSnapshot};
pub use weights::{derive_weights, CategoryWeightDeriver};
