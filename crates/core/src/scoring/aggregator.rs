use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::catalog::CatalogStore;
use crate::domain::benchmark::{BenchmarkSample, GlobalBenchmarkStat};
use crate::domain::processing_unit::{ProcessingUnitId, PuType};
use crate::errors::{ApplicationError, DomainError};

/// What one recorded sample did to its global aggregate.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleOutcome {
    /// Normalized score of the recorded sample against the updated aggregate.
    pub normalized_score: f64,
    pub stat: GlobalBenchmarkStat,
    /// No aggregate existed for this (name, type) before this sample.
    pub first_for_name: bool,
    pub max_raised: bool,
}

/// Maintains the running (max, sum, count) aggregate per benchmark name and unit type.
///
/// Read-modify-write of one aggregate row happens under a lock keyed by
/// (pu type, benchmark name), so concurrent samples for the same benchmark never lose an
/// update while samples for different benchmarks proceed in parallel.
pub struct GlobalBenchmarkAggregator {
    store: Arc<dyn CatalogStore>,
    locks: StdMutex<HashMap<(PuType, String), Arc<Mutex<()>>>>,
}

impl GlobalBenchmarkAggregator {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store, locks: StdMutex::new(HashMap::new()) }
    }

    fn lock_for(&self, pu_type: PuType, benchmark_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry((pu_type, benchmark_name.to_string())).or_default().clone()
    }

    /// Stores a unit's sample and folds its average into the aggregate of its name and type.
    ///
    /// Both writes happen under the aggregate's lock, so a concurrent
    /// [`rebuild`](Self::rebuild) never counts a sample twice or misses it.
    pub async fn record_sample(
        &self,
        sample: BenchmarkSample,
    ) -> Result<SampleOutcome, ApplicationError> {
        validate_average(&sample.name, sample.average())?;
        let lock = self.lock_for(sample.pu_type, &sample.name);
        let _guard = lock.lock().await;

        let (benchmark_name, pu_type, average) =
            (sample.name.clone(), sample.pu_type, sample.average());
        self.store.save_sample(sample).await?;
        self.fold(&benchmark_name, pu_type, average).await
    }

    /// Recomputes every aggregate of `pu_type` from the stored samples and writes the ones that
    /// drifted, such as a sample whose aggregate write failed. Returns the repaired names.
    pub async fn rebuild(&self, pu_type: PuType) -> Result<Vec<String>, ApplicationError> {
        let mut repaired = Vec::new();
        for benchmark_name in self.store.list_benchmark_names(pu_type).await? {
            let lock = self.lock_for(pu_type, &benchmark_name);
            let _guard = lock.lock().await;

            let samples = self.store.list_samples_for_benchmark(pu_type, &benchmark_name).await?;
            let mut averages = samples.iter().map(BenchmarkSample::average);
            let Some(first) = averages.next() else {
                continue;
            };
            let mut rebuilt = GlobalBenchmarkStat::first(benchmark_name.as_str(), pu_type, first);
            for average in averages {
                rebuilt.record(average);
            }

            let current = self.store.find_stat(pu_type, &benchmark_name).await?;
            if current.as_ref().is_some_and(|stat| same_aggregate(stat, &rebuilt)) {
                continue;
            }
            warn!(
                event_name = "scoring.aggregate.repaired",
                pu_type = %pu_type,
                benchmark = benchmark_name.as_str(),
                stored_count = current.as_ref().map(|stat| stat.count_of_samples),
                count_of_samples = rebuilt.count_of_samples,
                max_score_seen = rebuilt.max_score_seen,
                "global aggregate disagreed with stored samples"
            );
            self.store.upsert_stat(rebuilt).await?;
            repaired.push(benchmark_name);
        }
        Ok(repaired)
    }

    /// Caller holds the lock of (pu type, benchmark name).
    async fn fold(
        &self,
        benchmark_name: &str,
        pu_type: PuType,
        average: f64,
    ) -> Result<SampleOutcome, ApplicationError> {
        let outcome = match self.store.find_stat(pu_type, benchmark_name).await? {
            None => {
                let stat = GlobalBenchmarkStat::first(benchmark_name, pu_type, average);
                self.store.upsert_stat(stat.clone()).await?;
                // the first sample is trivially the best seen, unless it is degenerate
                let normalized_score = if average > 0.0 { 1.0 } else { 0.0 };
                SampleOutcome { normalized_score, stat, first_for_name: true, max_raised: true }
            }
            Some(mut stat) => {
                let max_raised = stat.record(average);
                self.store.upsert_stat(stat.clone()).await?;
                SampleOutcome {
                    normalized_score: stat.normalize(average),
                    stat,
                    first_for_name: false,
                    max_raised,
                }
            }
        };

        debug!(
            event_name = "scoring.aggregate.recorded",
            pu_type = %pu_type,
            benchmark = benchmark_name,
            average,
            max_score_seen = outcome.stat.max_score_seen,
            count_of_samples = outcome.stat.count_of_samples,
            first_for_name = outcome.first_for_name,
            max_raised = outcome.max_raised,
            "benchmark sample folded into global aggregate"
        );
        Ok(outcome)
    }

    /// Normalized score of one unit in one benchmark. Units without a sample get the running
    /// mean; benchmarks without an aggregate score 0.
    pub async fn normalized_score_for(
        &self,
        benchmark_name: &str,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<f64, ApplicationError> {
        let Some(stat) = self.store.find_stat(pu_type, benchmark_name).await? else {
            return Ok(0.0);
        };
        let sample = self.store.find_sample(pu_type, unit_id, benchmark_name).await?;
        Ok(stat.normalized_score(sample.map(|sample| sample.average())))
    }
}

fn validate_average(benchmark_name: &str, average: f64) -> Result<(), DomainError> {
    if !average.is_finite() || average < 0.0 {
        return Err(DomainError::InvalidSample {
            benchmark: benchmark_name.to_string(),
            reason: "average must be a finite non-negative number".to_string(),
        });
    }
    Ok(())
}

/// Sums are compared with a relative tolerance since folding order changes the rounding.
fn same_aggregate(stored: &GlobalBenchmarkStat, rebuilt: &GlobalBenchmarkStat) -> bool {
    let tolerance = 1e-9 * rebuilt.sum_of_averages.abs().max(1.0);
    stored.count_of_samples == rebuilt.count_of_samples
        && stored.max_score_seen == rebuilt.max_score_seen
        && (stored.sum_of_averages - rebuilt.sum_of_averages).abs() <= tolerance
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::task::JoinSet;

    use super::GlobalBenchmarkAggregator;
    use crate::catalog::{CatalogStore, InMemoryCatalogStore};
    use crate::domain::benchmark::{BenchmarkResults, BenchmarkSample};
    use crate::domain::processing_unit::{ProcessingUnitId, PuType};

    fn aggregator() -> (Arc<InMemoryCatalogStore>, GlobalBenchmarkAggregator) {
        let store = Arc::new(InMemoryCatalogStore::default());
        (store.clone(), GlobalBenchmarkAggregator::new(store))
    }

    fn sample(name: &str, pu_type: PuType, unit: &str, average: f64) -> BenchmarkSample {
        BenchmarkSample {
            name: name.to_string(),
            processing_unit_id: ProcessingUnitId(unit.to_string()),
            pu_type,
            results: BenchmarkResults { min: average, max: average, median: average, average },
        }
    }

    #[tokio::test]
    async fn first_sample_is_best_and_later_samples_normalize_against_max() {
        let (store, aggregator) = aggregator();

        let first = aggregator
            .record_sample(sample("cinebench", PuType::Cpu, "i7", 100.0))
            .await
            .expect("first");
        assert_eq!(first.normalized_score, 1.0);
        assert!(first.first_for_name);

        let second = aggregator
            .record_sample(sample("cinebench", PuType::Cpu, "i5", 50.0))
            .await
            .expect("second");
        assert_eq!(second.stat.max_score_seen, 100.0);
        assert!((second.normalized_score - 0.5).abs() < 1e-9);
        assert!(!second.first_for_name);
        assert!(!second.max_raised);

        let stored =
            store.list_samples_for_benchmark(PuType::Cpu, "cinebench").await.expect("list");
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn raising_the_max_is_reported() {
        let (_, aggregator) = aggregator();
        aggregator
            .record_sample(sample("cinebench", PuType::Cpu, "i5", 50.0))
            .await
            .expect("first");

        let raised = aggregator
            .record_sample(sample("cinebench", PuType::Cpu, "i9", 200.0))
            .await
            .expect("raise");
        assert!(raised.max_raised);
        assert_eq!(raised.normalized_score, 1.0);
        assert_eq!(raised.stat.sum_of_averages, 250.0);
    }

    #[tokio::test]
    async fn same_name_on_other_type_is_a_separate_aggregate() {
        let (store, aggregator) = aggregator();
        aggregator.record_sample(sample("fp32", PuType::Cpu, "i7", 10.0)).await.expect("cpu");
        let gpu = aggregator
            .record_sample(sample("fp32", PuType::Gpu, "RTX 4070", 1_000.0))
            .await
            .expect("gpu");

        assert!(gpu.first_for_name);
        let cpu_stat = store.find_stat(PuType::Cpu, "fp32").await.expect("find").expect("stat");
        assert_eq!(cpu_stat.max_score_seen, 10.0);
    }

    #[tokio::test]
    async fn rejects_invalid_averages() {
        let (store, aggregator) = aggregator();
        for average in [f64::NAN, -3.0] {
            let outcome = aggregator.record_sample(sample("bad", PuType::Cpu, "i7", average)).await;
            assert!(outcome.is_err());
        }
        assert_eq!(store.find_stat(PuType::Cpu, "bad").await.expect("find"), None);
        assert!(store.list_benchmark_names(PuType::Cpu).await.expect("names").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_samples_for_one_benchmark_lose_no_update() {
        let (store, aggregator) = aggregator();
        let aggregator = Arc::new(aggregator);

        let mut tasks = JoinSet::new();
        for value in 1..=64u32 {
            let aggregator = aggregator.clone();
            tasks.spawn(async move {
                let unit = format!("cpu-{value}");
                aggregator
                    .record_sample(sample("geekbench", PuType::Cpu, &unit, f64::from(value)))
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task panicked").expect("record sample");
        }

        let stat = store.find_stat(PuType::Cpu, "geekbench").await.expect("find").expect("stat");
        assert_eq!(stat.count_of_samples, 64);
        assert_eq!(stat.max_score_seen, 64.0);
        assert_eq!(stat.sum_of_averages, f64::from(64 * 65 / 2));
    }

    #[tokio::test]
    async fn unmeasured_unit_falls_back_to_running_mean() {
        let (_, aggregator) = aggregator();
        let measured = ProcessingUnitId("gpu-measured".to_string());
        let unmeasured = ProcessingUnitId("gpu-unmeasured".to_string());

        for (unit, average) in [("gpu-measured", 100.0), ("gpu-other", 50.0)] {
            aggregator
                .record_sample(sample("timespy", PuType::Gpu, unit, average))
                .await
                .expect("record");
        }

        let fallback = aggregator
            .normalized_score_for("timespy", PuType::Gpu, &unmeasured)
            .await
            .expect("fallback");
        assert!((fallback - 0.75).abs() < 1e-9);

        let own = aggregator
            .normalized_score_for("timespy", PuType::Gpu, &measured)
            .await
            .expect("own");
        assert_eq!(own, 1.0);

        let unknown = aggregator
            .normalized_score_for("never-seen", PuType::Gpu, &measured)
            .await
            .expect("unknown");
        assert_eq!(unknown, 0.0);
    }

    #[tokio::test]
    async fn failed_aggregate_write_is_repaired_from_stored_samples() {
        let (store, aggregator) = aggregator();
        aggregator.record_sample(sample("timespy", PuType::Gpu, "slow", 50.0)).await.expect("slow");

        store.fail_stat_reads(1);
        aggregator
            .record_sample(sample("timespy", PuType::Gpu, "fast", 200.0))
            .await
            .expect_err("aggregate lookup fails");
        let stale = store.find_stat(PuType::Gpu, "timespy").await.expect("find").expect("stat");
        assert_eq!(stale.count_of_samples, 1);
        assert_eq!(stale.max_score_seen, 50.0);

        let repaired = aggregator.rebuild(PuType::Gpu).await.expect("rebuild");
        assert_eq!(repaired, vec!["timespy"]);
        let stat = store.find_stat(PuType::Gpu, "timespy").await.expect("find").expect("stat");
        assert_eq!(stat.count_of_samples, 2);
        assert_eq!(stat.max_score_seen, 200.0);
        assert_eq!(stat.sum_of_averages, 250.0);

        assert!(aggregator.rebuild(PuType::Gpu).await.expect("second rebuild").is_empty());
    }
}
