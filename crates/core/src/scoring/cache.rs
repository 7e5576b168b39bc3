use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::catalog::CatalogStore;
use crate::domain::benchmark::GlobalBenchmarkStat;
use crate::domain::category::CachedScore;
use crate::domain::processing_unit::{ProcessingUnitId, PuType};
use crate::errors::ApplicationError;

pub const DEFAULT_MAX_CONCURRENT_RECOMPUTES: usize = 16;

/// Which categories of one unit need a fresh cached score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecomputeTargets {
    All,
    Only(BTreeSet<String>),
}

impl RecomputeTargets {
    pub fn merge(&mut self, other: RecomputeTargets) {
        match (self, other) {
            (Self::All, _) => {}
            (this, Self::All) => *this = Self::All,
            (Self::Only(current), Self::Only(more)) => current.extend(more),
        }
    }

    fn includes(&self, category: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(categories) => categories.contains(category),
        }
    }
}

/// Aggregates and weights of one pu type, read once per recompute pass.
///
/// Units within a pass have no dependency on each other once this is fixed.
#[derive(Clone, Debug, Default)]
pub struct ScoringSnapshot {
    stats: HashMap<String, GlobalBenchmarkStat>,
    weights: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ScoringSnapshot {
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Categories that give a positive weight to at least one of `benchmark_names`.
    pub fn categories_weighting<'a>(
        &self,
        benchmark_names: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let names: Vec<&String> = benchmark_names.into_iter().collect();
        self.weights
            .iter()
            .filter(|(_, weights)| {
                names.iter().any(|name| weights.get(*name).is_some_and(|weight| *weight > 0.0))
            })
            .map(|(category, _)| category.clone())
            .collect()
    }

    /// `Σ weight × normalized score` for one category, given the unit's own sample averages.
    pub fn score(&self, category: &str, sample_averages: &HashMap<String, f64>) -> f64 {
        let Some(weights) = self.weights.get(category) else {
            return 0.0;
        };
        weights
            .iter()
            .map(|(benchmark_name, weight)| {
                let normalized = self.stats.get(benchmark_name).map_or(0.0, |stat| {
                    stat.normalized_score(sample_averages.get(benchmark_name).copied())
                });
                weight * normalized
            })
            .sum()
    }
}

/// Keeps `CachedScore` rows equal to the weighted sum of normalized benchmark scores.
pub struct ScoreCacheMaintainer {
    store: Arc<dyn CatalogStore>,
    max_concurrent: usize,
}

impl ScoreCacheMaintainer {
    pub fn new(store: Arc<dyn CatalogStore>, max_concurrent: usize) -> Self {
        Self { store, max_concurrent: max_concurrent.max(1) }
    }

    pub async fn snapshot(&self, pu_type: PuType) -> Result<ScoringSnapshot, ApplicationError> {
        let stats = self
            .store
            .list_stats(pu_type)
            .await?
            .into_iter()
            .map(|stat| (stat.name.clone(), stat))
            .collect();

        // categories without weight rows still get a (zero) cached score
        let mut weights: BTreeMap<String, BTreeMap<String, f64>> = self
            .store
            .list_categories()
            .await?
            .into_iter()
            .map(|category| (category, BTreeMap::new()))
            .collect();
        for row in self.store.list_category_weights(pu_type).await? {
            weights.entry(row.category).or_default().insert(row.benchmark_name, row.weight);
        }

        Ok(ScoringSnapshot { stats, weights })
    }

    /// Recomputes one unit, either in every category or only in `touched_categories`.
    pub async fn recompute_scores(
        &self,
        unit_id: &ProcessingUnitId,
        pu_type: PuType,
        touched_categories: Option<&BTreeSet<String>>,
    ) -> Result<Vec<CachedScore>, ApplicationError> {
        let snapshot = self.snapshot(pu_type).await?;
        let targets = match touched_categories {
            Some(categories) => RecomputeTargets::Only(categories.clone()),
            None => RecomputeTargets::All,
        };
        recompute_unit(self.store.as_ref(), &snapshot, pu_type, unit_id.clone(), &targets).await
    }

    /// Every unit of `pu_type` in every category.
    pub async fn recompute_all(&self, pu_type: PuType) -> Result<usize, ApplicationError> {
        let snapshot = self.snapshot(pu_type).await?;
        let targets = self
            .store
            .list_processing_units(pu_type)
            .await?
            .into_iter()
            .map(|unit| (unit.id, RecomputeTargets::All))
            .collect();
        self.recompute_units(Arc::new(snapshot), pu_type, targets).await
    }

    /// Bulk path: recomputes many units concurrently against one shared snapshot.
    ///
    /// A unit's rows are written in one store call, so an interrupted pass leaves each unit
    /// either fully updated or untouched. Returns the number of units written.
    pub async fn recompute_units(
        &self,
        snapshot: Arc<ScoringSnapshot>,
        pu_type: PuType,
        targets: BTreeMap<ProcessingUnitId, RecomputeTargets>,
    ) -> Result<usize, ApplicationError> {
        if targets.is_empty() {
            return Ok(0);
        }

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for (unit_id, unit_targets) in targets {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|error| ApplicationError::Task(error.to_string()))?;
            let store = self.store.clone();
            let snapshot = snapshot.clone();
            tasks.spawn(async move {
                let _permit = permit;
                recompute_unit(store.as_ref(), &snapshot, pu_type, unit_id, &unit_targets).await
            });
        }

        let mut written = 0;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|error| ApplicationError::Task(error.to_string()))?;
            if let Err(error) = result {
                tasks.abort_all();
                return Err(error);
            }
            written += 1;
        }

        info!(
            event_name = "scoring.cache.bulk_recomputed",
            pu_type = %pu_type,
            units = written,
            "cached scores recomputed"
        );
        Ok(written)
    }
}

async fn recompute_unit(
    store: &dyn CatalogStore,
    snapshot: &ScoringSnapshot,
    pu_type: PuType,
    unit_id: ProcessingUnitId,
    targets: &RecomputeTargets,
) -> Result<Vec<CachedScore>, ApplicationError> {
    let sample_averages: HashMap<String, f64> = store
        .list_samples_for_unit(pu_type, &unit_id)
        .await?
        .into_iter()
        .map(|sample| (sample.name.clone(), sample.average()))
        .collect();

    let updated_at = Utc::now();
    let scores: Vec<CachedScore> = snapshot
        .categories()
        .filter(|category| targets.includes(category))
        .map(|category| CachedScore {
            processing_unit_id: unit_id.clone(),
            pu_type,
            category: category.to_string(),
            score: snapshot.score(category, &sample_averages),
            updated_at,
        })
        .collect();

    if !scores.is_empty() {
        store.upsert_cached_scores(pu_type, &unit_id, scores.clone()).await?;
    }
    debug!(
        event_name = "scoring.cache.unit_recomputed",
        pu_type = %pu_type,
        unit_id = %unit_id,
        categories = scores.len(),
        "unit cached scores written"
    );
    Ok(scores)
}
