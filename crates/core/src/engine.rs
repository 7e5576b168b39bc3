use std::sync::Arc;

use crate::catalog::CatalogStore;
use crate::config::AppConfig;
use crate::ingestion::CatalogIngestor;
use crate::scoring::GlobalBenchmarkAggregator;
use crate::selection::{SelectionEngine, SelectionLimits};

/// Ingestion and selection wired over one shared store. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn CatalogStore>,
    pub ingestor: Arc<CatalogIngestor>,
    pub selection: Arc<SelectionEngine>,
}

impl Engine {
    pub fn from_config(store: Arc<dyn CatalogStore>, config: &AppConfig) -> Self {
        Self::new(store, config.selection.limits(), config.scoring.max_concurrent_recomputes)
    }

    pub fn new(
        store: Arc<dyn CatalogStore>,
        limits: SelectionLimits,
        max_concurrent_recomputes: usize,
    ) -> Self {
        let aggregator = Arc::new(GlobalBenchmarkAggregator::new(store.clone()));
        Self {
            ingestor: Arc::new(CatalogIngestor::new(
                store.clone(),
                aggregator,
                max_concurrent_recomputes,
            )),
            selection: Arc::new(SelectionEngine::new(store.clone(), limits)),
            store,
        }
    }
}
