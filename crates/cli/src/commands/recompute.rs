use lapsel_core::domain::processing_unit::PuType;

use crate::commands::{engine_failure, with_engine, CommandResult};

pub fn run(pu_type: Option<PuType>) -> CommandResult {
    with_engine("recompute", |engine| async move {
        let recomputed = engine.ingestor.recompute_all(pu_type).await.map_err(engine_failure)?;
        let scope =
            pu_type.map_or_else(|| "cpu and gpu".to_string(), |pu_type| pu_type.to_string());
        Ok(format!("re-derived weights and recomputed {recomputed} {scope} processing units"))
    })
}
