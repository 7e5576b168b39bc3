use lapsel_db::migrations;

use crate::commands::{with_catalog, CommandResult};

pub fn run() -> CommandResult {
    with_catalog("migrate", |pool, _config| async move {
        let applied = migrations::applied_count(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok(format!("applied pending migrations ({applied} recorded)"))
    })
}
