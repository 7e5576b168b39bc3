use std::str::FromStr;

use chrono::{DateTime, Utc};
use lapsel_core::catalog::CatalogStore;
use lapsel_core::domain::benchmark::{BenchmarkResults, BenchmarkSample, GlobalBenchmarkStat};
use lapsel_core::domain::category::{CachedScore, CategoryRules, CategoryWeight, RuleSet};
use lapsel_core::domain::laptop::{Laptop, LaptopId};
use lapsel_core::domain::processing_unit::{ProcessingUnit, ProcessingUnitId, PuType};
use lapsel_core::errors::StoreError;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed catalog. Prices are stored as decimal text, so the price ceiling is applied
/// after decoding rather than in SQL.
pub struct SqlCatalogStore {
    pool: DbPool,
}

impl SqlCatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl CatalogStore for SqlCatalogStore {
    async fn find_processing_unit(
        &self,
        pu_type: PuType,
        id: &ProcessingUnitId,
    ) -> Result<Option<ProcessingUnit>, StoreError> {
        let row = sqlx::query(
            "SELECT id, pu_type, name FROM processing_unit WHERE pu_type = ? AND id = ?",
        )
        .bind(pu_type.code())
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(unit_from_row).transpose()?)
    }

    async fn find_processing_unit_by_name(
        &self,
        pu_type: PuType,
        name: &str,
    ) -> Result<Option<ProcessingUnit>, StoreError> {
        let row = sqlx::query(
            "SELECT id, pu_type, name FROM processing_unit WHERE pu_type = ? AND name = ?",
        )
        .bind(pu_type.code())
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(unit_from_row).transpose()?)
    }

    async fn insert_processing_unit(&self, unit: ProcessingUnit) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO processing_unit (id, pu_type, name) VALUES (?, ?, ?)")
            .bind(&unit.id.0)
            .bind(unit.pu_type.code())
            .bind(&unit.name)
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_processing_units(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<ProcessingUnit>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, pu_type, name FROM processing_unit WHERE pu_type = ? ORDER BY name, id",
        )
        .bind(pu_type.code())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(unit_from_row).collect::<Result<_, _>>()?)
    }

    async fn save_sample(&self, sample: BenchmarkSample) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO benchmark_sample (
                pu_type,
                processing_unit_id,
                name,
                min_value,
                max_value,
                median_value,
                average_value
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(pu_type, processing_unit_id, name) DO UPDATE SET
                min_value = excluded.min_value,
                max_value = excluded.max_value,
                median_value = excluded.median_value,
                average_value = excluded.average_value",
        )
        .bind(sample.pu_type.code())
        .bind(&sample.processing_unit_id.0)
        .bind(&sample.name)
        .bind(sample.results.min)
        .bind(sample.results.max)
        .bind(sample.results.median)
        .bind(sample.results.average)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_sample(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        benchmark_name: &str,
    ) -> Result<Option<BenchmarkSample>, StoreError> {
        let row = sqlx::query(
            "SELECT
                pu_type,
                processing_unit_id,
                name,
                min_value,
                max_value,
                median_value,
                average_value
             FROM benchmark_sample
             WHERE pu_type = ? AND processing_unit_id = ? AND name = ?",
        )
        .bind(pu_type.code())
        .bind(&unit_id.0)
        .bind(benchmark_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(sample_from_row).transpose()?)
    }

    async fn list_samples_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<BenchmarkSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                pu_type,
                processing_unit_id,
                name,
                min_value,
                max_value,
                median_value,
                average_value
             FROM benchmark_sample
             WHERE pu_type = ? AND processing_unit_id = ?
             ORDER BY name",
        )
        .bind(pu_type.code())
        .bind(&unit_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(sample_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_samples_for_benchmark(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Vec<BenchmarkSample>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                pu_type,
                processing_unit_id,
                name,
                min_value,
                max_value,
                median_value,
                average_value
             FROM benchmark_sample
             WHERE pu_type = ? AND name = ?
             ORDER BY processing_unit_id",
        )
        .bind(pu_type.code())
        .bind(benchmark_name)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(sample_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_benchmark_names(&self, pu_type: PuType) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT name FROM benchmark_sample WHERE pu_type = ? ORDER BY name",
        )
        .bind(pu_type.code())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows
            .into_iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(RepositoryError::from)?)
    }

    async fn find_stat(
        &self,
        pu_type: PuType,
        benchmark_name: &str,
    ) -> Result<Option<GlobalBenchmarkStat>, StoreError> {
        let row = sqlx::query(
            "SELECT pu_type, name, max_score_seen, sum_of_averages, count_of_samples
             FROM global_benchmark_stat
             WHERE pu_type = ? AND name = ?",
        )
        .bind(pu_type.code())
        .bind(benchmark_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(stat_from_row).transpose()?)
    }

    async fn upsert_stat(&self, stat: GlobalBenchmarkStat) -> Result<(), StoreError> {
        let count = i64::try_from(stat.count_of_samples).map_err(|_| {
            RepositoryError::Decode(format!(
                "count_of_samples for `{}` does not fit in a sqlite integer",
                stat.name
            ))
        })?;
        sqlx::query(
            "INSERT INTO global_benchmark_stat (
                pu_type,
                name,
                max_score_seen,
                sum_of_averages,
                count_of_samples
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(pu_type, name) DO UPDATE SET
                max_score_seen = excluded.max_score_seen,
                sum_of_averages = excluded.sum_of_averages,
                count_of_samples = excluded.count_of_samples",
        )
        .bind(stat.pu_type.code())
        .bind(&stat.name)
        .bind(stat.max_score_seen)
        .bind(stat.sum_of_averages)
        .bind(count)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_stats(&self, pu_type: PuType) -> Result<Vec<GlobalBenchmarkStat>, StoreError> {
        let rows = sqlx::query(
            "SELECT pu_type, name, max_score_seen, sum_of_averages, count_of_samples
             FROM global_benchmark_stat
             WHERE pu_type = ?
             ORDER BY name",
        )
        .bind(pu_type.code())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(stat_from_row).collect::<Result<_, _>>()?)
    }

    async fn replace_category_rules(&self, rules: Vec<CategoryRules>) -> Result<(), StoreError> {
        let mut encoded = Vec::with_capacity(rules.len());
        for category_rules in &rules {
            let rule_set_json = serde_json::to_string(&category_rules.rule_set).map_err(|error| {
                RepositoryError::Decode(format!(
                    "could not encode rules of `{}`: {error}",
                    category_rules.category
                ))
            })?;
            encoded.push((category_rules, rule_set_json));
        }

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        sqlx::query("DELETE FROM category_rules")
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        for (category_rules, rule_set_json) in encoded {
            sqlx::query(
                "INSERT INTO category_rules (category, pu_type, rule_set_json) VALUES (?, ?, ?)",
            )
            .bind(&category_rules.category)
            .bind(category_rules.pu_type.code())
            .bind(rule_set_json)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        let dropped_weights = sqlx::query(
            "DELETE FROM category_weight
             WHERE NOT EXISTS (
                SELECT 1 FROM category_rules
                WHERE category_rules.category = category_weight.category
                  AND category_rules.pu_type = category_weight.pu_type
             )",
        )
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        let dropped_scores = sqlx::query(
            "DELETE FROM cached_score
             WHERE category NOT IN (SELECT category FROM category_rules)",
        )
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .rows_affected();

        tx.commit().await.map_err(RepositoryError::from)?;
        debug!(
            event_name = "db.category_rules.replaced",
            rule_sets = rules.len(),
            dropped_weights,
            dropped_scores,
            "category rules replaced"
        );
        Ok(())
    }

    async fn list_category_rules(&self) -> Result<Vec<CategoryRules>, StoreError> {
        let rows = sqlx::query(
            "SELECT category, pu_type, rule_set_json FROM category_rules ORDER BY category, pu_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(rules_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_categories(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT category FROM category_rules ORDER BY category")
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        Ok(rows
            .into_iter()
            .map(|row| row.try_get::<String, _>("category"))
            .collect::<Result<_, _>>()
            .map_err(RepositoryError::from)?)
    }

    async fn replace_category_weights(
        &self,
        category: &str,
        pu_type: PuType,
        weights: Vec<CategoryWeight>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        sqlx::query("DELETE FROM category_weight WHERE category = ? AND pu_type = ?")
            .bind(category)
            .bind(pu_type.code())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        for weight in &weights {
            sqlx::query(
                "INSERT INTO category_weight (category, pu_type, benchmark_name, weight)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(category)
            .bind(pu_type.code())
            .bind(&weight.benchmark_name)
            .bind(weight.weight)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        debug!(
            event_name = "db.category_weight.replaced",
            category,
            pu_type = %pu_type,
            rows = weights.len(),
            "category weights replaced"
        );
        Ok(())
    }

    async fn list_category_weights(
        &self,
        pu_type: PuType,
    ) -> Result<Vec<CategoryWeight>, StoreError> {
        let rows = sqlx::query(
            "SELECT category, pu_type, benchmark_name, weight
             FROM category_weight
             WHERE pu_type = ?
             ORDER BY category, benchmark_name",
        )
        .bind(pu_type.code())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(weight_from_row).collect::<Result<_, _>>()?)
    }

    async fn upsert_cached_scores(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
        scores: Vec<CachedScore>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        for score in &scores {
            sqlx::query(
                "INSERT INTO cached_score (
                    pu_type,
                    processing_unit_id,
                    category,
                    score,
                    updated_at
                 ) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(pu_type, processing_unit_id, category) DO UPDATE SET
                    score = excluded.score,
                    updated_at = excluded.updated_at",
            )
            .bind(pu_type.code())
            .bind(&unit_id.0)
            .bind(&score.category)
            .bind(score.score)
            .bind(score.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        debug!(
            event_name = "db.cached_score.upserted",
            pu_type = %pu_type,
            unit_id = %unit_id.0,
            rows = scores.len(),
            "cached scores written"
        );
        Ok(())
    }

    async fn list_cached_scores(&self, pu_type: PuType) -> Result<Vec<CachedScore>, StoreError> {
        let rows = sqlx::query(
            "SELECT pu_type, processing_unit_id, category, score, updated_at
             FROM cached_score
             WHERE pu_type = ?
             ORDER BY processing_unit_id, category",
        )
        .bind(pu_type.code())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(cached_score_from_row).collect::<Result<_, _>>()?)
    }

    async fn list_cached_scores_for_unit(
        &self,
        pu_type: PuType,
        unit_id: &ProcessingUnitId,
    ) -> Result<Vec<CachedScore>, StoreError> {
        let rows = sqlx::query(
            "SELECT pu_type, processing_unit_id, category, score, updated_at
             FROM cached_score
             WHERE pu_type = ? AND processing_unit_id = ?
             ORDER BY category",
        )
        .bind(pu_type.code())
        .bind(&unit_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(cached_score_from_row).collect::<Result<_, _>>()?)
    }

    async fn save_laptop(&self, laptop: Laptop) -> Result<(), StoreError> {
        let image_urls_json = serde_json::to_string(&laptop.image_urls).map_err(|error| {
            RepositoryError::Decode(format!("could not encode image urls: {error}"))
        })?;
        sqlx::query(
            "INSERT INTO laptop (
                id,
                name,
                price,
                cpu_id,
                gpu_id,
                url,
                image_urls_json,
                ram_gigabytes,
                weight_grams,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                price = excluded.price,
                cpu_id = excluded.cpu_id,
                gpu_id = excluded.gpu_id,
                url = excluded.url,
                image_urls_json = excluded.image_urls_json,
                ram_gigabytes = excluded.ram_gigabytes,
                weight_grams = excluded.weight_grams",
        )
        .bind(&laptop.id.0)
        .bind(&laptop.name)
        .bind(laptop.price.to_string())
        .bind(&laptop.cpu_id.0)
        .bind(&laptop.gpu_id.0)
        .bind(laptop.url.as_deref())
        .bind(image_urls_json)
        .bind(laptop.ram_gigabytes.map(i64::from))
        .bind(laptop.weight_grams)
        .bind(laptop.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_laptops(&self, max_price: Option<Decimal>) -> Result<Vec<Laptop>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                price,
                cpu_id,
                gpu_id,
                url,
                image_urls_json,
                ram_gigabytes,
                weight_grams,
                created_at
             FROM laptop
             ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        let mut laptops = Vec::with_capacity(rows.len());
        for row in rows {
            let laptop = laptop_from_row(row)?;
            if laptop.within_budget(max_price) {
                laptops.push(laptop);
            }
        }
        Ok(laptops)
    }
}

fn parse_pu_type(row: &SqliteRow) -> Result<PuType, RepositoryError> {
    let code = row.try_get::<String, _>("pu_type")?;
    PuType::from_code(&code)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown processing unit type `{code}`")))
}

fn unit_from_row(row: SqliteRow) -> Result<ProcessingUnit, RepositoryError> {
    Ok(ProcessingUnit {
        pu_type: parse_pu_type(&row)?,
        id: ProcessingUnitId(row.try_get("id")?),
        name: row.try_get("name")?,
    })
}

fn sample_from_row(row: SqliteRow) -> Result<BenchmarkSample, RepositoryError> {
    Ok(BenchmarkSample {
        pu_type: parse_pu_type(&row)?,
        processing_unit_id: ProcessingUnitId(row.try_get("processing_unit_id")?),
        name: row.try_get("name")?,
        results: BenchmarkResults {
            min: row.try_get("min_value")?,
            max: row.try_get("max_value")?,
            median: row.try_get("median_value")?,
            average: row.try_get("average_value")?,
        },
    })
}

fn stat_from_row(row: SqliteRow) -> Result<GlobalBenchmarkStat, RepositoryError> {
    let count = row.try_get::<i64, _>("count_of_samples")?;
    Ok(GlobalBenchmarkStat {
        pu_type: parse_pu_type(&row)?,
        name: row.try_get("name")?,
        max_score_seen: row.try_get("max_score_seen")?,
        sum_of_averages: row.try_get("sum_of_averages")?,
        count_of_samples: u64::try_from(count).map_err(|_| {
            RepositoryError::Decode(format!("invalid value for `count_of_samples`: {count}"))
        })?,
    })
}

fn rules_from_row(row: SqliteRow) -> Result<CategoryRules, RepositoryError> {
    let category: String = row.try_get("category")?;
    let raw = row.try_get::<String, _>("rule_set_json")?;
    let rule_set = serde_json::from_str::<RuleSet>(&raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid rule set stored for `{category}`: {error}"))
    })?;
    Ok(CategoryRules { pu_type: parse_pu_type(&row)?, category, rule_set })
}

fn weight_from_row(row: SqliteRow) -> Result<CategoryWeight, RepositoryError> {
    Ok(CategoryWeight {
        pu_type: parse_pu_type(&row)?,
        category: row.try_get("category")?,
        benchmark_name: row.try_get("benchmark_name")?,
        weight: row.try_get("weight")?,
    })
}

fn cached_score_from_row(row: SqliteRow) -> Result<CachedScore, RepositoryError> {
    Ok(CachedScore {
        pu_type: parse_pu_type(&row)?,
        processing_unit_id: ProcessingUnitId(row.try_get("processing_unit_id")?),
        category: row.try_get("category")?,
        score: row.try_get("score")?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn laptop_from_row(row: SqliteRow) -> Result<Laptop, RepositoryError> {
    let price_raw = row.try_get::<String, _>("price")?;
    let price = Decimal::from_str(&price_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid price `{price_raw}` ({error})"))
    })?;
    let images_raw = row.try_get::<String, _>("image_urls_json")?;
    let image_urls = serde_json::from_str::<Vec<String>>(&images_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid image_urls_json `{images_raw}` ({error})"))
    })?;
    let ram_gigabytes = row
        .try_get::<Option<i64>, _>("ram_gigabytes")?
        .map(|value| {
            u32::try_from(value).map_err(|_| {
                RepositoryError::Decode(format!("invalid value for `ram_gigabytes`: {value}"))
            })
        })
        .transpose()?;

    Ok(Laptop {
        id: LaptopId(row.try_get("id")?),
        name: row.try_get("name")?,
        price,
        cpu_id: ProcessingUnitId(row.try_get("cpu_id")?),
        gpu_id: ProcessingUnitId(row.try_get("gpu_id")?),
        url: row.try_get("url")?,
        image_urls,
        ram_gigabytes,
        weight_grams: row.try_get("weight_grams")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
