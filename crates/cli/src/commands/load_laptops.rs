use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use lapsel_core::domain::benchmark::BenchmarkResults;
use lapsel_core::ingestion::{LaptopRecord, PuRecord};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::commands::{engine_failure, input_failure, summarize, with_engine, CommandResult};

/// A laptop as written by the scraper.
#[derive(Debug, Deserialize)]
struct ScrapedLaptop {
    name: String,
    price: Decimal,
    cpu: String,
    cpu_data: ScrapedPuData,
    gpu: ScrapedGpu,
    gpu_data: ScrapedPuData,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    ram: Option<u32>,
    #[serde(default)]
    weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ScrapedGpu {
    model: String,
}

#[derive(Debug, Deserialize)]
struct ScrapedPuData {
    #[serde(default)]
    bench: BTreeMap<String, ScrapedBenchmark>,
}

/// Only `avg` is guaranteed; the other statistics fall back to it.
#[derive(Debug, Deserialize)]
struct ScrapedBenchmark {
    avg: f64,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    median: Option<f64>,
}

impl From<ScrapedBenchmark> for BenchmarkResults {
    fn from(value: ScrapedBenchmark) -> Self {
        Self {
            min: value.min.unwrap_or(value.avg),
            max: value.max.unwrap_or(value.avg),
            median: value.median.unwrap_or(value.avg),
            average: value.avg,
        }
    }
}

#[derive(Debug, Default)]
pub struct LaptopFile {
    pub records: Vec<LaptopRecord>,
    pub distinct_cpus: usize,
    pub distinct_gpus: usize,
}

pub fn run(path: &Path) -> CommandResult {
    let file = match read_laptops_file(path) {
        Ok(file) => file,
        Err(error) => {
            let (class, message, code) = input_failure(format!("{error:#}"));
            return CommandResult::failure("load-laptops", class, message, code);
        }
    };

    with_engine("load-laptops", |engine| async move {
        let report = engine.ingestor.ingest_laptops(file.records).await.map_err(engine_failure)?;
        Ok(format!(
            "ingested laptops ({} distinct cpus, {} distinct gpus): {}",
            file.distinct_cpus,
            file.distinct_gpus,
            summarize(&report)
        ))
    })
}

pub fn read_laptops_file(path: &Path) -> Result<LaptopFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read laptops file `{}`", path.display()))?;
    parse_laptops(&raw).with_context(|| format!("invalid laptops file `{}`", path.display()))
}

/// Converts scraper output into ingestion records. A processing unit that appears in several
/// laptops carries the benchmarks of its first appearance in every record.
pub fn parse_laptops(raw: &str) -> Result<LaptopFile> {
    let scraped: Vec<ScrapedLaptop> = serde_json::from_str(raw)?;

    let mut cpus = UnitBenchmarks::default();
    let mut gpus = UnitBenchmarks::default();
    let mut records = Vec::with_capacity(scraped.len());
    for laptop in scraped {
        records.push(LaptopRecord {
            cpu: cpus.resolve(laptop.cpu, laptop.cpu_data),
            gpu: gpus.resolve(laptop.gpu.model, laptop.gpu_data),
            name: laptop.name,
            price: laptop.price,
            url: laptop.url,
            image_urls: laptop.images,
            ram_gigabytes: laptop.ram,
            weight_grams: laptop.weight,
        });
    }

    Ok(LaptopFile {
        records,
        distinct_cpus: cpus.first_seen.len(),
        distinct_gpus: gpus.first_seen.len(),
    })
}

#[derive(Default)]
struct UnitBenchmarks {
    first_seen: HashMap<String, BTreeMap<String, BenchmarkResults>>,
}

impl UnitBenchmarks {
    fn resolve(&mut self, name: String, data: ScrapedPuData) -> PuRecord {
        let name = name.trim().to_string();
        let benchmarks = self
            .first_seen
            .entry(name.clone())
            .or_insert_with(|| {
                data.bench.into_iter().map(|(bench, results)| (bench, results.into())).collect()
            })
            .clone();
        PuRecord { name, benchmarks }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::parse_laptops;

    const SCRAPED: &str = r#"[
        {
            "name": "Aero 14",
            "price": 1499.5,
            "cpu": "i7-13700H",
            "cpu_data": {"bench": {
                "cinebench_multi": {"min": 15000, "max": 17000, "median": 16000, "avg": 16100}
            }},
            "gpu": {"model": "RTX 4050"},
            "gpu_data": {"bench": {"timespy": {"avg": 8600}}},
            "url": "https://shop.example/aero-14",
            "images": ["https://img.example/aero-14.png"],
            "ram": 16,
            "weight": 1400
        },
        {
            "name": "Aero 16",
            "price": 1899,
            "cpu": " i7-13700H ",
            "cpu_data": {"bench": {"cinebench_multi": {"avg": 99999}}},
            "gpu": {"model": "RTX 4070"},
            "gpu_data": {"bench": {}}
        }
    ]"#;

    #[test]
    fn scraped_laptops_become_records_with_deduplicated_units() {
        let file = parse_laptops(SCRAPED).expect("laptops");

        assert_eq!(file.records.len(), 2);
        assert_eq!((file.distinct_cpus, file.distinct_gpus), (1, 2));

        let first = &file.records[0];
        assert_eq!(first.price, Decimal::new(14_995, 1));
        assert_eq!(first.gpu.name, "RTX 4050");
        assert_eq!(first.ram_gigabytes, Some(16));
        assert_eq!(first.weight_grams, Some(1400.0));
        let timespy = first.gpu.benchmarks["timespy"];
        assert_eq!((timespy.min, timespy.median, timespy.average), (8600.0, 8600.0, 8600.0));

        let second = &file.records[1];
        assert_eq!(second.cpu.name, "i7-13700H");
        assert_eq!(second.cpu.benchmarks["cinebench_multi"].average, 16100.0);
        assert!(second.url.is_none());
        assert!(second.image_urls.is_empty());
    }

    #[test]
    fn laptops_without_required_fields_are_rejected() {
        parse_laptops(r#"[{"name": "No CPU", "price": 100}]"#).expect_err("cpu is required");
        parse_laptops(r#"{"name": "not an array"}"#).expect_err("file must be an array");
    }
}
