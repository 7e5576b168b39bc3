use serde::{Deserialize, Serialize};

use crate::domain::processing_unit::{ProcessingUnitId, PuType};
use crate::errors::DomainError;

/// Raw measurement statistics of one benchmark, as scraped for one processing unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResults {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    #[serde(alias = "avg")]
    pub average: f64,
}

impl BenchmarkResults {
    pub fn validate(&self, benchmark: &str) -> Result<(), DomainError> {
        let fields = [("min", self.min), ("max", self.max), ("median", self.median), ("average", self.average)];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(DomainError::InvalidSample {
                    benchmark: benchmark.to_string(),
                    reason: format!("{field} must be a finite number"),
                });
            }
        }
        if self.average < 0.0 {
            return Err(DomainError::InvalidSample {
                benchmark: benchmark.to_string(),
                reason: "average must not be negative".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSample {
    pub name: String,
    pub processing_unit_id: ProcessingUnitId,
    pub pu_type: PuType,
    pub results: BenchmarkResults,
}

impl BenchmarkSample {
    pub fn average(&self) -> f64 {
        self.results.average
    }
}

/// Catalog-wide running aggregate of one benchmark name for one processing unit type.
///
/// `max_score_seen` is the normalizing denominator, and `sum_of_averages / count_of_samples`
/// is the fallback score for units that were never measured on this benchmark.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalBenchmarkStat {
    pub name: String,
    pub pu_type: PuType,
    pub max_score_seen: f64,
    pub sum_of_averages: f64,
    pub count_of_samples: u64,
}

impl GlobalBenchmarkStat {
    pub fn first(name: impl Into<String>, pu_type: PuType, average: f64) -> Self {
        Self {
            name: name.into(),
            pu_type,
            max_score_seen: average,
            sum_of_averages: average,
            count_of_samples: 1,
        }
    }

    /// Folds one more sample average in. Returns whether `max_score_seen` rose.
    pub fn record(&mut self, average: f64) -> bool {
        let raised = average > self.max_score_seen;
        if raised {
            self.max_score_seen = average;
        }
        self.sum_of_averages += average;
        self.count_of_samples += 1;
        raised
    }

    pub fn running_mean(&self) -> f64 {
        if self.count_of_samples == 0 {
            return 0.0;
        }
        self.sum_of_averages / self.count_of_samples as f64
    }

    /// Divides by `max_score_seen`; a degenerate aggregate yields 0.
    pub fn normalize(&self, value: f64) -> f64 {
        if self.max_score_seen <= 0.0 || !self.max_score_seen.is_finite() {
            return 0.0;
        }
        let normalized = value / self.max_score_seen;
        if normalized.is_finite() {
            normalized
        } else {
            0.0
        }
    }

    /// Normalized score of a unit given its own sample average, falling back to the running
    /// mean when the unit has no sample for this benchmark.
    pub fn normalized_score(&self, sample_average: Option<f64>) -> f64 {
        match sample_average {
            Some(average) => self.normalize(average),
            None => self.normalize(self.running_mean()),
        }
    }
}
