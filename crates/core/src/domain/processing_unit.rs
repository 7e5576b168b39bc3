use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessingUnitId(pub String);

impl ProcessingUnitId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ProcessingUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of processing unit. Benchmarks, aggregates, weights and cached scores are all
/// partitioned by this type; a CPU benchmark never normalizes a GPU sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PuType {
    Cpu,
    Gpu,
}

impl PuType {
    pub const ALL: [PuType; 2] = [PuType::Cpu, PuType::Gpu];

    /// Single-letter code used in stored rows (`c` / `g`).
    pub fn code(self) -> &'static str {
        match self {
            Self::Cpu => "c",
            Self::Gpu => "g",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Self::Cpu),
            "g" => Some(Self::Gpu),
            _ => None,
        }
    }
}

impl fmt::Display for PuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Gpu => f.write_str("gpu"),
        }
    }
}

impl FromStr for PuType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "c" | "cpu" => Ok(Self::Cpu),
            "g" | "gpu" => Ok(Self::Gpu),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported processing unit type `{other}` (expected cpu|gpu)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingUnit {
    pub id: ProcessingUnitId,
    pub pu_type: PuType,
    pub name: String,
}

impl ProcessingUnit {
    pub fn new(pu_type: PuType, name: impl Into<String>) -> Self {
        Self { id: ProcessingUnitId::generate(), pu_type, name: name.into() }
    }
}
