use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::processing_unit::ProcessingUnitId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaptopId(pub String);

impl LaptopId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Laptop {
    pub id: LaptopId,
    pub name: String,
    pub price: Decimal,
    pub cpu_id: ProcessingUnitId,
    pub gpu_id: ProcessingUnitId,
    pub url: Option<String>,
    pub image_urls: Vec<String>,
    pub ram_gigabytes: Option<u32>,
    pub weight_grams: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Laptop {
    pub fn within_budget(&self, max_price: Option<Decimal>) -> bool {
        max_price.map_or(true, |ceiling| self.price <= ceiling)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Laptop, LaptopId};
    use crate::domain::processing_unit::ProcessingUnitId;

    #[test]
    fn price_ceiling_is_inclusive() {
        let laptop = Laptop {
            id: LaptopId("L-1".to_string()),
            name: "Aero 15".to_string(),
            price: Decimal::new(1_000, 0),
            cpu_id: ProcessingUnitId("cpu-1".to_string()),
            gpu_id: ProcessingUnitId("gpu-1".to_string()),
            url: None,
            image_urls: Vec::new(),
            ram_gigabytes: Some(16),
            weight_grams: None,
            created_at: Utc::now(),
        };

        assert!(laptop.within_budget(None));
        assert!(laptop.within_budget(Some(Decimal::new(1_000, 0))));
        assert!(!laptop.within_budget(Some(Decimal::new(99_999, 2))));
    }
}
