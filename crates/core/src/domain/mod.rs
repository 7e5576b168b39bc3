pub mod benchmark;
pub mod category;
pub mod laptop;
pub mod processing_unit;
