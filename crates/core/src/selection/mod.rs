//! Ranking laptops against a user's category weights.

pub mod engine;
pub mod top_k;

pub use engine::{RankedLaptop, SelectionEngine, SelectionLimits, SelectionRequest};
pub use top_k::{Ranked, TopK};
