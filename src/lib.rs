//! Flipstore Library
//!
//! Bucketed aggregation cache for Grand Exchange flip history

pub mod config;
pub mod loader;
pub mod persistence;
pub mod store;
pub mod types;

pub use store::{FlipStore, IntervalFilter, Stats};
pub use types::{AccountFilter, FlipRecord, RawFlip, Transaction};
