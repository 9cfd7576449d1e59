//! Dispatches LLM completion requests across a pool of vendor providers using
//! pluggable strategies (first-success, fallback, priority, parallel race).

pub mod core;
pub mod manager;
pub mod pool;
pub mod providers;
pub mod strategy;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use core::types::*;
pub use manager::{InitReport, ManagerCell, ProviderManager, ProviderManagerBuilder};
