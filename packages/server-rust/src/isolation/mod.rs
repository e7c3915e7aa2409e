//! Instrumented isolation: per-level metrics and the cached strategy facade.

pub mod metrics;
pub mod service;

pub use metrics::{IsolationMetrics, LevelStats};
pub use service::IsolationService;
