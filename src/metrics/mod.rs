//! Host metrics collection and data structures.
//!
//! This module provides the raw metric sources ([`SystemCollector`] behind the
//! [`MetricsProvider`] trait), the counter-to-rate conversion and the
//! [`Sampler`] that assembles typed snapshots.

pub mod collector;
pub mod data;
pub mod gpu;
pub mod rate;
pub mod sampler;
pub mod traits;

// Re-export commonly used items
pub use collector::SystemCollector;
pub use data::{MetricCategory, MetricsSnapshot, StaticSystemInfo};
pub use gpu::{DefaultGpuProvider, GpuProvider};
pub use rate::{CounterRate, CounterSample, RateResult, RateTracker};
pub use sampler::Sampler;
pub use traits::MetricsProvider;
