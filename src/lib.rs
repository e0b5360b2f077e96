//! Turns raw readings into emittable metric values: gauges and attributes
//! are validated and stored as-is, monotonic counters become per-unit rates
//! or deltas against the previous reading kept in a shared [`SampleCache`].

pub mod cache;
pub mod config;
pub mod metrics;

pub use cache::{CachedSample, Clock, ManualClock, SampleCache, SystemClock, TimestampUnit};
#[cfg(feature = "persistence")]
pub use cache::CacheError;
pub use config::{SamplerConfig, SAMPLER_CONFIG};
pub use metrics::{
    MetricError, MetricSet, MetricValue, Observation, SampleOutcome, SamplerHandle, SourceType,
};
