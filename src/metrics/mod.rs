pub mod sampler;
mod set;
mod types;

pub use sampler::{run_cycle, CycleReport, EntityReading, SamplerHandle};
pub use set::{MetricSet, ENTITY_NAME, EVENT_TYPE};
pub use types::{MetricError, MetricValue, Observation, SampleOutcome, SourceType};
