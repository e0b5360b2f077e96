use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a raw reading is turned into an emitted value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Stored as-is.
    Gauge,
    /// Ever-growing counter, emitted as change per clock unit.
    Rate,
    /// Ever-growing counter, emitted as change since the previous reading.
    Delta,
    /// Any string value.
    Attribute,
}

impl SourceType {
    /// Numeric tags follow declaration order: gauge=0, rate=1, delta=2,
    /// attribute=3.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SourceType::Gauge),
            1 => Some(SourceType::Rate),
            2 => Some(SourceType::Delta),
            3 => Some(SourceType::Attribute),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Gauge => "gauge",
            SourceType::Rate => "rate",
            SourceType::Delta => "delta",
            SourceType::Attribute => "attribute",
        }
    }

    pub fn is_sampled(&self) -> bool {
        matches!(self, SourceType::Rate | SourceType::Delta)
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gauge" => Ok(SourceType::Gauge),
            "rate" => Ok(SourceType::Rate),
            "delta" => Ok(SourceType::Delta),
            "attribute" => Ok(SourceType::Attribute),
            _ => Err(format!("unknown source type {}", s)),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored metric value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Gauge(f64),
    Attribute(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Gauge(v) => Some(*v),
            MetricValue::Attribute(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Gauge(_) => None,
            MetricValue::Attribute(s) => Some(s),
        }
    }
}

/// One raw reading as it arrives from a collector, e.g. decoded from JSON:
/// `{"name": "bytes", "value": 150, "source_type": "delta"}`.
///
/// `source_type` stays textual (or numeric) so an unrecognized tag is
/// reported against the metric instead of failing the whole batch decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub name: String,
    pub value: serde_json::Value,
    pub source_type: serde_json::Value,
}

impl Observation {
    pub fn new(name: &str, value: impl Into<serde_json::Value>, source_type: SourceType) -> Self {
        Observation {
            name: name.to_string(),
            value: value.into(),
            source_type: serde_json::Value::String(source_type.as_str().to_string()),
        }
    }

    pub fn source_type(&self) -> Option<SourceType> {
        match &self.source_type {
            serde_json::Value::String(tag) => tag.parse().ok(),
            serde_json::Value::Number(code) => code.as_i64().and_then(SourceType::from_code),
            _ => None,
        }
    }
}

/// How a single RATE/DELTA submission was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// First reading for the key; nothing to compare against yet.
    Baseline,
    Sampled,
    Reset,
    TooClose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricError {
    InvalidType {
        name: String,
        expected: &'static str,
    },
    UnknownSourceType {
        name: String,
        tag: String,
    },
    SamplesTooClose {
        key: String,
    },
    CounterReset {
        key: String,
        previous: f64,
        current: f64,
    },
    MissingSamplingContext {
        name: String,
    },
}

impl MetricError {
    pub fn outcome(&self) -> Option<SampleOutcome> {
        match self {
            MetricError::SamplesTooClose { .. } => Some(SampleOutcome::TooClose),
            MetricError::CounterReset { .. } => Some(SampleOutcome::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for MetricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricError::InvalidType { name, expected } => {
                write!(f, "invalid data type for metric {}: expected {}", name, expected)
            }
            MetricError::UnknownSourceType { name, tag } => {
                write!(f, "unknown source type {} for metric {}", tag, name)
            }
            MetricError::SamplesTooClose { key } => {
                write!(f, "samples for {} are too close in time, skipping sampling", key)
            }
            MetricError::CounterReset {
                key,
                previous,
                current,
            } => write!(
                f,
                "source for {} was reset ({} -> {}), skipping sampling",
                key, previous, current
            ),
            MetricError::MissingSamplingContext { name } => write!(
                f,
                "metric {} needs entityName and event_type to build a sampling key",
                name
            ),
        }
    }
}

impl std::error::Error for MetricError {}
