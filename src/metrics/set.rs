use log::debug;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::types::{MetricError, MetricValue, Observation, SampleOutcome, SourceType};
use crate::cache::SampleCache;

pub const EVENT_TYPE: &str = "event_type";
pub const ENTITY_NAME: &str = "entityName";

/// One emittable record: metric name to value, plus the reserved
/// `event_type` and optional `entityName` attributes.
///
/// RATE and DELTA readings never land in the set raw. They are compared with
/// the previous reading held in the shared [`SampleCache`] and only the
/// derived value is stored.
#[derive(Clone)]
pub struct MetricSet {
    metrics: BTreeMap<String, MetricValue>,
    cache: Arc<SampleCache>,
    require_entity_context: bool,
}

impl MetricSet {
    pub fn new(event_type: &str, cache: Arc<SampleCache>) -> Self {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            EVENT_TYPE.to_string(),
            MetricValue::Attribute(event_type.to_string()),
        );
        MetricSet {
            metrics,
            cache,
            require_entity_context: false,
        }
    }

    /// Refuse to sample under a bare metric name when `entityName` or
    /// `event_type` is missing, instead of sharing one baseline across
    /// every entity.
    pub fn require_entity_context(mut self, required: bool) -> Self {
        self.require_entity_context = required;
        self
    }

    pub fn set_entity_name(&mut self, entity_name: &str) {
        self.metrics.insert(
            ENTITY_NAME.to_string(),
            MetricValue::Attribute(entity_name.to_string()),
        );
    }

    pub fn event_type(&self) -> Option<&str> {
        self.get_attribute(EVENT_TYPE)
    }

    pub fn entity_name(&self) -> Option<&str> {
        self.get_attribute(ENTITY_NAME)
    }

    /// Adds or replaces `name`, validating `value` against `source_type` and
    /// sampling it first for RATE and DELTA. On error nothing is written to
    /// the set, although a sampled reading has still advanced the cache.
    pub fn set_metric(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        source_type: SourceType,
    ) -> Result<(), MetricError> {
        let value = value.into();
        let stored = match source_type {
            SourceType::Gauge => MetricValue::Gauge(numeric(name, &value)?),
            SourceType::Attribute => match value {
                Value::String(text) => MetricValue::Attribute(text),
                _ => {
                    return Err(MetricError::InvalidType {
                        name: name.to_string(),
                        expected: "string",
                    })
                }
            },
            SourceType::Rate | SourceType::Delta => {
                let reading = numeric(name, &value)?;
                MetricValue::Gauge(self.sample(name, reading, source_type)?)
            }
        };

        self.metrics.insert(name.to_string(), stored);
        Ok(())
    }

    /// [`MetricSet::set_metric`] with a textual kind such as `"rate"`.
    pub fn set_metric_tagged(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        tag: &str,
    ) -> Result<(), MetricError> {
        let source_type = tag
            .parse::<SourceType>()
            .map_err(|_| MetricError::UnknownSourceType {
                name: name.to_string(),
                tag: tag.to_string(),
            })?;
        self.set_metric(name, value, source_type)
    }

    /// [`MetricSet::set_metric`] with a numeric kind code (gauge=0 .. attribute=3).
    pub fn set_metric_code(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        code: i64,
    ) -> Result<(), MetricError> {
        let source_type =
            SourceType::from_code(code).ok_or_else(|| MetricError::UnknownSourceType {
                name: name.to_string(),
                tag: code.to_string(),
            })?;
        self.set_metric(name, value, source_type)
    }

    /// Applies every observation in order. A failing one is skipped and its
    /// error returned; the rest are still applied.
    pub fn apply<I>(&mut self, observations: I) -> Vec<MetricError>
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut errors = Vec::new();
        for observation in observations {
            let result = match observation.source_type() {
                Some(source_type) => {
                    self.set_metric(&observation.name, observation.value, source_type)
                }
                None => Err(MetricError::UnknownSourceType {
                    tag: tag_text(&observation.source_type),
                    name: observation.name,
                }),
            };
            if let Err(err) = result {
                errors.push(err);
            }
        }
        errors
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn get_number(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(MetricValue::as_f64)
    }

    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.metrics.get(name).and_then(MetricValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, MetricValue> {
        self.metrics.iter()
    }

    /// Key of the cached baseline for `name`:
    /// `<entityName>_<event_type>_<name>`, or just `name` without context.
    pub fn sampling_key(&self, name: &str) -> Result<String, MetricError> {
        match (self.entity_name(), self.event_type()) {
            (Some(entity), Some(event_type)) => Ok(format!("{}_{}_{}", entity, event_type, name)),
            _ if self.require_entity_context => Err(MetricError::MissingSamplingContext {
                name: name.to_string(),
            }),
            _ => Ok(name.to_string()),
        }
    }

    fn sample(
        &self,
        name: &str,
        reading: f64,
        source_type: SourceType,
    ) -> Result<f64, MetricError> {
        let key = self.sampling_key(name)?;
        // the baseline moves forward even when this sample is rejected below
        let (previous, now) = self.cache.swap(&key, reading);

        let Some(previous) = previous else {
            debug!("{:?} {} = {}", SampleOutcome::Baseline, key, reading);
            return Ok(0.0);
        };

        // a clock stepping backwards gives a negative duration, which only
        // a rate divides by
        let duration = now - previous.timestamp;
        if duration == 0 || (duration < 0 && source_type == SourceType::Rate) {
            debug!("{:?} {} after {} units", SampleOutcome::TooClose, key, duration);
            return Err(MetricError::SamplesTooClose { key });
        }

        let change = reading - previous.value;
        if change < 0.0 {
            debug!(
                "{:?} {} {} -> {}",
                SampleOutcome::Reset,
                key,
                previous.value,
                reading
            );
            return Err(MetricError::CounterReset {
                key,
                previous: previous.value,
                current: reading,
            });
        }

        let sampled = match source_type {
            SourceType::Delta => change,
            _ => change / duration as f64,
        };
        debug!("{:?} {} = {}", SampleOutcome::Sampled, key, sampled);
        Ok(sampled)
    }
}

/// Numbers pass through; strings holding a finite decimal or integer literal
/// are parsed. Everything else is not numeric.
fn numeric(name: &str, value: &Value) -> Result<f64, MetricError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| MetricError::InvalidType {
            name: name.to_string(),
            expected: "number",
        })
}

fn tag_text(tag: &Value) -> String {
    match tag {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl Serialize for MetricSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.metrics.serialize(serializer)
    }
}

impl fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.metrics.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a MetricSet {
    type Item = (&'a String, &'a MetricValue);
    type IntoIter = btree_map::Iter<'a, String, MetricValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.iter()
    }
}
