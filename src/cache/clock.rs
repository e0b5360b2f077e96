use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Unit of the integer timestamps recorded in the sample cache. Rates are
/// reported per one of these units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampUnit {
    #[default]
    Seconds,
    Milliseconds,
    Nanoseconds,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> i64;

    /// Unit of the values returned by [`Clock::now`].
    fn unit(&self) -> TimestampUnit;
}

/// Wall clock truncated to the configured unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    unit: TimestampUnit,
}

impl SystemClock {
    pub fn new(unit: TimestampUnit) -> Self {
        SystemClock { unit }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        let now = Utc::now();
        match self.unit {
            TimestampUnit::Seconds => now.timestamp(),
            TimestampUnit::Milliseconds => now.timestamp_millis(),
            // out of range after year 2262
            TimestampUnit::Nanoseconds => now.timestamp_nanos_opt().unwrap_or(i64::MAX),
        }
    }

    fn unit(&self) -> TimestampUnit {
        self.unit
    }
}

/// Clock that only moves when told to. Used for replaying recorded readings
/// and in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    unit: TimestampUnit,
}

impl ManualClock {
    /// Counts in seconds.
    pub fn new(start: i64) -> Self {
        Self::with_unit(start, TimestampUnit::Seconds)
    }

    pub fn with_unit(start: i64, unit: TimestampUnit) -> Self {
        ManualClock {
            now: AtomicI64::new(start),
            unit,
        }
    }

    pub fn set(&self, timestamp: i64) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, by: i64) -> i64 {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn unit(&self) -> TimestampUnit {
        self.unit
    }
}
