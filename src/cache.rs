// src/cache.rs

mod clock;
#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock, TimestampUnit};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "persistence")]
use chrono::{DateTime, Utc};
#[cfg(feature = "persistence")]
use std::collections::BTreeMap;
#[cfg(feature = "persistence")]
use std::fmt;
#[cfg(feature = "persistence")]
use std::fs;
#[cfg(feature = "persistence")]
use std::path::{Path, PathBuf};

/// Last raw reading recorded for a sampling key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CachedSample {
    pub value: f64,
    pub timestamp: i64,
}

/// Process-wide store of the previous reading per sampling key.
///
/// Every write replaces both value and timestamp; there is no history. Share
/// one instance across collection cycles through an `Arc`.
pub struct SampleCache {
    entries: DashMap<String, CachedSample>,
    clock: Arc<dyn Clock>,
}

impl SampleCache {
    pub fn new(unit: TimestampUnit) -> Self {
        Self::with_clock(Arc::new(SystemClock::new(unit)))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        SampleCache {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn unit(&self) -> TimestampUnit {
        self.clock.unit()
    }

    /// Previous reading for `key`, `None` the first time the key is seen.
    pub fn get(&self, key: &str) -> Option<CachedSample> {
        self.entries.get(key).map(|entry| *entry)
    }

    /// Records `value` at the current time and returns that timestamp.
    pub fn set(&self, key: &str, value: f64) -> i64 {
        let timestamp = self.clock.now();
        self.entries
            .insert(key.to_string(), CachedSample { value, timestamp });
        timestamp
    }

    /// `get` followed by `set` while holding the key's shard lock, so two
    /// callers sampling the same key never observe the same baseline.
    pub fn swap(&self, key: &str, value: f64) -> (Option<CachedSample>, i64) {
        let timestamp = self.clock.now();
        let previous = self
            .entries
            .insert(key.to_string(), CachedSample { value, timestamp });
        (previous, timestamp)
    }

    pub fn remove(&self, key: &str) -> Option<CachedSample> {
        self.entries.remove(key).map(|(_, sample)| sample)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Drops every entry recorded before `cutoff`. Returns how many went.
    pub fn evict_older_than(&self, cutoff: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, sample| sample.timestamp >= cutoff);
        before.saturating_sub(self.entries.len())
    }
}

impl Default for SampleCache {
    fn default() -> Self {
        Self::new(TimestampUnit::default())
    }
}

#[cfg(feature = "persistence")]
#[derive(Debug)]
pub enum CacheError {
    Io(PathBuf, std::io::Error),
    Format(PathBuf, serde_json::Error),
    /// The file was written by a clock counting in another unit.
    UnitMismatch {
        path: PathBuf,
        saved: TimestampUnit,
        expected: TimestampUnit,
    },
}

#[cfg(feature = "persistence")]
impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(path, err) => {
                write!(f, "sample cache io on {} failed: {}", path.display(), err)
            }
            CacheError::Format(path, err) => {
                write!(f, "sample cache {} is malformed: {}", path.display(), err)
            }
            CacheError::UnitMismatch {
                path,
                saved,
                expected,
            } => write!(
                f,
                "sample cache {} holds {:?} timestamps, clock counts {:?}",
                path.display(),
                saved,
                expected
            ),
        }
    }
}

#[cfg(feature = "persistence")]
impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(_, err) => Some(err),
            CacheError::Format(_, err) => Some(err),
            CacheError::UnitMismatch { .. } => None,
        }
    }
}

#[cfg(feature = "persistence")]
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    saved_at: DateTime<Utc>,
    // absent from files written before the unit was recorded
    #[serde(default)]
    unit: TimestampUnit,
    entries: BTreeMap<String, CachedSample>,
}

#[cfg(feature = "persistence")]
impl SampleCache {
    /// `<data dir>/metric-sampler/<name>.json`, if the platform has a data dir.
    pub fn default_path(name: &str) -> Option<PathBuf> {
        let mut path = dirs::data_dir()?;
        path.push("metric-sampler");
        path.push(format!("{}.json", name));
        Some(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let snapshot = CacheSnapshot {
            saved_at: Utc::now(),
            unit: self.unit(),
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| CacheError::Format(path.to_path_buf(), e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io(parent.to_path_buf(), e))?;
        }
        // replace the file atomically
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|e| CacheError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, path).map_err(|e| CacheError::Io(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Restores a saved cache. Fails with [`CacheError::UnitMismatch`] when
    /// the file's timestamps are not in `clock`'s unit.
    pub fn load(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let raw = fs::read(path).map_err(|e| CacheError::Io(path.to_path_buf(), e))?;
        let snapshot: CacheSnapshot =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Format(path.to_path_buf(), e))?;
        if snapshot.unit != clock.unit() {
            return Err(CacheError::UnitMismatch {
                path: path.to_path_buf(),
                saved: snapshot.unit,
                expected: clock.unit(),
            });
        }
        let cache = Self::with_clock(clock);
        for (key, sample) in snapshot.entries {
            cache.entries.insert(key, sample);
        }
        log::debug!(
            "loaded {} cached samples from {} (saved at {})",
            cache.len(),
            path.display(),
            snapshot.saved_at
        );
        Ok(cache)
    }

    /// Like [`SampleCache::load`], but a missing, unreadable or differently
    /// timed file yields an empty cache. Every key then starts over from a baseline reading.
    pub fn load_or_default(path: &Path, clock: Arc<dyn Clock>) -> Self {
        match Self::load(path, Arc::clone(&clock)) {
            Ok(cache) => cache,
            Err(CacheError::Io(_, err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Self::with_clock(clock)
            }
            Err(err) => {
                log::warn!("discarding sample cache: {}", err);
                Self::with_clock(clock)
            }
        }
    }
}
