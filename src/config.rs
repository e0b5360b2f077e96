// src/config.rs

use serde::{Deserialize, Serialize};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{SampleCache, SystemClock, TimestampUnit};

/// Names a JSON file holding a `SamplerConfig`.
pub const CONFIG_ENV: &str = "METRIC_SAMPLER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplerConfig {
    // Sampling
    pub timestamp_unit: TimestampUnit,     // Default: seconds
    pub require_entity_context: bool,      // Default: false

    // Collection loop
    pub collection_interval_ms: u64,       // Default: 15000

    // Cache lifetime
    pub cache_name: String,                // Default: "metric-sampler"
    pub cache_path: Option<PathBuf>,       // Default: <data dir>/metric-sampler/<cache_name>.json
    pub persist_cache: bool,               // Default: true
    pub evict_after_secs: Option<u64>,     // Default: never
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            timestamp_unit: TimestampUnit::Seconds,
            require_entity_context: false,
            collection_interval_ms: 15_000,
            cache_name: "metric-sampler".to_string(),
            cache_path: None,
            persist_cache: true,
            evict_after_secs: None,
        }
    }
}

impl SamplerConfig {
    /// Reads the file named by `METRIC_SAMPLER_CONFIG`, or the defaults when
    /// the variable is unset.
    pub fn load() -> Result<Self, String> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read sampler config {}: {}", path.display(), e))?;
        let config: SamplerConfig = serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse sampler config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.collection_interval_ms == 0 {
            return Err("collection_interval_ms must be greater than zero".to_string());
        }
        if self.cache_name.is_empty() {
            return Err("cache_name must not be empty".to_string());
        }
        Ok(())
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_millis(self.collection_interval_ms)
    }

    /// Where the sample cache is persisted, if persistence is on and a path
    /// can be resolved.
    pub fn resolved_cache_path(&self) -> Option<PathBuf> {
        if !self.persist_cache {
            return None;
        }
        self.cache_path
            .clone()
            .or_else(|| default_cache_path(&self.cache_name))
    }

    /// Eviction cutoff expressed in the cache's timestamp unit.
    pub fn eviction_window(&self) -> Option<i64> {
        let secs = i64::try_from(self.evict_after_secs?).ok()?;
        let per_sec: i64 = match self.timestamp_unit {
            TimestampUnit::Seconds => 1,
            TimestampUnit::Milliseconds => 1_000,
            TimestampUnit::Nanoseconds => 1_000_000_000,
        };
        secs.checked_mul(per_sec)
    }

    /// A cache on the wall clock, restored from disk when a persisted copy
    /// exists.
    pub fn open_cache(&self) -> Arc<SampleCache> {
        let clock = Arc::new(SystemClock::new(self.timestamp_unit));
        #[cfg(feature = "persistence")]
        if let Some(path) = self.resolved_cache_path() {
            return Arc::new(SampleCache::load_or_default(&path, clock));
        }
        Arc::new(SampleCache::with_clock(clock))
    }
}

#[cfg(feature = "persistence")]
fn default_cache_path(name: &str) -> Option<PathBuf> {
    SampleCache::default_path(name)
}

#[cfg(not(feature = "persistence"))]
fn default_cache_path(_name: &str) -> Option<PathBuf> {
    None
}

// Global configuration
lazy_static! {
    pub static ref SAMPLER_CONFIG: SamplerConfig = SamplerConfig::load().unwrap_or_else(|err| {
        log::warn!("{}, using defaults", err);
        SamplerConfig::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = SamplerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.collection_interval(), Duration::from_secs(15));
        assert_eq!(config.eviction_window(), None);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        fs::write(
            &path,
            r#"{"timestamp_unit": "milliseconds", "evict_after_secs": 600}"#,
        )
        .unwrap();

        let config = SamplerConfig::from_file(&path).unwrap();
        assert_eq!(config.timestamp_unit, TimestampUnit::Milliseconds);
        assert_eq!(config.eviction_window(), Some(600_000));
        assert_eq!(config.collection_interval_ms, 15_000);
        assert!(config.persist_cache);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.json");
        fs::write(&path, r#"{"collection_interval_ms": 0}"#).unwrap();

        let err = SamplerConfig::from_file(&path).unwrap_err();
        assert!(err.contains("collection_interval_ms"));
    }

    #[test]
    fn persistence_disabled_has_no_cache_path() {
        let config = SamplerConfig {
            persist_cache: false,
            cache_path: Some(PathBuf::from("/tmp/never.json")),
            ..SamplerConfig::default()
        };
        assert_eq!(config.resolved_cache_path(), None);
    }

    #[test]
    fn global_config_falls_back_to_defaults() {
        // unit tests never set METRIC_SAMPLER_CONFIG
        assert_eq!(*SAMPLER_CONFIG, SamplerConfig::default());
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn open_cache_restores_persisted_samples() {
        use crate::cache::ManualClock;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.json");
        let seeded = SampleCache::with_clock(Arc::new(ManualClock::new(5)));
        seeded.set("host1_net_bytes", 150.0);
        seeded.save(&path).unwrap();

        let config = SamplerConfig {
            cache_path: Some(path),
            ..SamplerConfig::default()
        };
        let cache = config.open_cache();
        assert_eq!(cache.get("host1_net_bytes").map(|s| s.value), Some(150.0));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn open_cache_drops_samples_saved_in_another_unit() {
        use crate::cache::ManualClock;
        use crate::metrics::{MetricSet, SourceType};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.json");
        let seeded = SampleCache::with_clock(Arc::new(ManualClock::new(1_000)));
        seeded.set("host1_disk_io_bytes", 1_000.0);
        seeded.save(&path).unwrap();

        let config = SamplerConfig {
            timestamp_unit: TimestampUnit::Milliseconds,
            cache_path: Some(path),
            ..SamplerConfig::default()
        };
        let cache = config.open_cache();
        assert!(cache.is_empty());

        let mut set = MetricSet::new("disk", cache);
        set.set_entity_name("host1");
        set.set_metric("io_bytes", 1_000_000_000_i64, SourceType::Rate)
            .unwrap();
        assert_eq!(set.get_number("io_bytes"), Some(0.0));
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn explicit_cache_path_wins() {
        let config = SamplerConfig {
            cache_path: Some(PathBuf::from("/var/lib/agent/samples.json")),
            ..SamplerConfig::default()
        };
        assert_eq!(
            config.resolved_cache_path(),
            Some(PathBuf::from("/var/lib/agent/samples.json"))
        );
    }
}
