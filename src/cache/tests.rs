#![cfg(test)]

use super::{CachedSample, Clock, ManualClock, SampleCache};
use std::sync::Arc;

fn manual_cache(start: i64) -> (Arc<ManualClock>, SampleCache) {
    let clock = Arc::new(ManualClock::new(start));
    let cache = SampleCache::with_clock(clock.clone());
    (clock, cache)
}

#[test]
fn get_on_unseen_key_is_none() {
    let (_, cache) = manual_cache(0);
    assert!(cache.get("host1_net_bytes").is_none());
    assert!(cache.is_empty());
}

#[test]
fn set_returns_clock_time_and_overwrites() {
    let (clock, cache) = manual_cache(100);
    assert_eq!(cache.set("k", 1.5), 100);
    clock.set(107);
    assert_eq!(cache.set("k", 3.0), 107);

    assert_eq!(
        cache.get("k"),
        Some(CachedSample {
            value: 3.0,
            timestamp: 107
        })
    );
    assert_eq!(cache.len(), 1);
}

#[test]
fn swap_hands_back_previous_reading() {
    let (clock, cache) = manual_cache(10);
    let (previous, ts) = cache.swap("cpu", 10.0);
    assert!(previous.is_none());
    assert_eq!(ts, 10);

    clock.advance(5);
    let (previous, ts) = cache.swap("cpu", 30.0);
    assert_eq!(
        previous,
        Some(CachedSample {
            value: 10.0,
            timestamp: 10
        })
    );
    assert_eq!(ts, 15);
    assert_eq!(cache.get("cpu").map(|s| s.value), Some(30.0));
}

#[test]
fn evict_older_than_keeps_recent_entries() {
    let (clock, cache) = manual_cache(0);
    cache.set("old", 1.0);
    clock.set(50);
    cache.set("fresh", 2.0);

    assert_eq!(cache.evict_older_than(25), 1);
    assert_eq!(cache.keys(), vec!["fresh".to_string()]);
}

#[test]
fn remove_and_clear() {
    let (_, cache) = manual_cache(0);
    cache.set("a", 1.0);
    cache.set("b", 2.0);
    assert_eq!(cache.remove("a").map(|s| s.value), Some(1.0));
    assert!(cache.remove("a").is_none());
    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn manual_clock_advance_reports_new_time() {
    let clock = ManualClock::new(3);
    assert_eq!(clock.advance(4), 7);
    assert_eq!(clock.now(), 7);
}

#[cfg(feature = "persistence")]
mod persistence {
    use super::super::{CacheError, SampleCache};
    use super::manual_cache;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    use crate::cache::{ManualClock, SystemClock, TimestampUnit};

    #[test]
    fn save_then_load_keeps_values_and_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let (clock, cache) = manual_cache(1_000);
        cache.set("host1_net_bytes", 150.0);
        clock.set(1_005);
        cache.set("cpu", 30.0);
        cache.save(&path).unwrap();

        let restored = SampleCache::load(&path, Arc::new(ManualClock::new(2_000))).unwrap();
        assert_eq!(restored.len(), 2);
        let bytes = restored.get("host1_net_bytes").unwrap();
        assert_eq!(bytes.value, 150.0);
        assert_eq!(bytes.timestamp, 1_000);
        assert_eq!(restored.get("cpu").unwrap().timestamp, 1_005);
        assert!(!dir.path().join("nested").join("cache.json.tmp").exists());
    }

    #[test]
    fn load_refuses_timestamps_in_another_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let (_, cache) = manual_cache(1_000);
        cache.set("host1_disk_io_bytes", 1_000.0);
        cache.save(&path).unwrap();

        let millis = Arc::new(SystemClock::new(TimestampUnit::Milliseconds));
        let err = SampleCache::load(&path, millis.clone())
            .err()
            .expect("unit mismatch must fail");
        assert!(matches!(
            err,
            CacheError::UnitMismatch {
                saved: TimestampUnit::Seconds,
                expected: TimestampUnit::Milliseconds,
                ..
            }
        ));

        // the rate after a restart starts over instead of mixing units
        let restored = SampleCache::load_or_default(&path, millis);
        assert!(restored.is_empty());
        assert_eq!(restored.unit(), TimestampUnit::Milliseconds);
    }

    #[test]
    fn load_accepts_matching_unit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        let clock = Arc::new(ManualClock::with_unit(5_000, TimestampUnit::Milliseconds));
        let cache = SampleCache::with_clock(clock.clone());
        cache.set("cpu", 3.0);
        cache.save(&path).unwrap();

        let restored = SampleCache::load(&path, clock).unwrap();
        assert_eq!(restored.get("cpu").map(|s| s.timestamp), Some(5_000));
    }

    #[test]
    fn snapshot_without_unit_is_read_as_seconds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{"saved_at": "2026-01-01T00:00:00Z", "entries": {"cpu": {"value": 1.0, "timestamp": 7}}}"#,
        )
        .unwrap();

        let restored = SampleCache::load(&path, Arc::new(ManualClock::new(0))).unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn load_reports_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, b"not json").unwrap();

        let err = SampleCache::load(&path, Arc::new(ManualClock::new(0)))
            .err()
            .expect("malformed cache must fail");
        assert!(matches!(err, CacheError::Format(_, _)));
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn load_or_default_starts_empty_when_missing_or_corrupt() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(SampleCache::load_or_default(&missing, Arc::new(ManualClock::new(0))).is_empty());

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, b"{").unwrap();
        assert!(SampleCache::load_or_default(&corrupt, Arc::new(ManualClock::new(0))).is_empty());
    }

    #[test]
    fn default_path_ends_with_cache_name() {
        if let Some(path) = SampleCache::default_path("nginx") {
            assert!(path.ends_with("metric-sampler/nginx.json"));
        }
    }
}
