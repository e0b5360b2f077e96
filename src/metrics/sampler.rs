use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::{Notify, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::set::MetricSet;
use super::types::{MetricError, Observation};
use crate::cache::SampleCache;
use crate::config::SamplerConfig;

/// Raw readings for one entity within one record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityReading {
    pub event_type: String,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

impl EntityReading {
    pub fn new(event_type: &str, entity_name: Option<&str>) -> Self {
        EntityReading {
            event_type: event_type.to_string(),
            entity_name: entity_name.map(str::to_string),
            observations: Vec::new(),
        }
    }

    pub fn with(mut self, observation: Observation) -> Self {
        self.observations.push(observation);
        self
    }
}

/// Produces the raw readings of one collection cycle.
pub trait Source: Send + 'static {
    fn collect(&mut self) -> Vec<EntityReading>;
}

impl<F> Source for F
where
    F: FnMut() -> Vec<EntityReading> + Send + 'static,
{
    fn collect(&mut self) -> Vec<EntityReading> {
        self()
    }
}

/// Receives the finished sets of one collection cycle.
pub trait Emitter: Send + 'static {
    fn emit(&mut self, sets: Vec<MetricSet>);
}

impl<F> Emitter for F
where
    F: FnMut(Vec<MetricSet>) + Send + 'static,
{
    fn emit(&mut self, sets: Vec<MetricSet>) {
        self(sets)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CycleReport {
    pub captured_at: DateTime<Utc>,
    pub sets: usize,
    pub stored: usize,
    pub invalid: usize,
    pub counter_resets: usize,
    pub too_close: usize,
    pub evicted: usize,
}

impl CycleReport {
    fn new() -> Self {
        CycleReport {
            captured_at: Utc::now(),
            sets: 0,
            stored: 0,
            invalid: 0,
            counter_resets: 0,
            too_close: 0,
            evicted: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.invalid + self.counter_resets + self.too_close
    }

    fn record(&mut self, err: &MetricError) {
        match err {
            MetricError::CounterReset { .. } => {
                info!("{}", err);
                self.counter_resets += 1;
            }
            MetricError::SamplesTooClose { .. } => {
                debug!("{}", err);
                self.too_close += 1;
            }
            _ => {
                warn!("dropping metric: {}", err);
                self.invalid += 1;
            }
        }
    }
}

/// Runs one collection cycle: builds a set per entity, emits them, then
/// evicts stale baselines and persists the cache as configured.
pub fn run_cycle(
    config: &SamplerConfig,
    cache: &Arc<SampleCache>,
    source: &mut dyn Source,
    emitter: &mut dyn Emitter,
) -> CycleReport {
    let mut report = CycleReport::new();
    let mut sets = Vec::new();

    for reading in source.collect() {
        let mut set = MetricSet::new(&reading.event_type, Arc::clone(cache))
            .require_entity_context(config.require_entity_context);
        if let Some(entity) = reading.entity_name.as_deref() {
            set.set_entity_name(entity);
        }
        let submitted = reading.observations.len();
        let errors = set.apply(reading.observations);
        for err in &errors {
            report.record(err);
        }
        report.stored += submitted - errors.len();
        sets.push(set);
    }

    report.sets = sets.len();
    emitter.emit(sets);

    if let Some(window) = config.eviction_window() {
        report.evicted = cache.evict_older_than(cache.now().saturating_sub(window));
    }

    #[cfg(feature = "persistence")]
    if let Some(path) = config.resolved_cache_path() {
        if let Err(err) = cache.save(&path) {
            warn!("sample cache not persisted: {}", err);
        }
    }

    report
}

/// Background collection loop on a tokio interval. Cycles never overlap, so
/// no two cycles touch the same sampling key at once. Each cycle runs on the
/// blocking pool since sources and cache persistence do synchronous I/O.
///
/// Spawned outside a runtime, the handle owns a private one. Dropping the
/// handle stops the loop and, if owned, shuts that runtime down without
/// waiting, so it may be dropped from async code as well.
pub struct SamplerHandle {
    last_report: Arc<RwLock<Option<CycleReport>>>,
    ready: Arc<AtomicBool>,
    notify_ready: Arc<Notify>,
    cancel: CancellationToken,
    runtime: Option<tokio::runtime::Runtime>,
}

impl SamplerHandle {
    pub fn spawn<S, E>(
        config: SamplerConfig,
        cache: Arc<SampleCache>,
        source: S,
        emitter: E,
    ) -> std::io::Result<Self>
    where
        S: Source,
        E: Emitter,
    {
        let last_report = Arc::new(RwLock::new(None));
        let ready = Arc::new(AtomicBool::new(false));
        let notify_ready = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let inner = SamplerInner {
            config: Arc::new(config),
            cache,
            last_report: Arc::clone(&last_report),
            ready: Arc::clone(&ready),
            notify_ready: Arc::clone(&notify_ready),
            cancel: cancel.clone(),
        };

        let fut = inner.run(source, emitter);

        let runtime_guard = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(fut);
                None
            }
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()?;
                runtime.spawn(fut);
                Some(runtime)
            }
        };

        Ok(SamplerHandle {
            last_report,
            ready,
            notify_ready,
            cancel,
            runtime: runtime_guard,
        })
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().await.clone()
    }

    /// Resolves once the first cycle has been emitted.
    pub async fn wait_until_ready(&self) {
        let notified = self.notify_ready.notified();
        if self.ready.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct SamplerInner {
    config: Arc<SamplerConfig>,
    cache: Arc<SampleCache>,
    last_report: Arc<RwLock<Option<CycleReport>>>,
    ready: Arc<AtomicBool>,
    notify_ready: Arc<Notify>,
    cancel: CancellationToken,
}

impl SamplerInner {
    async fn run<S: Source, E: Emitter>(self, mut source: S, mut emitter: E) {
        let mut ticker = interval(self.config.collection_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {}
            }

            let config = Arc::clone(&self.config);
            let cache = Arc::clone(&self.cache);
            let cycle = tokio::task::spawn_blocking(move || {
                let report = run_cycle(&config, &cache, &mut source, &mut emitter);
                (source, emitter, report)
            });
            let report = match cycle.await {
                Ok((next_source, next_emitter, report)) => {
                    source = next_source;
                    emitter = next_emitter;
                    report
                }
                Err(err) => {
                    warn!("collection cycle aborted, sampler stopping: {}", err);
                    break;
                }
            };

            if report.failed() > 0 {
                debug!(
                    "cycle stored {} metrics, {} failed",
                    report.stored,
                    report.failed()
                );
            }
            *self.last_report.write().await = Some(report);
            if !self.ready.swap(true, Ordering::SeqCst) {
                self.notify_ready.notify_waiters();
            }
        }
    }
}
