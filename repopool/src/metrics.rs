//! In-process counters and timers for pool observability.
//!
//! These primitives back the per-component metric structs consumed by
//! operators: allocation, deallocation, claim, and release latencies, plus
//! failure and invalidation counters. Exporting them to an external metrics
//! system is a deployment concern outside this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::chain::Stage;

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Adds one.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Duration tracker keeping a bounded window of recent samples.
#[derive(Debug, Default)]
pub struct Timer {
    samples: Arc<RwLock<Vec<Duration>>>,
}

const MAX_TIMER_SAMPLES: usize = 1000;

impl Timer {
    /// Creates an empty timer.
    pub fn new() -> Self {
        Self {
            samples: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Records one duration sample.
    pub fn record(&self, duration: Duration) {
        if let Ok(mut samples) = self.samples.write() {
            samples.push(duration);
            // Keep only the most recent samples to prevent memory growth
            if samples.len() > MAX_TIMER_SAMPLES {
                let drain_count = samples.len() - MAX_TIMER_SAMPLES;
                samples.drain(0..drain_count);
            }
        }
    }

    /// Times an async operation and records its duration.
    pub async fn time_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let start = Instant::now();
        let result = f().await;
        self.record(start.elapsed());
        result
    }

    /// Number of recorded samples (bounded by the window size).
    pub fn count(&self) -> usize {
        self.samples.read().map(|samples| samples.len()).unwrap_or(0)
    }

    /// Mean of the recorded samples, if any.
    pub fn mean(&self) -> Option<Duration> {
        let samples = self.samples.read().ok()?;
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / u32::try_from(samples.len()).unwrap_or(1))
    }

    /// The given percentile of the recorded samples, if any.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let mut samples = self.samples.read().ok()?.clone();
        if samples.is_empty() {
            return None;
        }
        samples.sort();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((samples.len() as f64 - 1.0) * p / 100.0).round() as usize;
        samples.get(index).copied()
    }

    /// 99th percentile of the recorded samples.
    pub fn p99(&self) -> Option<Duration> {
        self.percentile(99.0)
    }
}

/// Create/close timer pairs for each of the five chain stages.
#[derive(Debug, Default)]
pub struct StageTimers {
    create: [Timer; 5],
    close: [Timer; 5],
}

impl StageTimers {
    /// Records the duration of one stage acquisition.
    pub fn record_create(&self, stage: Stage, duration: Duration) {
        self.create[stage.index()].record(duration);
    }

    /// Records the duration of one stage close.
    pub fn record_close(&self, stage: Stage, duration: Duration) {
        self.close[stage.index()].record(duration);
    }

    /// The acquisition timer for a stage.
    pub const fn create(&self, stage: Stage) -> &Timer {
        &self.create[stage.index()]
    }

    /// The close timer for a stage.
    pub const fn close(&self, stage: Stage) -> &Timer {
        &self.close[stage.index()]
    }
}

/// Metrics recorded by the chain factory.
#[derive(Debug, Default)]
pub struct FactoryMetrics {
    /// Per-stage create/close latencies.
    pub stages: StageTimers,
    /// Chains built to completion.
    pub creations: Counter,
    /// Chain creations that failed and unwound.
    pub creation_failures: Counter,
    /// Complete chains destroyed.
    pub destructions: Counter,
}

/// Metrics recorded by the chain allocator.
#[derive(Debug, Default)]
pub struct AllocatorMetrics {
    /// End-to-end allocation latency (full five-stage handshake).
    pub allocation: Timer,
    /// End-to-end deallocation latency, measured on the teardown worker.
    pub deallocation: Timer,
    /// Allocations that failed.
    pub allocation_failures: Counter,
}

/// Metrics recorded by the pool and facade.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Claim latency including any inline allocation.
    pub claim: Timer,
    /// Release latency (never includes remote teardown).
    pub release: Timer,
    /// Claims that timed out waiting for capacity.
    pub claims_exhausted: Counter,
    /// Pool-wide invalidations triggered by the self-cleaning policy.
    pub invalidations: Counter,
    /// Entries retired because their deadline had passed.
    pub expired_retired: Counter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_increments() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn timer_records_and_aggregates() {
        let timer = Timer::new();
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));
        assert_eq!(timer.count(), 2);
        assert_eq!(timer.mean(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn timer_window_is_bounded() {
        let timer = Timer::new();
        for _ in 0..(MAX_TIMER_SAMPLES + 100) {
            timer.record(Duration::from_micros(1));
        }
        assert_eq!(timer.count(), MAX_TIMER_SAMPLES);
    }

    #[test]
    fn time_async_records_one_sample() {
        let timer = Timer::new();
        let result = tokio_test::block_on(timer.time_async(|| async { 7 }));
        assert_eq!(result, 7);
        assert_eq!(timer.count(), 1);
    }

    #[test]
    fn stage_timers_index_by_stage() {
        let timers = StageTimers::default();
        timers.record_create(Stage::Repository, Duration::from_millis(5));
        assert_eq!(timers.create(Stage::Repository).count(), 1);
        assert_eq!(timers.create(Stage::Transport).count(), 0);
        assert_eq!(timers.close(Stage::Repository).count(), 0);
    }
}
