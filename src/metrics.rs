//! Performance counters the engine can actually produce from inside its own
//! code, scoped down from `monitoring.rs`'s much broader `HealthMonitor` /
//! `PerformanceMetrics` pair (which also tracked network and UI health —
//! both external collaborators here). Every field is a plain atomic updated
//! from the RT thread with `Relaxed` ordering; readers on the control side
//! get an eventually-consistent snapshot, which is all a meter display or
//! log line needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::source::SourceId;

/// A point-in-time, serializable copy of [`MixerMetrics`], for a host
/// application to log or expose on a diagnostics endpoint. Modeled on
/// `monitoring.rs`'s `Serialize`-derived health-status structs, here
/// produced on demand rather than pushed over the network.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub frames_rendered: u64,
    pub total_dropouts: u64,
    pub last_tick_source_count: usize,
    pub uptime_secs: f64,
}

/// Running counters for the mixer as a whole.
pub struct MixerMetrics {
    ticks: AtomicU64,
    frames_rendered: AtomicU64,
    total_dropouts: AtomicU64,
    per_source_dropouts: Mutex<HashMap<SourceId, u64>>,
    last_tick_source_count: AtomicU64,
    started_at: Instant,
}

impl MixerMetrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            total_dropouts: AtomicU64::new(0),
            per_source_dropouts: Mutex::new(HashMap::new()),
            last_tick_source_count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub(crate) fn record_tick(&self, frame_count: usize, source_count: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.frames_rendered
            .fetch_add(frame_count as u64, Ordering::Relaxed);
        self.last_tick_source_count
            .store(source_count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_dropout(&self, source_id: SourceId) {
        self.total_dropouts.fetch_add(1, Ordering::Relaxed);
        let mut per_source = self.per_source_dropouts.lock().unwrap();
        *per_source.entry(source_id).or_insert(0) += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn total_dropouts(&self) -> u64 {
        self.total_dropouts.load(Ordering::Relaxed)
    }

    pub fn dropouts_for(&self, source_id: SourceId) -> u64 {
        self.per_source_dropouts
            .lock()
            .unwrap()
            .get(&source_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_tick_source_count(&self) -> usize {
        self.last_tick_source_count.load(Ordering::Relaxed) as usize
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks(),
            frames_rendered: self.frames_rendered(),
            total_dropouts: self.total_dropouts(),
            last_tick_source_count: self.last_tick_source_count(),
            uptime_secs: self.uptime().as_secs_f64(),
        }
    }

    /// Serializes [`Self::snapshot`] to a JSON string, for a host
    /// application's logging or status-endpoint use.
    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

impl Default for MixerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling estimate of a single source's RT-thread CPU cost, expressed as a
/// fraction of the available callback budget (`block_duration`). Updated by
/// whichever code wraps a source's `read_samples` call with timing — not
/// the RT callback itself, since even a clock read has overhead better kept
/// out of the hot path on every tick; the mixer samples every Nth tick in
/// practice (see `AudioEngine`).
#[derive(Debug, Default)]
pub struct SourceCpuEstimate {
    last_fraction: AtomicU64,
}

impl SourceCpuEstimate {
    pub fn new() -> Self {
        Self {
            last_fraction: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed: Duration, block_duration: Duration) {
        let fraction = if block_duration.is_zero() {
            0.0
        } else {
            elapsed.as_secs_f64() / block_duration.as_secs_f64()
        };
        self.last_fraction
            .store(fraction.to_bits(), Ordering::Relaxed);
    }

    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.last_fraction.load(Ordering::Relaxed))
    }
}
