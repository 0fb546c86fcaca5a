//! The real-time mixer: owns the RT-visible source list behind an
//! `arc-swap` pointer (read with zero locking from the render callback,
//! swapped wholesale by the control thread on add/remove), sums sources
//! into a single accumulator, applies master volume, clamps once at the
//! end, and optionally feeds the result to a [`crate::recorder::Recorder`]
//! tap.
//!
//! Grounded in `other_examples`'s hand-rolled mixer (`MixerState::mix_into`
//! sums into an accumulator and clamps only the final mixed sample, never
//! intermediate per-source values) and in `realtime_audio.rs`'s
//! control/RT-thread split for everything that isn't the summing itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::backend::{Backend, BackendStreamInfo, RenderCallback};
use crate::clock::MasterClock;
use crate::error::{EngineError, Result};
use crate::metrics::MixerMetrics;
use crate::recorder::Recorder;
use crate::source::{PlaybackState, Source, SourceId};
use crate::sync_group::SyncGroup;

/// Hard cap on concurrently mixed sources; beyond this the RT tick's cost
/// stops being boundable within a single audio callback.
pub const MAX_SOURCES: usize = 25;

pub struct Mixer {
    sample_rate: u32,
    channels: usize,
    sources: Arc<ArcSwap<Vec<Arc<Source>>>>,
    master_volume: Arc<AtomicU32>,
    peak_left: Arc<AtomicU32>,
    peak_right: Arc<AtomicU32>,
    metrics: Arc<MixerMetrics>,
    recorder: Arc<ArcSwap<Option<Recorder>>>,
    sync_groups: Vec<SyncGroup>,
    /// The clocks driving every sync group, mirrored here in a flat,
    /// RT-cloneable list so the render callback can advance them every
    /// tick without needing access to `sync_groups`' full membership
    /// bookkeeping (which is control-thread-only, plain `Vec`/`HashSet`).
    clocks: Arc<std::sync::Mutex<Vec<Arc<MasterClock>>>>,
    /// Flat, RT-readable snapshot of which source belongs to which sync
    /// group's clock, rebuilt on every membership change. Mirrors the
    /// `clocks` field's reasoning: `sync_groups` itself stays a plain,
    /// control-thread-only `Vec`.
    sync_membership: Arc<ArcSwap<Vec<(SourceId, Arc<MasterClock>, u64)>>>,
    auto_drift_correction: Arc<AtomicBool>,
    backend: Option<Box<dyn Backend>>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            sources: Arc::new(ArcSwap::from_pointee(Vec::new())),
            master_volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
            peak_left: Arc::new(AtomicU32::new(0)),
            peak_right: Arc::new(AtomicU32::new(0)),
            metrics: Arc::new(MixerMetrics::new()),
            recorder: Arc::new(ArcSwap::from_pointee(None)),
            sync_groups: Vec::new(),
            clocks: Arc::new(std::sync::Mutex::new(Vec::new())),
            sync_membership: Arc::new(ArcSwap::from_pointee(Vec::new())),
            auto_drift_correction: Arc::new(AtomicBool::new(true)),
            backend: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn metrics(&self) -> &Arc<MixerMetrics> {
        &self.metrics
    }

    pub fn master_volume(&self) -> f32 {
        f32::from_bits(self.master_volume.load(Ordering::Acquire))
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::Configuration(format!(
                "master volume {volume} outside [0.0, 1.0]"
            )));
        }
        self.master_volume.store(volume.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn peak_levels(&self) -> (f32, f32) {
        (
            f32::from_bits(self.peak_left.load(Ordering::Acquire)),
            f32::from_bits(self.peak_right.load(Ordering::Acquire)),
        )
    }

    /// Adds a source to the RT-visible list: builds a new `Vec<Arc<Source>>`
    /// sharing every existing entry by reference count and appending the
    /// new one, then swaps it in atomically. Existing `Arc<Source>` clones
    /// already loaded by an in-flight render tick keep pointing at the old
    /// list's entries until that tick's guard drops, so this never races
    /// with the render thread. Control-thread only.
    pub fn add_source(&self, source: Source) -> Result<()> {
        if self.sources.load().len() >= MAX_SOURCES {
            return Err(EngineError::ResourceExhaustion(format!(
                "mixer already has the maximum of {MAX_SOURCES} sources"
            )));
        }
        let new_entry = Arc::new(source);
        self.sources.rcu(|sources| {
            let mut next: Vec<Arc<Source>> = sources.iter().cloned().collect();
            next.push(new_entry.clone());
            next
        });
        Ok(())
    }

    pub fn remove_source(&mut self, id: SourceId) -> bool {
        let existed = self.sources.load().iter().any(|s| s.id() == id);
        self.sources.rcu(|sources| {
            sources
                .iter()
                .filter(|s| s.id() != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        for group in &mut self.sync_groups {
            group.remove_member(id);
        }
        self.rebuild_sync_membership();
        existed
    }

    pub fn source_count(&self) -> usize {
        self.sources.load().len()
    }

    /// Creates a named sync group sharing one clock, with `members` already
    /// registered against it.
    pub fn create_sync_group(
        &mut self,
        name: impl Into<String>,
        members: &[SourceId],
    ) -> Arc<MasterClock> {
        let clock = Arc::new(MasterClock::new(self.sample_rate));
        let mut group = SyncGroup::new(name, clock.clone());
        for &id in members {
            group.add_member(id);
        }
        self.sync_groups.push(group);
        self.clocks.lock().unwrap().push(clock.clone());
        self.rebuild_sync_membership();
        clock
    }

    fn find_sync_group(&self, name: &str) -> Result<&SyncGroup> {
        self.sync_groups
            .iter()
            .find(|g| g.name() == name)
            .ok_or_else(|| EngineError::InvalidState(format!("no sync group named {name}")))
    }

    pub fn start_sync_group(&self, name: &str) -> Result<()> {
        self.find_sync_group(name)?.start();
        Ok(())
    }

    pub fn stop_sync_group(&self, name: &str) -> Result<()> {
        self.find_sync_group(name)?.stop();
        Ok(())
    }

    pub fn set_sync_group_tempo(&self, name: &str, tempo: f32) -> Result<()> {
        self.find_sync_group(name)?.set_tempo(tempo);
        Ok(())
    }

    pub fn set_sync_group_pitch(&self, name: &str, pitch_semitones: f32) -> Result<()> {
        self.find_sync_group(name)?.set_pitch(pitch_semitones);
        Ok(())
    }

    pub fn seek_sync_group(&self, name: &str, seconds: f64) -> Result<()> {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as u64;
        self.find_sync_group(name)?.seek(frame);
        Ok(())
    }

    pub fn get_sync_group_position(&self, name: &str) -> Result<f64> {
        let group = self.find_sync_group(name)?;
        Ok(group.target_frame() as f64 / self.sample_rate as f64)
    }

    pub fn add_to_sync_group(&mut self, name: &str, source_id: SourceId) -> Result<()> {
        self.sync_groups
            .iter_mut()
            .find(|g| g.name() == name)
            .ok_or_else(|| EngineError::InvalidState(format!("no sync group named {name}")))?
            .add_member(source_id);
        self.rebuild_sync_membership();
        Ok(())
    }

    pub fn remove_from_sync_group(&mut self, name: &str, source_id: SourceId) -> Result<()> {
        self.sync_groups
            .iter_mut()
            .find(|g| g.name() == name)
            .ok_or_else(|| EngineError::InvalidState(format!("no sync group named {name}")))?
            .remove_member(source_id);
        self.rebuild_sync_membership();
        Ok(())
    }

    pub fn set_sync_group_drift_tolerance(&mut self, name: &str, frames: u64) -> Result<()> {
        self.sync_groups
            .iter_mut()
            .find(|g| g.name() == name)
            .ok_or_else(|| EngineError::InvalidState(format!("no sync group named {name}")))?
            .set_drift_tolerance_frames(frames);
        self.rebuild_sync_membership();
        Ok(())
    }

    /// Whether automatic drift-correction seeks are scheduled for sync
    /// group members that have drifted past tolerance. Read with
    /// `Acquire` from the render thread every tick.
    pub fn enable_auto_drift_correction(&self, enabled: bool) {
        self.auto_drift_correction.store(enabled, Ordering::Release);
    }

    fn rebuild_sync_membership(&mut self) {
        let mut flat = Vec::new();
        for group in &self.sync_groups {
            for &id in group.members() {
                flat.push((id, group.clock().clone(), group.drift_tolerance_frames()));
            }
        }
        self.sync_membership.store(Arc::new(flat));
    }

    pub fn attach_recorder(&self, recorder: Recorder) {
        self.recorder.store(Arc::new(Some(recorder)));
    }

    pub fn detach_recorder(&self) {
        self.recorder.store(Arc::new(None));
    }

    pub fn start_with_backend(&mut self, mut backend: Box<dyn Backend>) -> Result<BackendStreamInfo> {
        let sources = self.sources.clone();
        let master_volume = self.master_volume.clone();
        let peak_left = self.peak_left.clone();
        let peak_right = self.peak_right.clone();
        let metrics = self.metrics.clone();
        let recorder = self.recorder.clone();
        let clocks = self.clocks.clone();
        let sync_membership = self.sync_membership.clone();
        let auto_drift_correction = self.auto_drift_correction.clone();
        let channels = self.channels;
        // Owned by the closure, reused tick to tick: allocating a fresh
        // per-source scratch buffer on every RT callback would violate the
        // no-allocation rule. Only grows (once) if the backend's block size
        // changes between calls, which it shouldn't for a live stream.
        let mut scratch: Vec<f32> = Vec::new();

        let callback: RenderCallback = Box::new(move |output: &mut [f32]| {
            render_tick(
                output,
                channels,
                &sources,
                &master_volume,
                &peak_left,
                &peak_right,
                &metrics,
                &recorder,
                &clocks,
                &sync_membership,
                &auto_drift_correction,
                &mut scratch,
            );
        });

        let info = backend.start(callback)?;
        self.backend = Some(backend);
        Ok(info)
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(backend) = self.backend.as_mut() {
            backend.stop()?;
        }
        Ok(())
    }

    /// Stops the backend and releases every source. Each source's producer
    /// thread is joined as its last `Arc<Source>` clone drops; any clone
    /// still held by an in-flight render tick keeps it alive until that
    /// tick finishes.
    pub fn dispose(&mut self) -> Result<()> {
        self.stop()?;
        self.sources.store(Arc::new(Vec::new()));
        self.detach_recorder();
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn render_tick(
    output: &mut [f32],
    channels: usize,
    sources: &Arc<ArcSwap<Vec<Arc<Source>>>>,
    master_volume: &Arc<AtomicU32>,
    peak_left: &Arc<AtomicU32>,
    peak_right: &Arc<AtomicU32>,
    metrics: &Arc<MixerMetrics>,
    recorder: &Arc<ArcSwap<Option<Recorder>>>,
    clocks: &Arc<std::sync::Mutex<Vec<Arc<MasterClock>>>>,
    sync_membership: &Arc<ArcSwap<Vec<(SourceId, Arc<MasterClock>, u64)>>>,
    auto_drift_correction: &Arc<AtomicBool>,
    scratch: &mut Vec<f32>,
) {
    output.iter_mut().for_each(|s| *s = 0.0);
    let frame_count = output.len() / channels.max(1);
    if scratch.len() != output.len() {
        scratch.resize(output.len(), 0.0);
    }

    let guard = sources.load();
    let membership = sync_membership.load();
    let correcting = auto_drift_correction.load(Ordering::Acquire);

    for source in guard.iter() {
        if source.state() != PlaybackState::Playing {
            continue;
        }
        scratch.iter_mut().for_each(|s| *s = 0.0);

        let member = membership.iter().find(|(id, _, _)| *id == source.id());
        let result = if let Some((_, clock, tolerance)) = member {
            let target = clock.frame_position();
            let tolerance = if correcting { *tolerance } else { u64::MAX };
            source.read_samples_at_time(target, tolerance, frame_count, &mut *scratch)
        } else {
            source.read_samples(frame_count, &mut *scratch)
        };

        if result.is_err() {
            metrics.record_dropout(source.id());
            continue;
        }
        for (mixed, sample) in output.iter_mut().zip(scratch.iter()) {
            *mixed += sample;
        }
    }

    let volume = f32::from_bits(master_volume.load(Ordering::Acquire));
    for sample in output.iter_mut() {
        *sample *= volume;
    }

    let mut peak_l = 0.0f32;
    let mut peak_r = 0.0f32;
    for (i, sample) in output.iter_mut().enumerate() {
        *sample = sample.clamp(-1.0, 1.0);
        if channels >= 2 {
            if i % channels == 0 {
                peak_l = peak_l.max(sample.abs());
            } else if i % channels == 1 {
                peak_r = peak_r.max(sample.abs());
            }
        } else {
            peak_l = peak_l.max(sample.abs());
        }
    }
    peak_left.store(peak_l.to_bits(), Ordering::Release);
    peak_right.store(peak_r.to_bits(), Ordering::Release);
    metrics.record_tick(frame_count, guard.len());

    if let Some(rec) = recorder.load().as_ref() {
        rec.push(output);
    }

    for clock in clocks.lock().unwrap().iter() {
        clock.advance(frame_count as u64);
    }
}
