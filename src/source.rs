//! Per-source playback pipeline: a producer thread that decodes into an
//! [`crate::ring_buffer`], a control-side [`SourceHandle`] for the calling
//! application, and the RT-visible [`Source`] the mixer pulls from on every
//! tick.
//!
//! Control fields (volume/tempo/pitch/loop) are plain atomics published with
//! `Release` from the control side and read with `Acquire` from the RT
//! thread, following the same split `realtime_audio.rs` uses between its
//! control-facing `AudioConfiguration` and the RT processing thread. Seeks
//! use a generation counter handshake between the producer thread and the RT
//! consumer so a seek can never be observed as a torn mix of pre- and
//! post-seek audio: the producer bumps `ack_generation` only once it has
//! actually repositioned the decoder, and the RT side flushes its ring
//! buffer the first time it notices `ack_generation` has moved.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use crate::decoder::Decoder;
use crate::effects::EffectChain;
use crate::error::{EngineError, Result};
use crate::ring_buffer::{self, Consumer};
use crate::time_stretch::{TimeStretchConfig, TimeStretchUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(Uuid);

impl SourceId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
    EndOfStream = 3,
    Error = 4,
}

impl PlaybackState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::EndOfStream,
            4 => Self::Error,
            _ => Self::Stopped,
        }
    }
}

struct SourceShared {
    state: AtomicU8,
    volume: AtomicU32,
    tempo: AtomicU32,
    pitch_semitones: AtomicU32,
    loop_enabled: AtomicBool,
    requested_generation: AtomicU64,
    ack_generation: AtomicU64,
    seek_target_frame: AtomicU64,
    frames_produced: AtomicU64,
    /// Fixed offset (frames) between this source's own timeline and the
    /// sync group master clock's: `effective_start = master_ts -
    /// start_offset_frames`. An atomic only so it can be changed before
    /// `play()`; nothing on the RT path depends on it changing mid-stream.
    start_offset_frames: AtomicU64,
    /// Source duration in frames, `None` for unbounded/live streams. Set
    /// once at construction from the decoder's `StreamInfo` and never
    /// written again.
    total_frames: Option<u64>,
    disposed: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl SourceShared {
    fn new(total_frames: Option<u64>) -> Self {
        Self {
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            volume: AtomicU32::new(1.0f32.to_bits()),
            tempo: AtomicU32::new(1.0f32.to_bits()),
            pitch_semitones: AtomicU32::new(0.0f32.to_bits()),
            loop_enabled: AtomicBool::new(false),
            requested_generation: AtomicU64::new(0),
            ack_generation: AtomicU64::new(0),
            seek_target_frame: AtomicU64::new(0),
            frames_produced: AtomicU64::new(0),
            start_offset_frames: AtomicU64::new(0),
            total_frames,
            disposed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }
}

/// Control-side reference to a source. Cheaply `Clone`, shares state with
/// the `Source` the mixer actually pulls samples from.
#[derive(Clone)]
pub struct SourceHandle {
    id: SourceId,
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn play(&self) {
        self.shared
            .state
            .store(PlaybackState::Playing as u8, Ordering::Release);
    }

    pub fn pause(&self) {
        self.shared
            .state
            .store(PlaybackState::Paused as u8, Ordering::Release);
    }

    pub fn stop(&self) {
        self.shared
            .state
            .store(PlaybackState::Stopped as u8, Ordering::Release);
        self.seek(0);
    }

    pub fn set_loop(&self, enabled: bool) {
        self.shared.loop_enabled.store(enabled, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume.load(Ordering::Acquire))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::Configuration(format!(
                "volume {volume} outside [0.0, 1.0]"
            )));
        }
        self.shared.volume.store(volume.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn tempo(&self) -> f32 {
        f32::from_bits(self.shared.tempo.load(Ordering::Acquire))
    }

    pub fn set_tempo(&self, tempo: f32) -> Result<()> {
        if !(crate::time_stretch::MIN_TEMPO..=crate::time_stretch::MAX_TEMPO).contains(&tempo) {
            return Err(EngineError::Configuration(format!(
                "tempo {tempo} outside supported range"
            )));
        }
        self.shared.tempo.store(tempo.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn pitch_semitones(&self) -> f32 {
        f32::from_bits(self.shared.pitch_semitones.load(Ordering::Acquire))
    }

    pub fn set_pitch_semitones(&self, semitones: f32) -> Result<()> {
        if !(crate::time_stretch::MIN_PITCH_SEMITONES..=crate::time_stretch::MAX_PITCH_SEMITONES)
            .contains(&semitones)
        {
            return Err(EngineError::Configuration(format!(
                "pitch {semitones} outside supported range"
            )));
        }
        self.shared
            .pitch_semitones
            .store(semitones.to_bits(), Ordering::Release);
        Ok(())
    }

    /// Requests a seek to `frame_position`. The producer thread performs the
    /// actual decoder seek asynchronously; playback position is not
    /// guaranteed to reflect the new target until `ack_generation` has
    /// caught up, which the RT side observes transparently.
    pub fn seek(&self, frame_position: u64) {
        self.shared
            .seek_target_frame
            .store(frame_position, Ordering::Release);
        self.shared
            .requested_generation
            .fetch_add(1, Ordering::AcqRel);
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.frames_produced.load(Ordering::Relaxed)
    }

    pub fn start_offset_frames(&self) -> u64 {
        self.shared.start_offset_frames.load(Ordering::Acquire)
    }

    /// Sets this source's timeline offset within a sync group: it starts
    /// emitting audio once the master clock reaches this many frames, and
    /// reports end-of-stream `start_offset_frames + source_duration` frames
    /// after that, rather than at frame zero.
    pub fn set_start_offset_frames(&self, frames: u64) {
        self.shared
            .start_offset_frames
            .store(frames, Ordering::Release);
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::Release);
    }
}

/// State the RT thread mutates on every tick: consumer cursor, WSOLA
/// working state and the last seek generation it observed. Split out of
/// `Source` so it can live behind an `UnsafeCell` while `Source` itself sits
/// behind a plain, shareable `Arc`.
struct SourceRtState {
    consumer: Consumer,
    stretch: TimeStretchUnit,
    /// This source's own fixed-order effect chain, applied after
    /// time-stretch and before the volume multiply. There is no
    /// post-mix chain on the bus; every effect lives here, per source.
    effects: EffectChain,
    last_seen_generation: u64,
}

/// RT-visible half of a source: held by the mixer's source list as
/// `Arc<Source>`, read every tick from the render thread.
///
/// `rt_state` is only ever touched through `&self` via `UnsafeCell`. This is
/// sound under the same single-reader invariant as `ring_buffer::Consumer`:
/// by construction, only the mixer's RT render thread ever calls
/// `read_samples`/`read_samples_at_time`, never the control thread and never
/// two render threads at once.
pub struct Source {
    id: SourceId,
    shared: Arc<SourceShared>,
    rt_state: std::cell::UnsafeCell<SourceRtState>,
    channels: usize,
    producer_thread: Option<JoinHandle<()>>,
}

unsafe impl Sync for Source {}

impl Source {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Fills `output` (interleaved, `frame_count * channels` samples) with
    /// this source's next block, applying volume/tempo/pitch as currently
    /// published. Never blocks or allocates.
    pub fn read_samples(&self, frame_count: usize, output: &mut [f32]) -> Result<()> {
        debug_assert_eq!(output.len(), frame_count * self.channels);
        // SAFETY: see the invariant documented on `Source`.
        let rt = unsafe { &mut *self.rt_state.get() };

        let ack = self.shared.ack_generation.load(Ordering::Acquire);
        if ack != rt.last_seen_generation {
            rt.consumer.flush();
            rt.stretch.reset();
            rt.last_seen_generation = ack;
        }

        if self.state() != PlaybackState::Playing {
            output.iter_mut().for_each(|s| *s = 0.0);
            return Ok(());
        }

        let tempo = f32::from_bits(self.shared.tempo.load(Ordering::Acquire));
        let pitch = f32::from_bits(self.shared.pitch_semitones.load(Ordering::Acquire));
        let volume = f32::from_bits(self.shared.volume.load(Ordering::Acquire));

        let consumer = &mut rt.consumer;
        let mut pull = |dst: &mut [f32]| consumer.read(dst);
        rt.stretch
            .process(tempo, pitch, &mut pull, output, frame_count)?;

        rt.effects.process(output);

        for sample in output.iter_mut() {
            *sample *= volume;
        }

        self.shared
            .frames_produced
            .fetch_add(frame_count as u64, Ordering::Relaxed);

        Ok(())
    }

    /// Reads a block expected to correspond to absolute sync-group master
    /// frame `master_ts`. Translates that into this source's own timeline
    /// via `start_offset_frames`: prepends silence for the portion of the
    /// block before this source's offset, and reports end-of-stream once
    /// the master clock has passed this source's own duration without
    /// looping. Otherwise nudges the source back in line first if its own
    /// progress has drifted past `tolerance_frames` from the target. Used
    /// by sync-group drift correction.
    pub fn read_samples_at_time(
        &self,
        master_ts: u64,
        tolerance_frames: u64,
        frame_count: usize,
        output: &mut [f32],
    ) -> Result<()> {
        debug_assert_eq!(output.len(), frame_count * self.channels);

        let start_offset = self.shared.start_offset_frames.load(Ordering::Acquire) as i64;
        let effective_start = master_ts as i64 - start_offset;

        if effective_start < 0 {
            let silence_frames = ((-effective_start) as u64).min(frame_count as u64) as usize;
            let silence_samples = silence_frames * self.channels;
            output[..silence_samples].iter_mut().for_each(|s| *s = 0.0);

            if silence_frames == frame_count {
                return Ok(());
            }

            return self.read_from_target(
                0,
                tolerance_frames,
                frame_count - silence_frames,
                &mut output[silence_samples..],
            );
        }

        let effective_start = effective_start as u64;

        if let Some(total) = self.shared.total_frames {
            let looping = self.shared.loop_enabled.load(Ordering::Acquire);
            if !looping && effective_start >= total {
                output.iter_mut().for_each(|s| *s = 0.0);
                self.shared
                    .state
                    .store(PlaybackState::EndOfStream as u8, Ordering::Release);
                return Ok(());
            }
        }

        self.read_from_target(effective_start, tolerance_frames, frame_count, output)
    }

    /// Drift-corrects toward `target_frame` in this source's own timeline,
    /// then reads normally. A corrective reseek resets `frames_produced` to
    /// the target so the next tick's drift measurement starts from zero
    /// instead of the stale, pre-correction count.
    fn read_from_target(
        &self,
        target_frame: u64,
        tolerance_frames: u64,
        frame_count: usize,
        output: &mut [f32],
    ) -> Result<()> {
        let produced = self.shared.frames_produced.load(Ordering::Relaxed);
        let drift = produced.abs_diff(target_frame);
        if drift > tolerance_frames {
            self.shared
                .seek_target_frame
                .store(target_frame, Ordering::Release);
            self.shared
                .requested_generation
                .fetch_add(1, Ordering::AcqRel);
            self.shared
                .frames_produced
                .store(target_frame, Ordering::Relaxed);
        }
        self.read_samples(frame_count, output)
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.shared.disposed.store(true, Ordering::Release);
        if let Some(handle) = self.producer_thread.take() {
            let _ = handle.join();
        }
    }
}

const PRODUCER_RING_CAPACITY: usize = 1 << 16;
const PRODUCER_DECODE_BLOCK: usize = 2048;
const PRODUCER_IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Builds a source from a decoder: spawns its producer thread and returns
/// the RT-visible [`Source`] plus the control-side [`SourceHandle`].
pub fn spawn_source(
    mut decoder: Box<dyn Decoder>,
    stretch_config: TimeStretchConfig,
) -> Result<(Source, SourceHandle)> {
    let info = decoder.stream_info();
    let channels = info.channels;
    let shared = Arc::new(SourceShared::new(info.total_frames));

    let (mut producer, consumer) = ring_buffer::spsc_ring(PRODUCER_RING_CAPACITY * channels);

    let producer_shared = shared.clone();
    let producer_thread = std::thread::Builder::new()
        .name("source-producer".into())
        .spawn(move || {
            let mut last_applied_generation = 0u64;
            let mut decode_buffer: Vec<f32> = Vec::new();

            loop {
                if producer_shared.disposed.load(Ordering::Acquire) {
                    let _ = decoder.dispose();
                    return;
                }

                let requested = producer_shared.requested_generation.load(Ordering::Acquire);
                if requested != last_applied_generation {
                    let target = producer_shared.seek_target_frame.load(Ordering::Acquire);
                    match decoder.seek(target) {
                        Ok(()) => {
                            last_applied_generation = requested;
                            producer_shared
                                .ack_generation
                                .store(requested, Ordering::Release);
                        }
                        Err(e) => {
                            *producer_shared.last_error.lock().unwrap() = Some(e.to_string());
                            producer_shared
                                .state
                                .store(PlaybackState::Error as u8, Ordering::Release);
                        }
                    }
                    continue;
                }

                let state = PlaybackState::from_u8(producer_shared.state.load(Ordering::Acquire));
                if state != PlaybackState::Playing {
                    std::thread::sleep(PRODUCER_IDLE_SLEEP);
                    continue;
                }

                if producer.writable() < PRODUCER_DECODE_BLOCK * channels {
                    std::thread::sleep(PRODUCER_IDLE_SLEEP);
                    continue;
                }

                match decoder.decode_next_frame() {
                    Ok(Some(frame)) => {
                        decode_buffer.clear();
                        decode_buffer.extend_from_slice(&frame.samples);
                        let mut written = 0;
                        while written < decode_buffer.len() {
                            let n = producer.write(&decode_buffer[written..]);
                            if n == 0 {
                                std::thread::sleep(PRODUCER_IDLE_SLEEP);
                                continue;
                            }
                            written += n;
                        }
                    }
                    Ok(None) => {
                        if producer_shared.loop_enabled.load(Ordering::Acquire) {
                            producer_shared.requested_generation.fetch_add(1, Ordering::AcqRel);
                            producer_shared.seek_target_frame.store(0, Ordering::Release);
                        } else {
                            producer_shared
                                .state
                                .store(PlaybackState::EndOfStream as u8, Ordering::Release);
                        }
                    }
                    Err(e) => {
                        *producer_shared.last_error.lock().unwrap() = Some(e.to_string());
                        producer_shared
                            .state
                            .store(PlaybackState::Error as u8, Ordering::Release);
                    }
                }
            }
        })
        .map_err(|e| EngineError::Backend(format!("spawning source producer thread: {e}")))?;

    let id = SourceId::new();
    let source = Source {
        id,
        shared: shared.clone(),
        rt_state: std::cell::UnsafeCell::new(SourceRtState {
            consumer,
            stretch: TimeStretchUnit::new(stretch_config)?,
            effects: EffectChain::default_chain(),
            last_seen_generation: 0,
        }),
        channels,
        producer_thread: Some(producer_thread),
    };
    let handle = SourceHandle { id, shared };

    Ok((source, handle))
}
