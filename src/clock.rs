//! Master clock: the shared frame-position timeline that sync groups and,
//! transitively, their member sources are kept aligned against.
//!
//! All fields are plain atomics so the RT thread can read the current
//! position every tick without ever taking a lock; only the control thread
//! (via the methods below) ever mutates them, matching the control/RT split
//! used throughout `source.rs`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Running,
    Paused,
}

pub struct MasterClock {
    sample_rate: u32,
    frame_position: AtomicU64,
    tempo: AtomicU32,
    pitch: AtomicU32,
    running: AtomicBool,
    paused: AtomicBool,
    loop_start: AtomicU64,
    loop_end: AtomicU64,
    loop_enabled: AtomicBool,
}

impl MasterClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_position: AtomicU64::new(0),
            tempo: AtomicU32::new(1.0f32.to_bits()),
            pitch: AtomicU32::new(0.0f32.to_bits()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            loop_start: AtomicU64::new(0),
            loop_end: AtomicU64::new(0),
            loop_enabled: AtomicBool::new(false),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_position(&self) -> u64 {
        self.frame_position.load(Ordering::Acquire)
    }

    pub fn tempo(&self) -> f32 {
        f32::from_bits(self.tempo.load(Ordering::Acquire))
    }

    pub fn state(&self) -> ClockState {
        if !self.running.load(Ordering::Acquire) {
            ClockState::Stopped
        } else if self.paused.load(Ordering::Acquire) {
            ClockState::Paused
        } else {
            ClockState::Running
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.frame_position.store(0, Ordering::Release);
    }

    pub fn seek(&self, frame_position: u64) {
        self.frame_position.store(frame_position, Ordering::Release);
    }

    pub fn set_tempo(&self, tempo: f32) {
        self.tempo.store(tempo.to_bits(), Ordering::Release);
    }

    pub fn pitch(&self) -> f32 {
        f32::from_bits(self.pitch.load(Ordering::Acquire))
    }

    pub fn set_pitch(&self, pitch_semitones: f32) {
        self.pitch.store(pitch_semitones.to_bits(), Ordering::Release);
    }

    pub fn set_loop_region(&self, start: u64, end: u64) {
        self.loop_start.store(start, Ordering::Release);
        self.loop_end.store(end, Ordering::Release);
    }

    pub fn set_loop_enabled(&self, enabled: bool) {
        self.loop_enabled.store(enabled, Ordering::Release);
    }

    /// Advances the timeline by `frame_count` real output frames, called
    /// once per mixer RT tick. Wraps back to `loop_start` if looping is
    /// enabled and the advance would cross `loop_end`.
    pub fn advance(&self, frame_count: u64) {
        if !self.running.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            return;
        }

        let current = self.frame_position.load(Ordering::Relaxed);
        let mut next = current + frame_count;

        if self.loop_enabled.load(Ordering::Acquire) {
            let end = self.loop_end.load(Ordering::Relaxed);
            let start = self.loop_start.load(Ordering::Relaxed);
            if end > start && next >= end {
                next = start + (next - end);
            }
        }

        self.frame_position.store(next, Ordering::Release);
    }

    pub fn position_seconds(&self) -> f64 {
        self.frame_position() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped_at_zero() {
        let clock = MasterClock::new(48_000);
        assert_eq!(clock.state(), ClockState::Stopped);
        assert_eq!(clock.frame_position(), 0);
    }

    #[test]
    fn advance_is_a_no_op_while_stopped() {
        let clock = MasterClock::new(48_000);
        clock.advance(1000);
        assert_eq!(clock.frame_position(), 0);
    }

    #[test]
    fn advance_is_a_no_op_while_paused() {
        let clock = MasterClock::new(48_000);
        clock.start();
        clock.pause();
        clock.advance(1000);
        assert_eq!(clock.frame_position(), 0);
    }

    #[test]
    fn advance_accumulates_while_running() {
        let clock = MasterClock::new(48_000);
        clock.start();
        clock.advance(512);
        clock.advance(512);
        assert_eq!(clock.frame_position(), 1024);
    }

    #[test]
    fn seek_sets_position_directly() {
        let clock = MasterClock::new(48_000);
        clock.seek(44_100);
        assert_eq!(clock.frame_position(), 44_100);
    }

    #[test]
    fn loop_region_wraps_position() {
        let clock = MasterClock::new(48_000);
        clock.start();
        clock.set_loop_region(0, 1000);
        clock.set_loop_enabled(true);
        clock.seek(900);
        clock.advance(200);
        assert_eq!(clock.frame_position(), 100);
    }

    #[test]
    fn stop_resets_position_to_zero() {
        let clock = MasterClock::new(48_000);
        clock.start();
        clock.advance(500);
        clock.stop();
        assert_eq!(clock.frame_position(), 0);
        assert_eq!(clock.state(), ClockState::Stopped);
    }

    #[test]
    fn pitch_defaults_to_zero_semitones_and_is_settable() {
        let clock = MasterClock::new(48_000);
        assert_eq!(clock.pitch(), 0.0);
        clock.set_pitch(-5.0);
        assert_eq!(clock.pitch(), -5.0);
    }

    #[test]
    fn position_seconds_matches_sample_rate() {
        let clock = MasterClock::new(1000);
        clock.start();
        clock.advance(500);
        assert_eq!(clock.position_seconds(), 0.5);
    }
}
