//! Named groups of sources that play in lockstep against a shared
//! [`MasterClock`], with drift correction scheduled for the next mixer tick
//! rather than applied mid-tick.

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::MasterClock;
use crate::source::SourceId;

/// Frames of drift tolerated before a member is nudged back into alignment.
/// Roughly 10ms at 48kHz; below this, WSOLA's own window jitter would mask
/// the correction anyway.
pub const DEFAULT_DRIFT_TOLERANCE_FRAMES: u64 = 480;

pub struct SyncGroup {
    name: String,
    clock: Arc<MasterClock>,
    members: HashSet<SourceId>,
    drift_tolerance_frames: u64,
}

impl SyncGroup {
    pub fn new(name: impl Into<String>, clock: Arc<MasterClock>) -> Self {
        Self {
            name: name.into(),
            clock,
            members: HashSet::new(),
            drift_tolerance_frames: DEFAULT_DRIFT_TOLERANCE_FRAMES,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<MasterClock> {
        &self.clock
    }

    pub fn set_drift_tolerance_frames(&mut self, frames: u64) {
        self.drift_tolerance_frames = frames;
    }

    pub fn drift_tolerance_frames(&self) -> u64 {
        self.drift_tolerance_frames
    }

    pub fn add_member(&mut self, id: SourceId) {
        self.members.insert(id);
    }

    pub fn remove_member(&mut self, id: SourceId) {
        self.members.remove(&id);
    }

    pub fn members(&self) -> impl Iterator<Item = &SourceId> {
        self.members.iter()
    }

    pub fn is_member(&self, id: SourceId) -> bool {
        self.members.contains(&id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Target frame position every member should be at on the next tick.
    pub fn target_frame(&self) -> u64 {
        self.clock.frame_position()
    }

    pub fn set_tempo(&self, tempo: f32) {
        self.clock.set_tempo(tempo);
    }

    pub fn set_pitch(&self, pitch_semitones: f32) {
        self.clock.set_pitch(pitch_semitones);
    }

    pub fn seek(&self, frame_position: u64) {
        self.clock.seek(frame_position);
    }

    pub fn start(&self) {
        self.clock.start();
    }

    pub fn pause(&self) {
        self.clock.pause();
    }

    pub fn stop(&self) {
        self.clock.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_id() -> SourceId {
        SourceId::new_for_test()
    }

    #[test]
    fn new_group_has_no_members() {
        let clock = Arc::new(MasterClock::new(48_000));
        let group = SyncGroup::new("drums", clock);
        assert_eq!(group.member_count(), 0);
        assert_eq!(group.name(), "drums");
    }

    #[test]
    fn add_and_remove_member() {
        let clock = Arc::new(MasterClock::new(48_000));
        let mut group = SyncGroup::new("drums", clock);
        let id = fake_id();
        group.add_member(id);
        assert!(group.is_member(id));
        group.remove_member(id);
        assert!(!group.is_member(id));
    }

    #[test]
    fn target_frame_tracks_clock() {
        let clock = Arc::new(MasterClock::new(48_000));
        clock.start();
        clock.advance(2048);
        let group = SyncGroup::new("drums", clock);
        assert_eq!(group.target_frame(), 2048);
    }

    #[test]
    fn set_pitch_propagates_to_clock() {
        let clock = Arc::new(MasterClock::new(48_000));
        let group = SyncGroup::new("drums", clock.clone());
        group.set_pitch(3.5);
        assert_eq!(clock.pitch(), 3.5);
    }

    #[test]
    fn default_drift_tolerance_is_reasonable() {
        let clock = Arc::new(MasterClock::new(48_000));
        let group = SyncGroup::new("drums", clock);
        assert_eq!(group.drift_tolerance_frames(), DEFAULT_DRIFT_TOLERANCE_FRAMES);
    }
}
