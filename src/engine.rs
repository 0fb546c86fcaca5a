//! `AudioEngine`: the owned-value facade applications actually construct.
//! Bundles a `Mixer`, the engine's `EngineConfig`, and source/sync-group
//! bookkeeping behind one type so callers don't need to wire the
//! mixer/clock/config pieces together by hand.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::Backend;
use crate::clock::MasterClock;
use crate::config::EngineConfig;
use crate::decoder::Decoder;
use crate::error::{EngineError, Result};
use crate::mixer::Mixer;
use crate::recorder::{Recorder, SampleFormat};
use crate::source::{spawn_source, SourceHandle, SourceId};
use crate::time_stretch::TimeStretchConfig;

pub struct AudioEngine {
    config: EngineConfig,
    mixer: Mixer,
    handles: HashMap<SourceId, SourceHandle>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mixer = Mixer::new(config.audio.sample_rate, config.audio.channels);
        mixer.set_master_volume(config.mixer.default_master_volume)?;
        mixer.enable_auto_drift_correction(config.mixer.auto_drift_correction);
        Ok(Self {
            mixer,
            config,
            handles: HashMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    /// Creates a source from a decoder and adds it to the mixer, returning
    /// a handle the caller uses for playback control.
    pub fn add_source(&mut self, decoder: Box<dyn Decoder>) -> Result<SourceHandle> {
        let stretch_config = TimeStretchConfig {
            sample_rate: self.config.audio.sample_rate,
            channels: self.config.audio.channels,
            max_block_frames: self.config.audio.buffer_frames,
            ..Default::default()
        };
        let (source, handle) = spawn_source(decoder, stretch_config)?;
        self.mixer.add_source(source)?;
        self.handles.insert(handle.id(), handle.clone());
        Ok(handle)
    }

    pub fn remove_source(&mut self, id: SourceId) -> bool {
        self.handles.remove(&id);
        self.mixer.remove_source(id)
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceHandle> {
        self.handles.get(&id)
    }

    pub fn create_sync_group(
        &mut self,
        name: impl Into<String>,
        members: &[SourceId],
    ) -> Arc<MasterClock> {
        let name = name.into();
        let clock = self.mixer.create_sync_group(name.clone(), members);
        let _ = self
            .mixer
            .set_sync_group_drift_tolerance(&name, self.config.mixer.default_sync_tolerance_frames);
        clock
    }

    pub fn start_sync_group(&self, name: &str) -> Result<()> {
        self.mixer.start_sync_group(name)
    }

    pub fn stop_sync_group(&self, name: &str) -> Result<()> {
        self.mixer.stop_sync_group(name)
    }

    pub fn set_sync_group_tempo(&self, name: &str, tempo: f32) -> Result<()> {
        self.mixer.set_sync_group_tempo(name, tempo)
    }

    pub fn seek_sync_group(&self, name: &str, seconds: f64) -> Result<()> {
        self.mixer.seek_sync_group(name, seconds)
    }

    pub fn get_sync_group_position(&self, name: &str) -> Result<f64> {
        self.mixer.get_sync_group_position(name)
    }

    pub fn add_to_sync_group(&mut self, name: &str, source_id: SourceId) -> Result<()> {
        self.mixer.add_to_sync_group(name, source_id)
    }

    pub fn remove_from_sync_group(&mut self, name: &str, source_id: SourceId) -> Result<()> {
        self.mixer.remove_from_sync_group(name, source_id)
    }

    pub fn enable_auto_drift_correction(&self, enabled: bool) {
        self.mixer.enable_auto_drift_correction(enabled);
    }

    pub fn start(&mut self, backend: Box<dyn Backend>) -> Result<()> {
        self.mixer.start_with_backend(backend)?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.mixer.stop()
    }

    pub fn dispose(&mut self) -> Result<()> {
        self.mixer.dispose()?;
        self.handles.clear();
        Ok(())
    }

    pub fn start_recording(&mut self, path: impl Into<std::path::PathBuf>) -> Result<()> {
        if !self.config.recorder.enabled {
            return Err(EngineError::InvalidState(
                "recorder is disabled in configuration".into(),
            ));
        }
        let format = match self.config.recorder.bits_per_sample {
            16 => SampleFormat::Pcm16,
            24 => SampleFormat::Pcm24,
            32 => SampleFormat::Pcm32,
            other => {
                return Err(EngineError::Configuration(format!(
                    "unsupported bits_per_sample {other}"
                )))
            }
        };
        let recorder = Recorder::start(
            path,
            self.config.audio.sample_rate,
            self.config.audio.channels,
            format,
        )?;
        self.mixer.attach_recorder(recorder);
        Ok(())
    }

    pub fn stop_recording(&mut self) {
        self.mixer.detach_recorder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_double::SineDecoder;

    fn test_config() -> EngineConfig {
        EngineConfig {
            audio: crate::config::AudioConfig {
                sample_rate: 8000,
                channels: 2,
                buffer_frames: 256,
            },
            ..Default::default()
        }
    }

    #[test]
    fn new_engine_starts_with_no_sources() {
        let engine = AudioEngine::new(test_config()).unwrap();
        assert_eq!(engine.mixer().source_count(), 0);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = test_config();
        config.audio.sample_rate = 0;
        assert!(AudioEngine::new(config).is_err());
    }

    #[test]
    fn add_source_registers_handle_and_mixer_entry() {
        let mut engine = AudioEngine::new(test_config()).unwrap();
        let decoder = Box::new(SineDecoder::new(8000, 2, 440.0, 256, Some(8000)));
        let handle = engine.add_source(decoder).unwrap();
        assert_eq!(engine.mixer().source_count(), 1);
        assert!(engine.source(handle.id()).is_some());
    }

    #[test]
    fn remove_source_clears_handle_and_mixer_entry() {
        let mut engine = AudioEngine::new(test_config()).unwrap();
        let decoder = Box::new(SineDecoder::new(8000, 2, 440.0, 256, Some(8000)));
        let handle = engine.add_source(decoder).unwrap();
        let id = handle.id();
        engine.remove_source(id);
        assert_eq!(engine.mixer().source_count(), 0);
        assert!(engine.source(id).is_none());
    }

    #[test]
    fn start_recording_without_enabling_it_errors() {
        let mut engine = AudioEngine::new(test_config()).unwrap();
        let path = std::env::temp_dir().join("should-not-be-created.wav");
        assert!(engine.start_recording(path).is_err());
    }

    #[test]
    fn sync_group_membership_round_trips_through_engine() {
        let mut engine = AudioEngine::new(test_config()).unwrap();
        let decoder = Box::new(SineDecoder::new(8000, 2, 440.0, 256, Some(8000)));
        let handle = engine.add_source(decoder).unwrap();
        let id = handle.id();

        engine.create_sync_group("band", &[id]);
        engine.start_sync_group("band").unwrap();
        engine.seek_sync_group("band", 1.0).unwrap();
        assert!((engine.get_sync_group_position("band").unwrap() - 1.0).abs() < 1e-9);

        engine.remove_from_sync_group("band", id).unwrap();
        engine.add_to_sync_group("band", id).unwrap();
        engine.enable_auto_drift_correction(false);
    }
}
