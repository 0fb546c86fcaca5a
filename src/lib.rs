//! Real-time multi-track audio mixing and synchronization engine.
//!
//! `strata_engine` owns everything between a decoded PCM stream and a
//! rendered audio block: per-source time-stretch/pitch-shift, a real-time
//! mixer, master-clock-driven sync groups for keeping multiple sources in
//! lockstep, and an optional WAV recorder tap. It does not ship a codec, an
//! audio backend, or a UI — those are external collaborators the host
//! application supplies through the [`decoder::Decoder`] and
//! [`backend::Backend`] traits.
//!
//! Start with [`engine::AudioEngine`] for the common case of one engine per
//! process; [`mixer::Mixer`] and the other modules are available directly
//! for callers assembling their own wiring.

pub mod backend;
pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod effects;
pub mod engine;
pub mod error;
pub mod global;
pub mod metrics;
pub mod mixer;
pub mod recorder;
pub mod ring_buffer;
pub mod rt_priority;
pub mod source;
pub mod sync_group;
pub mod time_stretch;

pub use config::EngineConfig;
pub use engine::AudioEngine;
pub use error::{EngineError, Result};
pub use source::{PlaybackState, SourceHandle, SourceId};
