//! Audio backend seam. A concrete backend (cpal, a platform WASAPI/CoreAudio
//! wrapper, …) is an external collaborator per `spec.md §6`; this module
//! only defines the contract the mixer drives it through, modeled on how
//! `realtime_audio.rs`'s `RealTimeAudioProcessor` wraps a `cpal` stream.

use crate::error::Result;

/// Negotiated stream parameters a backend reports once it has opened a
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStreamInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Device-preferred render block size, if fixed.
    pub buffer_frames: Option<usize>,
}

/// The render callback the backend invokes on its own real-time thread.
/// `output` is interleaved per `BackendStreamInfo::channels`; the callback
/// must fill every sample (silence included) and must not block or
/// allocate.
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// A handle to an open output stream. Dropping it should stop the stream.
pub trait Backend: Send {
    fn start(&mut self, callback: RenderCallback) -> Result<BackendStreamInfo>;

    fn stop(&mut self) -> Result<()>;

    /// `true` once the backend has detected the device disconnecting
    /// (unplugged, format changed underneath it, …). The mixer polls this
    /// from its control thread and surfaces it via `EngineError::Backend`
    /// on the next control call rather than failing the render callback.
    fn is_disconnected(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// A backend that renders into an in-memory scratch buffer on demand
    /// instead of a real device, for exercising the mixer end to end.
    pub struct ScratchBackend {
        info: BackendStreamInfo,
        callback: Option<RenderCallback>,
        disconnected: Arc<AtomicBool>,
        stopped: bool,
    }

    impl ScratchBackend {
        pub fn new(sample_rate: u32, channels: usize, buffer_frames: usize) -> Self {
            Self {
                info: BackendStreamInfo {
                    sample_rate,
                    channels,
                    buffer_frames: Some(buffer_frames),
                },
                callback: None,
                disconnected: Arc::new(AtomicBool::new(false)),
                stopped: true,
            }
        }

        /// Drives one render block synchronously, as a real backend's RT
        /// thread would, and returns the rendered interleaved samples.
        pub fn tick(&mut self, frame_count: usize) -> Vec<f32> {
            let mut buf = vec![0.0; frame_count * self.info.channels];
            if let Some(cb) = self.callback.as_mut() {
                cb(&mut buf);
            }
            buf
        }

        pub fn simulate_disconnect(&self) {
            self.disconnected.store(true, Ordering::Relaxed);
        }
    }

    impl Backend for ScratchBackend {
        fn start(&mut self, callback: RenderCallback) -> Result<BackendStreamInfo> {
            // A real backend would call this from inside the thread it
            // renders audio on; the scratch backend ticks synchronously on
            // whatever thread the test runs on, so this mostly exercises
            // that the call is harmless to make here too.
            let _ = crate::rt_priority::set_realtime_priority();
            self.callback = Some(callback);
            self.stopped = false;
            Ok(self.info)
        }

        fn stop(&mut self) -> Result<()> {
            self.callback = None;
            self.stopped = true;
            Ok(())
        }

        fn is_disconnected(&self) -> bool {
            self.disconnected.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn tick_invokes_started_callback() {
        let mut backend = ScratchBackend::new(8000, 1, 4);
        backend.start(Box::new(|out| out.fill(1.0))).unwrap();
        let rendered = backend.tick(4);
        assert_eq!(rendered, vec![1.0; 4]);
    }

    #[test]
    fn tick_before_start_renders_silence() {
        let mut backend = ScratchBackend::new(8000, 1, 4);
        let rendered = backend.tick(4);
        assert_eq!(rendered, vec![0.0; 4]);
    }

    #[test]
    fn stop_clears_callback() {
        let mut backend = ScratchBackend::new(8000, 1, 4);
        backend.start(Box::new(|out| out.fill(1.0))).unwrap();
        backend.stop().unwrap();
        let rendered = backend.tick(4);
        assert_eq!(rendered, vec![0.0; 4]);
    }

    #[test]
    fn simulate_disconnect_is_observable() {
        let backend = ScratchBackend::new(8000, 1, 4);
        assert!(!backend.is_disconnected());
        backend.simulate_disconnect();
        assert!(backend.is_disconnected());
    }
}
