//! Optional WAV recorder tap: the mixer pushes its final mixed block into a
//! lock-free SPSC (via `ringbuf`, matching `realtime_audio.rs`'s own use of
//! `HeapRb` for moving audio off the RT thread) and a dedicated writer
//! thread drains it into a `hound` WAV file. Pushing never blocks — if the
//! writer thread falls behind, the tap drops samples and counts them rather
//! than stalling the mixer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ringbuf::traits::{Consumer as _, Producer as _, Split};
use ringbuf::HeapRb;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Pcm16,
    Pcm24,
    Pcm32,
}

struct RecorderShared {
    dropped_samples: AtomicU64,
    stop: std::sync::atomic::AtomicBool,
}

/// A running WAV capture of whatever the mixer renders.
pub struct Recorder {
    producer: std::sync::Mutex<ringbuf::HeapProd<f32>>,
    shared: Arc<RecorderShared>,
    writer_thread: Option<JoinHandle<Result<()>>>,
}

const RECORDER_RING_CAPACITY: usize = 1 << 16;

impl Recorder {
    /// Opens `path` for writing and starts the drain thread. `sample_rate`
    /// and `channels` must match the mixer's own configuration.
    pub fn start(
        path: impl Into<PathBuf>,
        sample_rate: u32,
        channels: usize,
        format: SampleFormat,
    ) -> Result<Self> {
        let path = path.into();
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: match format {
                SampleFormat::Pcm16 => 16,
                SampleFormat::Pcm24 => 24,
                SampleFormat::Pcm32 => 32,
            },
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec)
            .map_err(|e| EngineError::Backend(format!("opening WAV file {path:?}: {e}")))?;

        let ring = HeapRb::<f32>::new(RECORDER_RING_CAPACITY);
        let (producer, mut consumer) = ring.split();

        let shared = Arc::new(RecorderShared {
            dropped_samples: AtomicU64::new(0),
            stop: std::sync::atomic::AtomicBool::new(false),
        });
        let thread_shared = shared.clone();

        let writer_thread = std::thread::Builder::new()
            .name("wav-recorder".into())
            .spawn(move || -> Result<()> {
                let scale = match format {
                    SampleFormat::Pcm16 => i16::MAX as f32,
                    SampleFormat::Pcm24 => (1 << 23) as f32 - 1.0,
                    SampleFormat::Pcm32 => i32::MAX as f32,
                };

                loop {
                    let mut drained = false;
                    while let Some(sample) = consumer.try_pop() {
                        drained = true;
                        let scaled = (sample.clamp(-1.0, 1.0) * scale) as i32;
                        writer
                            .write_sample(scaled)
                            .map_err(|e| EngineError::Backend(format!("writing WAV sample: {e}")))?;
                    }
                    if thread_shared.stop.load(Ordering::Acquire) && !drained {
                        break;
                    }
                    if !drained {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                    }
                }

                writer
                    .finalize()
                    .map_err(|e| EngineError::Backend(format!("finalizing WAV file: {e}")))
            })
            .map_err(|e| EngineError::Backend(format!("spawning WAV writer thread: {e}")))?;

        Ok(Self {
            producer: std::sync::Mutex::new(producer),
            shared,
            writer_thread: Some(writer_thread),
        })
    }

    /// Enqueues interleaved samples for writing. Called from the mixer's RT
    /// tick; never blocks. Overflow is dropped and counted rather than
    /// backing up the mixer.
    pub fn push(&self, samples: &[f32]) {
        // A Mutex here is uncontended in practice (only the RT thread ever
        // calls push) and `ringbuf`'s split producer isn't `Sync` on its
        // own; this trades a single always-uncontended lock for not having
        // to hand-rolled a second SPSC just for this tap.
        let mut producer = self.producer.lock().unwrap();
        for &sample in samples {
            if producer.try_push(sample).is_err() {
                self.shared.dropped_samples.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped_samples.load(Ordering::Relaxed)
    }

    /// Signals the writer thread to flush and finalize the WAV header, then
    /// waits for it to finish.
    pub fn stop(mut self) -> Result<()> {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.writer_thread.take() {
            handle
                .join()
                .map_err(|_| EngineError::Backend("WAV writer thread panicked".into()))??;
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_creates_a_readable_wav_file() {
        let path = std::env::temp_dir().join(format!("strata-engine-test-{}.wav", uuid::Uuid::new_v4()));
        let recorder = Recorder::start(&path, 8000, 1, SampleFormat::Pcm16).unwrap();
        recorder.push(&[0.1, -0.2, 0.3, -0.4]);
        std::thread::sleep(Duration::from_millis(50));
        recorder.stop().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().channels, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn push_beyond_capacity_counts_dropped_samples() {
        let path = std::env::temp_dir().join(format!("strata-engine-test-{}.wav", uuid::Uuid::new_v4()));
        let recorder = Recorder::start(&path, 8000, 1, SampleFormat::Pcm16).unwrap();
        let big = vec![0.0f32; RECORDER_RING_CAPACITY * 2];
        recorder.push(&big);
        assert!(recorder.dropped_samples() > 0);
        recorder.stop().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
