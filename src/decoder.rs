//! Decoder seam: the engine never ships a concrete codec, only the contract
//! a source pipeline drives. Real decoders (e.g. Symphonia-backed ones) are
//! external collaborators per `spec.md §5`.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// `None` for streams of unknown or infinite duration (e.g. live input).
    pub total_frames: Option<u64>,
}

/// One block of decoded, interleaved `f32` samples.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub samples: Vec<f32>,
    /// Frame position (not sample index) of the first frame in `samples`,
    /// in the stream's own timeline, as of the last successful `seek`.
    pub start_frame: u64,
}

/// A source of decoded PCM, driven from a source pipeline's producer thread.
///
/// Implementations are free to block (file I/O, network) — nothing in this
/// trait runs on the RT thread.
pub trait Decoder: Send {
    fn stream_info(&self) -> StreamInfo;

    /// Decodes and returns the next block of interleaved samples, or `Ok(None)`
    /// at end of stream.
    fn decode_next_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// Seeks to the given frame position. Implementations should seek to the
    /// nearest preceding keyframe/block boundary if exact seeking isn't
    /// possible, and report the position actually landed on via the next
    /// `decode_next_frame`'s `start_frame`.
    fn seek(&mut self, frame_position: u64) -> Result<()>;

    /// Releases any underlying resources (file handles, decoder state)
    /// ahead of drop, so the source pipeline can surface decode-close
    /// failures rather than losing them to an unchecked `Drop`.
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::f32::consts::PI;

    /// An in-memory sine-wave decoder used by source/mixer tests so they
    /// don't depend on a real codec or filesystem access.
    pub struct SineDecoder {
        info: StreamInfo,
        frequency_hz: f32,
        cursor: u64,
        block_frames: usize,
        total_frames: Option<u64>,
    }

    impl SineDecoder {
        pub fn new(
            sample_rate: u32,
            channels: usize,
            frequency_hz: f32,
            block_frames: usize,
            total_frames: Option<u64>,
        ) -> Self {
            Self {
                info: StreamInfo {
                    sample_rate,
                    channels,
                    total_frames,
                },
                frequency_hz,
                cursor: 0,
                block_frames,
                total_frames,
            }
        }
    }

    impl Decoder for SineDecoder {
        fn stream_info(&self) -> StreamInfo {
            self.info
        }

        fn decode_next_frame(&mut self) -> Result<Option<DecodedFrame>> {
            if let Some(total) = self.total_frames {
                if self.cursor >= total {
                    return Ok(None);
                }
            }

            let start_frame = self.cursor;
            let frames = match self.total_frames {
                Some(total) => self.block_frames.min((total - self.cursor) as usize),
                None => self.block_frames,
            };

            let mut samples = Vec::with_capacity(frames * self.info.channels);
            for i in 0..frames {
                let t = (self.cursor + i as u64) as f32 / self.info.sample_rate as f32;
                let s = (2.0 * PI * self.frequency_hz * t).sin();
                for _ in 0..self.info.channels {
                    samples.push(s);
                }
            }
            self.cursor += frames as u64;

            Ok(Some(DecodedFrame {
                samples,
                start_frame,
            }))
        }

        fn seek(&mut self, frame_position: u64) -> Result<()> {
            self.cursor = frame_position;
            Ok(())
        }
    }

    #[test]
    fn sine_decoder_reports_end_of_stream() {
        let mut dec = SineDecoder::new(8000, 1, 440.0, 64, Some(128));
        assert!(dec.decode_next_frame().unwrap().is_some());
        assert!(dec.decode_next_frame().unwrap().is_some());
        assert!(dec.decode_next_frame().unwrap().is_none());
    }

    #[test]
    fn sine_decoder_seek_resumes_from_requested_position() {
        let mut dec = SineDecoder::new(8000, 1, 440.0, 64, Some(256));
        dec.seek(128).unwrap();
        let frame = dec.decode_next_frame().unwrap().unwrap();
        assert_eq!(frame.start_frame, 128);
    }

    #[test]
    fn sine_decoder_interleaves_channels() {
        let mut dec = SineDecoder::new(8000, 2, 440.0, 4, Some(4));
        let frame = dec.decode_next_frame().unwrap().unwrap();
        assert_eq!(frame.samples.len(), 8);
        assert_eq!(frame.samples[0], frame.samples[1]);
    }
}
