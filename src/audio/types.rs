//! Core audio data types for the streaming pipeline
//!
//! All decoded audio in the pipeline is carried as [`PcmBuffer`]: planar
//! 32-bit float stereo at the fixed output rate. The decoder normalizes
//! whatever the broadcast delivers (sample rate, channel count) into this
//! format exactly once, so everything downstream of it deals with a single
//! shape.

/// Fixed output sample rate for the whole pipeline (Hz)
pub const OUTPUT_SAMPLE_RATE: u32 = 44100;

/// Fixed output channel count (stereo)
pub const OUTPUT_CHANNELS: usize = 2;

/// A decoded block of PCM audio in the pipeline's output format
///
/// Planar layout: independent left and right sample planes of equal length.
/// Buffers are produced by the decoder, handed off by `Arc`, and never
/// mutated after production.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Left channel samples
    pub left: Vec<f32>,
    /// Right channel samples
    pub right: Vec<f32>,
    /// Sample rate of the contained audio (always [`OUTPUT_SAMPLE_RATE`]
    /// for buffers emitted by the decoder)
    pub sample_rate: u32,
}

impl PcmBuffer {
    /// Create a buffer from two equal-length sample planes
    pub fn new(left: Vec<f32>, right: Vec<f32>, sample_rate: u32) -> Self {
        debug_assert_eq!(left.len(), right.len(), "channel planes must match");
        Self {
            left,
            right,
            sample_rate,
        }
    }

    /// Number of audio frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Channel count (always stereo in this pipeline)
    pub fn channels(&self) -> usize {
        OUTPUT_CHANNELS
    }

    /// True when the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Duration of the contained audio in milliseconds
    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.frames() as f64 / self.sample_rate as f64) * 1000.0
    }

    /// Iterate the buffer as interleaved stereo frames
    ///
    /// Used by sinks that feed frame-oriented device rings.
    pub fn iter_frames(&self) -> impl Iterator<Item = AudioFrame> + '_ {
        self.left
            .iter()
            .zip(self.right.iter())
            .map(|(&left, &right)| AudioFrame { left, right })
    }
}

/// A single stereo sample pair
///
/// The currency of the sink-side ring buffer: one frame per tick of the
/// output device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrame {
    pub left: f32,
    pub right: f32,
}

impl AudioFrame {
    /// Silent frame
    pub fn zero() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
        }
    }

    /// Duplicate a mono sample into both channels
    pub fn from_mono(sample: f32) -> Self {
        Self {
            left: sample,
            right: sample,
        }
    }
}
