//! Sample rate normalization to the fixed pipeline output rate
//!
//! Broadcast streams are usually 44.1 kHz already, but nothing guarantees
//! it; 22.05 kHz mono feeds exist in the wild. Everything downstream of the
//! decoder assumes [`OUTPUT_SAMPLE_RATE`], so the decoder owns one
//! `StreamResampler` per stream (created at format lock, skipped entirely
//! when the input is already 44.1 kHz).
//!
//! ## Design
//!
//! Uses rubato's `FastFixedIn` with septic polynomial interpolation: ample
//! quality for compressed radio audio at a fraction of the cost of sinc
//! interpolation. The resampler is stateful and fed one compressed frame's
//! worth of samples per call (constant for a given stream), preserving
//! interpolation continuity across frame boundaries.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::audio::types::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{Error, Result};

/// Stateful stereo resampler from a stream's native rate to 44.1 kHz
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    input_rate: u32,
    chunk_frames: usize,
}

impl StreamResampler {
    /// Create a resampler for a stream
    ///
    /// # Arguments
    /// * `input_rate` - Native sample rate of the decoded stream (Hz)
    /// * `chunk_frames` - Samples per channel delivered per `process()`
    ///   call; for MP3 this is the stream's samples-per-frame and is
    ///   constant for the stream's lifetime
    pub fn new(input_rate: u32, chunk_frames: usize) -> Result<Self> {
        let ratio = OUTPUT_SAMPLE_RATE as f64 / input_rate as f64;
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            chunk_frames,
            OUTPUT_CHANNELS,
        )
        .map_err(|e| Error::Decode(format!("failed to create resampler: {}", e)))?;

        debug!(
            "Resampler created: {} Hz -> {} Hz (ratio {:.4}, chunk {})",
            input_rate, OUTPUT_SAMPLE_RATE, ratio, chunk_frames
        );

        Ok(Self {
            inner,
            input_rate,
            chunk_frames,
        })
    }

    /// Resample one chunk of planar stereo audio
    ///
    /// Both planes must hold exactly `chunk_frames` samples. Returns the
    /// resampled planes; their length varies slightly call to call as the
    /// fractional sample position advances.
    pub fn process(&mut self, left: &[f32], right: &[f32]) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut output = self
            .inner
            .process(&[left, right], None)
            .map_err(|e| Error::Decode(format!("resample failed: {}", e)))?;

        let right_out = output.pop().unwrap_or_default();
        let left_out = output.pop().unwrap_or_default();
        Ok((left_out, right_out))
    }

    /// Native rate this resampler converts from
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Expected samples per channel per `process()` call
    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_ratio() {
        let mut rs = StreamResampler::new(22050, 576).unwrap();
        let input = vec![0.25f32; 576];

        let (left, right) = rs.process(&input, &input).unwrap();
        assert_eq!(left.len(), right.len());
        // 2:1 ratio: one 576-sample frame becomes ~1152 output samples
        assert!((left.len() as i64 - 1152).abs() <= 16, "got {}", left.len());
    }

    #[test]
    fn test_fractional_ratio_conserves_duration() {
        let mut rs = StreamResampler::new(24000, 576).unwrap();
        let input = vec![0.0f32; 576];

        let mut total = 0usize;
        for _ in 0..10 {
            let (left, _) = rs.process(&input, &input).unwrap();
            total += left.len();
        }
        // 10 frames of 576 @ 24kHz should come out near 576*10*44100/24000
        let expected = (576.0 * 10.0 * 44100.0 / 24000.0) as i64;
        assert!(
            (total as i64 - expected).abs() <= 64,
            "total {} vs expected {}",
            total,
            expected
        );
    }

    #[test]
    fn test_wrong_chunk_size_rejected() {
        let mut rs = StreamResampler::new(22050, 576).unwrap();
        let short = vec![0.0f32; 100];
        assert!(rs.process(&short, &short).is_err());
    }
}
