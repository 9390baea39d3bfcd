//! Audio subsystem: MP3 framing, incremental decode, resampling, device output
//!
//! Everything upstream of the device produces one fixed format (44.1 kHz
//! planar f32 stereo, [`types::PcmBuffer`]); everything format-specific is
//! confined to the decoder and its helpers.

pub mod decoder;
pub mod mp3;
pub mod output;
pub mod resampler;
pub mod types;

// Re-exports for external use (engine, tests)
pub use decoder::{DecoderStats, StreamDecoder, StreamFormat};
pub use output::CpalSink;
pub use resampler::StreamResampler;
pub use types::{AudioFrame, PcmBuffer, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
