//! Audio sink abstraction
//!
//! The engine drives playback through this trait rather than a concrete
//! device type, keeping device plumbing out of the state machine and
//! letting tests substitute an instrumented sink. The production
//! implementation is [`CpalSink`](crate::audio::output::CpalSink).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::types::PcmBuffer;
use crate::error::Result;

/// Notifications a sink raises toward the engine
///
/// Delivered on the channel registered via
/// [`AudioSink::set_event_channel`]; the engine interprets them against its
/// current state (a stall while paused is expected, while playing it is
/// not).
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// Buffered audio dropped below the low watermark
    NeedsMoreBuffers,
    /// Output exhausted all scheduled audio while it was expected to play
    Stalled,
    /// Device or output-stream failure; playback cannot continue
    Failed(String),
}

/// A real-time audio output accepting decoded buffers in FIFO order
///
/// Implementations must not block in any method: scheduling hands frames to
/// an internal ring or thread, and transport control is command-based.
pub trait AudioSink: Send {
    /// Register the channel sink events are delivered on
    ///
    /// Called once by the engine at construction, before any playback
    /// command.
    fn set_event_channel(&mut self, events: mpsc::UnboundedSender<SinkEvent>);

    /// Begin (or restart) device output
    fn start(&mut self) -> Result<()>;

    /// Suspend device output, keeping scheduled audio
    fn pause(&mut self);

    /// Resume device output after `pause`
    fn resume(&mut self);

    /// Stop device output and discard all scheduled audio
    fn stop(&mut self);

    /// Append a buffer to the playback queue (FIFO)
    fn schedule(&mut self, buffer: Arc<PcmBuffer>);

    /// Set output gain, clamped to `0.0..=1.0`
    fn set_volume(&mut self, volume: f32);

    /// Current output gain
    fn volume(&self) -> f32;
}
