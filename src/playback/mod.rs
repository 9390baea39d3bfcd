//! Playback orchestration: engine state machine, buffer queue, sink trait

pub mod engine;
pub mod queue;
pub mod sink;

pub use engine::StreamEngine;
pub use queue::{BufferQueue, QueueSnapshot};
pub use sink::{AudioSink, SinkEvent};
