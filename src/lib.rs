//! # Airwave
//!
//! Live MP3 HTTP stream playback engine.
//!
//! **Purpose:** Connect to a continuous MPEG audio broadcast over HTTP,
//! decode it incrementally to PCM, and play it gaplessly in real time on the
//! system audio device, with automatic reconnection and stall recovery.
//!
//! **Architecture:** One engine task owns the state machine and every
//! collaborator (HTTP transport task, blocking decode worker, bounded buffer
//! queue, cpal sink), connected exclusively by channels. The decode path is
//! symphonia + rubato; network delivery is reqwest with arbitrary chunk
//! boundaries tolerated end to end.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod state;
pub mod transport;

pub use config::StreamConfig;
pub use error::{Error, Result};
pub use events::PlayerEvent;
pub use playback::engine::StreamEngine;
pub use playback::sink::{AudioSink, SinkEvent};
pub use state::{SharedState, StreamState};
pub use transport::{HttpTransport, StreamTransport, TransportEvent};
