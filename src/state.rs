//! Shared playback state
//!
//! Thread-safe state shared between the engine task and its observers. The
//! engine is the only writer; API surfaces (CLI status logging, tests) read
//! concurrently and subscribe to the event broadcast.

use crate::error::Error;
use crate::events::PlayerEvent;
use tokio::sync::{broadcast, RwLock};

/// Playback lifecycle states.
///
/// The engine owns all transitions; everyone else observes. `Buffering`
/// carries its progress so observers can render "3/16" style feedback
/// without a second channel.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamState {
    /// No stream activity
    Idle,
    /// Connection attempt (or scheduled reconnect) in flight
    Connecting,
    /// Connected, accumulating decoded audio before playback begins
    Buffering { buffered: usize, required: usize },
    /// Audio flowing to the output device
    Playing,
    /// Suspended by request; the connection and decoder keep running
    Paused,
    /// Output ran dry; refilling before playback resumes
    Stalled,
    /// Stream failed; stays until the next play request
    Error(Error),
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamState::Idle => write!(f, "idle"),
            StreamState::Connecting => write!(f, "connecting"),
            StreamState::Buffering { buffered, required } => {
                write!(f, "buffering {}/{}", buffered, required)
            }
            StreamState::Playing => write!(f, "playing"),
            StreamState::Paused => write!(f, "paused"),
            StreamState::Stalled => write!(f, "stalled"),
            StreamState::Error(e) => write!(f, "error: {}", e),
        }
    }
}

/// Shared state accessible by all components
///
/// Uses RwLock for concurrent read access with rare writes.
pub struct SharedState {
    /// Current stream state, mirrored from the engine task
    pub stream_state: RwLock<StreamState>,

    /// Master volume (0.0-1.0)
    pub volume: RwLock<f32>,

    /// Event broadcaster
    pub event_tx: broadcast::Sender<PlayerEvent>,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        // 256 events of lag tolerance; BufferScheduled fires ~38x/sec
        let (event_tx, _) = broadcast::channel(256);
        Self {
            stream_state: RwLock::new(StreamState::Idle),
            volume: RwLock::new(1.0),
            event_tx,
        }
    }

    /// Broadcast an event to all subscribers
    pub fn broadcast_event(&self, event: PlayerEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to the event stream
    pub fn subscribe_events(&self) -> broadcast::Receiver<PlayerEvent> {
        self.event_tx.subscribe()
    }

    /// Get current stream state
    pub async fn get_stream_state(&self) -> StreamState {
        self.stream_state.read().await.clone()
    }

    /// Set stream state
    pub async fn set_stream_state(&self, state: StreamState) {
        *self.stream_state.write().await = state;
    }

    /// Get master volume (0.0-1.0)
    pub async fn get_volume(&self) -> f32 {
        *self.volume.read().await
    }

    /// Set master volume, clamped to 0.0-1.0
    pub async fn set_volume(&self, volume: f32) {
        *self.volume.write().await = volume.clamp(0.0, 1.0);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_state() {
        let state = SharedState::new();

        // Default is Idle
        assert_eq!(state.get_stream_state().await, StreamState::Idle);

        state.set_stream_state(StreamState::Connecting).await;
        assert_eq!(state.get_stream_state().await, StreamState::Connecting);

        state
            .set_stream_state(StreamState::Buffering {
                buffered: 3,
                required: 16,
            })
            .await;
        match state.get_stream_state().await {
            StreamState::Buffering { buffered, required } => {
                assert_eq!(buffered, 3);
                assert_eq!(required, 16);
            }
            other => panic!("expected Buffering, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_volume_clamping() {
        let state = SharedState::new();

        assert_eq!(state.get_volume().await, 1.0);

        state.set_volume(0.5).await;
        assert_eq!(state.get_volume().await, 0.5);

        state.set_volume(1.5).await;
        assert_eq!(state.get_volume().await, 1.0);

        state.set_volume(-0.5).await;
        assert_eq!(state.get_volume().await, 0.0);
    }

    #[tokio::test]
    async fn test_event_broadcast_reaches_subscriber() {
        let state = SharedState::new();
        let mut rx = state.subscribe_events();

        state.broadcast_event(PlayerEvent::state_changed(StreamState::Playing));

        match rx.recv().await {
            Ok(PlayerEvent::StateChanged { state, .. }) => {
                assert_eq!(state, StreamState::Playing);
            }
            other => panic!("expected StateChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ok() {
        let state = SharedState::new();
        // No receiver subscribed; must not panic
        state.broadcast_event(PlayerEvent::state_changed(StreamState::Idle));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StreamState::Idle.to_string(), "idle");
        assert_eq!(
            StreamState::Buffering {
                buffered: 2,
                required: 8
            }
            .to_string(),
            "buffering 2/8"
        );
        assert_eq!(
            StreamState::Error(Error::ConnectionLost).to_string(),
            "error: Connection lost"
        );
    }
}
