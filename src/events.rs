//! Engine event surface
//!
//! [`PlayerEvent`]s fan out over a `tokio::sync::broadcast` channel to any
//! number of subscribers: the CLI logs them, a visualizer can tap
//! `BufferScheduled` for the raw PCM headed to the device. Subscribers that
//! lag simply miss events; the engine never blocks on them.

use crate::audio::types::PcmBuffer;
use crate::state::StreamState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Notifications emitted by the stream engine.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Playback state machine moved to a new state
    StateChanged {
        state: StreamState,
        timestamp: DateTime<Utc>,
    },

    /// A decoded PCM buffer was handed to the output sink
    ///
    /// Carries the shared buffer itself so observers see exactly the audio
    /// that reaches the device, in schedule order.
    BufferScheduled {
        pcm: Arc<PcmBuffer>,
        timestamp: DateTime<Utc>,
    },

    /// A reconnect attempt was scheduled after a lost connection
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            PlayerEvent::StateChanged { .. } => "StateChanged",
            PlayerEvent::BufferScheduled { .. } => "BufferScheduled",
            PlayerEvent::ReconnectScheduled { .. } => "ReconnectScheduled",
        }
    }

    pub fn state_changed(state: StreamState) -> Self {
        PlayerEvent::StateChanged {
            state,
            timestamp: Utc::now(),
        }
    }

    pub fn buffer_scheduled(pcm: Arc<PcmBuffer>) -> Self {
        PlayerEvent::BufferScheduled {
            pcm,
            timestamp: Utc::now(),
        }
    }

    pub fn reconnect_scheduled(attempt: u32, max_attempts: u32, delay: Duration) -> Self {
        PlayerEvent::ReconnectScheduled {
            attempt,
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let event = PlayerEvent::state_changed(StreamState::Idle);
        assert_eq!(event.event_type(), "StateChanged");

        let event = PlayerEvent::reconnect_scheduled(1, 5, Duration::from_secs(2));
        assert_eq!(event.event_type(), "ReconnectScheduled");
        match event {
            PlayerEvent::ReconnectScheduled {
                attempt,
                max_attempts,
                delay_ms,
                ..
            } => {
                assert_eq!(attempt, 1);
                assert_eq!(max_attempts, 5);
                assert_eq!(delay_ms, 2000);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_buffer_scheduled_shares_the_buffer() {
        let pcm = Arc::new(PcmBuffer::new(vec![0.5; 4], vec![0.5; 4], 44100));
        let event = PlayerEvent::buffer_scheduled(Arc::clone(&pcm));
        match event {
            PlayerEvent::BufferScheduled { pcm: shared, .. } => {
                assert!(Arc::ptr_eq(&shared, &pcm));
            }
            _ => unreachable!(),
        }
    }
}
