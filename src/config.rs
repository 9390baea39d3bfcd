//! Stream engine configuration
//!
//! Strongly typed settings with per-field serde defaults, loadable from a
//! TOML file. Partial files are valid; omitted keys take their defaults.
//! Loading normalizes nonsense values (zero queue, minimum above capacity)
//! instead of failing, so a stale config file cannot brick playback.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Playback and connection settings for one stream engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Broadcast URL to play
    #[serde(default)]
    pub url: String,

    /// Capacity of the decoded buffer queue, in buffers
    ///
    /// When full, the oldest buffer is evicted: a live stream tracks the
    /// broadcast's present, it does not pause it.
    #[serde(default = "StreamConfig::default_buffer_queue_size")]
    pub buffer_queue_size: usize,

    /// Decoded buffers required before playback may begin
    ///
    /// The startup gate against immediate underrun. Also applied when
    /// refilling after a stall.
    #[serde(default = "StreamConfig::default_minimum_buffers")]
    pub minimum_buffers_before_playback: usize,

    /// Seconds allowed for a connection attempt, DNS through response headers
    #[serde(default = "StreamConfig::default_connection_timeout")]
    pub connection_timeout_seconds: f64,

    /// Reconnect automatically after a lost connection
    #[serde(default = "StreamConfig::default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Consecutive failed reconnect attempts before giving up
    #[serde(default = "StreamConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Fixed delay between reconnect attempts, in seconds
    #[serde(default = "StreamConfig::default_reconnect_delay")]
    pub reconnect_delay_seconds: f64,
}

impl StreamConfig {
    const fn default_buffer_queue_size() -> usize {
        64
    }

    const fn default_minimum_buffers() -> usize {
        16
    }

    const fn default_connection_timeout() -> f64 {
        10.0
    }

    const fn default_auto_reconnect() -> bool {
        true
    }

    const fn default_max_reconnect_attempts() -> u32 {
        5
    }

    const fn default_reconnect_delay() -> f64 {
        2.0
    }

    /// Defaults with the given URL.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file and normalize.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config.normalized())
    }

    /// Clamp out-of-range values to something playable.
    pub fn normalized(mut self) -> Self {
        if self.buffer_queue_size == 0 {
            warn!("buffer_queue_size 0 is unusable, raising to 1");
            self.buffer_queue_size = 1;
        }
        if self.minimum_buffers_before_playback == 0 {
            warn!("minimum_buffers_before_playback 0 is unusable, raising to 1");
            self.minimum_buffers_before_playback = 1;
        }
        if self.minimum_buffers_before_playback > self.buffer_queue_size {
            warn!(
                "minimum_buffers_before_playback {} exceeds queue capacity {}, clamping",
                self.minimum_buffers_before_playback, self.buffer_queue_size
            );
            self.minimum_buffers_before_playback = self.buffer_queue_size;
        }
        if !(self.connection_timeout_seconds > 0.0) {
            warn!(
                "connection_timeout_seconds {} is unusable, using default",
                self.connection_timeout_seconds
            );
            self.connection_timeout_seconds = Self::default_connection_timeout();
        }
        if !(self.reconnect_delay_seconds >= 0.0) {
            warn!(
                "reconnect_delay_seconds {} is unusable, using default",
                self.reconnect_delay_seconds
            );
            self.reconnect_delay_seconds = Self::default_reconnect_delay();
        }
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_seconds)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            buffer_queue_size: Self::default_buffer_queue_size(),
            minimum_buffers_before_playback: Self::default_minimum_buffers(),
            connection_timeout_seconds: Self::default_connection_timeout(),
            auto_reconnect: Self::default_auto_reconnect(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            reconnect_delay_seconds: Self::default_reconnect_delay(),
        }
    }
}
