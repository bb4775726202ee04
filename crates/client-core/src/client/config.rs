//! Client configuration
//!
//! # Usage Examples
//!
//! ```rust
//! use meshroom_client_core::{ClientConfig, DefaultBitrates, RetryConfig};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new()
//!     .with_event_channel_capacity(256)
//!     .with_control_retry(RetryConfig {
//!         initial_delay: Duration::from_millis(50),
//!         ..RetryConfig::default()
//!     })
//!     .with_default_bitrates(DefaultBitrates { audio_kbps: 64, ..DefaultBitrates::default() });
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.event_channel_capacity, 256);
//! ```

use serde::{Deserialize, Serialize};

use crate::bitrate::DefaultBitrates;
use crate::delivery::RetryConfig;
use crate::error::{ClientError, ClientResult};

/// Configuration of a [`MediaClient`](crate::MediaClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of the notification broadcast channel
    ///
    /// Outbound signaling travels through the same channel, so a subscriber
    /// that lags by more than this many events loses messages.
    pub event_channel_capacity: usize,
    /// Retry timer of the session-control outbound queue
    pub control_retry: RetryConfig,
    /// Bitrates announced for encodings without an explicit cap
    pub default_bitrates: DefaultBitrates,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: 1024,
            control_retry: RetryConfig::default(),
            default_bitrates: DefaultBitrates::default(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_control_retry(mut self, retry: RetryConfig) -> Self {
        self.control_retry = retry;
        self
    }

    pub fn with_default_bitrates(mut self, bitrates: DefaultBitrates) -> Self {
        self.default_bitrates = bitrates;
        self
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> ClientResult<()> {
        if self.event_channel_capacity == 0 {
            return Err(ClientError::invalid_configuration(
                "event_channel_capacity",
                "must be greater than zero",
            ));
        }

        let retry = &self.control_retry;
        if retry.initial_delay.is_zero() {
            return Err(ClientError::invalid_configuration(
                "control_retry.initial_delay",
                "must be greater than zero",
            ));
        }
        if retry.max_delay < retry.initial_delay {
            return Err(ClientError::invalid_configuration(
                "control_retry.max_delay",
                "must not be shorter than initial_delay",
            ));
        }
        if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
            return Err(ClientError::invalid_configuration(
                "control_retry.backoff_multiplier",
                "must be at least 1.0",
            ));
        }

        let bitrates = &self.default_bitrates;
        let all = [
            ("audio_kbps", bitrates.audio_kbps),
            ("video_kbps", bitrates.video_kbps),
            ("low_kbps", bitrates.low_kbps),
            ("medium_kbps", bitrates.medium_kbps),
            ("high_kbps", bitrates.high_kbps),
        ];
        if let Some((field, _)) = all.iter().find(|(_, kbps)| *kbps == 0) {
            return Err(ClientError::invalid_configuration(
                format!("default_bitrates.{}", field),
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}
