//! Deployment configuration for sender and gateway nodes.
//!
//! Peer identity, the reference network name and timing are fixed at
//! deployment time. The firmware builds these from build-time environment
//! variables; nothing here is negotiated at runtime.

use core::str::FromStr;

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::classifier::DEFAULT_THRESHOLD;
use crate::link::{InvalidChannel, MacAddress, ParseMacError, PeerDescriptor, WifiChannel};
use crate::message::BoardId;

/// Time between two accelerometer readings.
pub const DEFAULT_SAMPLE_PERIOD_MS: u32 = 400;

/// Time between two on/off determinations.
pub const DEFAULT_EVALUATION_PERIOD_MS: u32 = 2000;

/// Idle time after which the gateway emits a keep-alive event.
pub const DEFAULT_KEEPALIVE_PERIOD_MS: u32 = 5000;

/// Reconnect delay suggested to subscribers with the hello event.
pub const DEFAULT_HELLO_RETRY_MS: u32 = 10_000;

pub const DEFAULT_LISTEN_PORT: u16 = 80;

/// Longest SSID a Wi-Fi network can advertise.
pub const MAX_SSID_LEN: usize = 32;

pub type NetworkName = heapless::String<MAX_SSID_LEN>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("board id is empty")]
    EmptyBoardId,
    #[error("board id is longer than 31 bytes")]
    BoardIdTooLong,
    #[error("reference network name is empty or longer than 32 bytes")]
    InvalidNetworkName,
    #[error("invalid gateway address: {0}")]
    InvalidAddress(ParseMacError),
    #[error("{0} is not a usable peer address")]
    UnusablePeer(MacAddress),
    #[error("invalid channel: {0}")]
    InvalidChannel(InvalidChannel),
    #[error("threshold must be a positive number")]
    InvalidThreshold,
    #[error("periods must be non-zero")]
    ZeroPeriod,
}

/// Configuration of a vibration sender node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SenderConfig {
    pub board_id: BoardId,
    /// Network whose channel the link is synchronized to
    pub reference_network: NetworkName,
    pub gateway: PeerDescriptor,
    pub sample_period_ms: u32,
    pub evaluation_period_ms: u32,
    pub threshold: f32,
}

impl SenderConfig {
    /// Build a sender configuration with default timing and threshold.
    pub fn new(
        board_id: &str,
        reference_network: &str,
        gateway: &str,
    ) -> Result<Self, ConfigError> {
        if board_id.is_empty() {
            return Err(ConfigError::EmptyBoardId);
        }
        if reference_network.is_empty() {
            return Err(ConfigError::InvalidNetworkName);
        }

        let address = MacAddress::from_str(gateway).map_err(ConfigError::InvalidAddress)?;

        let config = Self {
            board_id: BoardId::from_str(board_id).map_err(|_| ConfigError::BoardIdTooLong)?,
            reference_network: NetworkName::from_str(reference_network)
                .map_err(|_| ConfigError::InvalidNetworkName)?,
            gateway: PeerDescriptor::new(address, None),
            sample_period_ms: DEFAULT_SAMPLE_PERIOD_MS,
            evaluation_period_ms: DEFAULT_EVALUATION_PERIOD_MS,
            threshold: DEFAULT_THRESHOLD,
        };
        config.validate()?;
        Ok(config)
    }

    /// Pin the gateway peer to a fixed channel instead of the link's channel.
    pub fn with_gateway_channel(mut self, channel: u8) -> Result<Self, ConfigError> {
        let channel = WifiChannel::try_from(channel).map_err(ConfigError::InvalidChannel)?;
        self.gateway.channel = Some(channel);
        Ok(self)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self, ConfigError> {
        self.threshold = threshold;
        self.validate()?;
        Ok(self)
    }

    pub fn with_periods(
        mut self,
        sample_period_ms: u32,
        evaluation_period_ms: u32,
    ) -> Result<Self, ConfigError> {
        self.sample_period_ms = sample_period_ms;
        self.evaluation_period_ms = evaluation_period_ms;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board_id.is_empty() {
            return Err(ConfigError::EmptyBoardId);
        }
        if !self.gateway.address.is_valid_peer() {
            return Err(ConfigError::UnusablePeer(self.gateway.address));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold);
        }
        if self.sample_period_ms == 0 || self.evaluation_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.into())
    }

    pub fn evaluation_period(&self) -> Duration {
        Duration::from_millis(self.evaluation_period_ms.into())
    }
}

/// Configuration of the gateway node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    pub keepalive_period_ms: u32,
    pub hello_retry_ms: u32,
    pub listen_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            keepalive_period_ms: DEFAULT_KEEPALIVE_PERIOD_MS,
            hello_retry_ms: DEFAULT_HELLO_RETRY_MS,
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(())
    }

    pub fn keepalive_period(&self) -> Duration {
        Duration::from_millis(self.keepalive_period_ms.into())
    }
}
