//! Node lifecycle and application-wide error types

use thiserror_no_std::Error;

use crate::config::ConfigError;
use crate::link::LinkError;
use crate::sensors::SamplerError;
use crate::stream::FanOutError;

/// Startup progress of a node.
///
/// A node that fails to bring up its link ends in [`AppRunState::Halted`]
/// and stays there; the process itself keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Uninitialized,
    ChannelSync,
    LinkOpen,
    PeersRegistered,
    Running,
    Halted,
}

impl AppRunState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::ChannelSync => "channel sync",
            Self::LinkOpen => "link open",
            Self::PeersRegistered => "peers registered",
            Self::Running => "running",
            Self::Halted => "halted",
        }
    }

    /// Whether the node takes part in the send/receive loop.
    pub const fn is_participating(self) -> bool {
        matches!(self, Self::Running)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(ConfigError),
    #[error("link error: {0}")]
    Link(LinkError),
    #[error("sensor error: {0}")]
    Sensor(SamplerError),
    #[error("event stream error: {0}")]
    Stream(FanOutError),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<LinkError> for AppError {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<SamplerError> for AppError {
    fn from(e: SamplerError) -> Self {
        Self::Sensor(e)
    }
}

impl From<FanOutError> for AppError {
    fn from(e: FanOutError) -> Self {
        Self::Stream(e)
    }
}
