use thiserror::Error;

use crate::channel::ChannelKind;

/// Text stored in `last_error` for a rejected camera URL.
pub const INVALID_URL_MESSAGE: &str = "Invalid camera URL format";

/// Failures surfaced by the detection coordinator.
///
/// `Transient` never leaves the invoker: it is retried until the attempt
/// budget runs out and then reported as `Terminal`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("Invalid camera URL format")]
    InvalidUrl,

    #[error("Please enter a valid camera URL")]
    MissingCameraUrl,

    #[error("{0} detection already in progress")]
    ChannelBusy(ChannelKind),

    #[error("Please wait for {other} detection to complete")]
    ChannelBusyConflict { other: ChannelKind },

    #[error("{0}")]
    Transient(String),

    #[error("Detection failed: {0}")]
    Terminal(String),
}

impl DetectionError {
    /// True for failures that should count towards channel statistics.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DetectionError::Terminal(_))
    }
}

pub type Result<T> = std::result::Result<T, DetectionError>;
