//! Error handling for fax operations
//!
//! The application drivers keep the error surface narrow on purpose: an
//! `Err` means the operation could not run or the transport died under it.
//! A fax that negotiated, transferred pages and then failed at the T.30
//! level is a *normal* completion whose [`FaxOutcome`] carries the failure
//! status; it never surfaces here.
//!
//! [`FaxOutcome`]: crate::outcome::FaxOutcome

#![allow(missing_docs)]

use faxgate_channel_core::ChannelError;
use thiserror::Error;

/// Result type alias for fax operations
pub type Result<T> = std::result::Result<T, FaxError>;

/// Error type for fax operations
#[derive(Error, Debug)]
pub enum FaxError {
    /// A call leg failed at the transport level (hangup, write failure,
    /// request or answer failure)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The engine factory could not build a terminal or gateway core
    #[error("Fax engine failed to start: {reason}")]
    EngineInit { reason: String },

    /// An application was invoked with unusable arguments
    #[error("Invalid application argument: {reason}")]
    InvalidArgument { reason: String },
}

impl FaxError {
    /// Create a new engine-init error
    pub fn engine_init(reason: impl Into<String>) -> Self {
        Self::EngineInit {
            reason: reason.into(),
        }
    }

    /// Create a new invalid-argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// True when the error is the channel-error class the application
    /// drivers report to their caller (as opposed to a setup problem)
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Self::Channel(_))
    }
}
