//! Error handling for channel operations
//!
//! Channel errors separate transport failures (fatal to the session that
//! observes them) from request/setup failures that only abort one
//! operation.

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Error type for channel operations
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Writing a frame to the channel failed
    #[error("Write to channel {channel} failed: {reason}")]
    WriteFailed { channel: String, reason: String },

    /// The channel has hung up; no further I/O is possible
    #[error("Channel {channel} has hung up")]
    Hangup { channel: String },

    /// Requesting a new outbound channel failed
    #[error("Unable to create channel to '{destination}': {reason}")]
    RequestFailed { destination: String, reason: String },

    /// Answering the channel failed
    #[error("Could not answer channel {channel}: {reason}")]
    AnswerFailed { channel: String, reason: String },

    /// Changing the read or write format failed
    #[error("Unable to set {direction} format {format} on channel {channel}")]
    FormatChangeFailed {
        channel: String,
        direction: String,
        format: String,
    },

    /// Indicating a control signal failed
    #[error("Indication on channel {channel} failed: {reason}")]
    IndicateFailed { channel: String, reason: String },

    /// A character that is not a DTMF digit
    #[error("Invalid DTMF digit: {value:?}")]
    InvalidDigit { value: char },
}

impl ChannelError {
    /// Create a new write failure error
    pub fn write_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a new hangup error
    pub fn hangup(channel: impl Into<String>) -> Self {
        Self::Hangup {
            channel: channel.into(),
        }
    }

    /// Create a new request failure error
    pub fn request_failed(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            destination: destination.into(),
            reason: reason.into(),
        }
    }

    /// Create a new answer failure error
    pub fn answer_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AnswerFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a new indication failure error
    pub fn indicate_failed(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IndicateFailed {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that end the session observing them
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::WriteFailed { .. } | Self::Hangup { .. } => true,

            Self::RequestFailed { .. }
            | Self::AnswerFailed { .. }
            | Self::FormatChangeFailed { .. }
            | Self::IndicateFailed { .. }
            | Self::InvalidDigit { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ChannelError::write_failed("leg-a", "pipe closed");
        assert!(matches!(err, ChannelError::WriteFailed { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_fatality() {
        assert!(ChannelError::hangup("leg-a").is_fatal());
        assert!(!ChannelError::request_failed("SIP/100", "no route").is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = ChannelError::FormatChangeFailed {
            channel: "leg-b".to_string(),
            direction: "read".to_string(),
            format: "slin".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("read"));
        assert!(display.contains("leg-b"));
    }
}
