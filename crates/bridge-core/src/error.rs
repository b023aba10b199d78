//! Error handling for bridge operations
//!
//! Push/pull failures abort only the one membership change that observed
//! them; they never tear down the whole bridge.

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The bridge has been dissolved; no further pushes succeed
    #[error("Bridge {bridge} is dissolved")]
    Dissolved { bridge: String },

    /// The member (or its swap target) is no longer in the WAIT state
    #[error("Channel {channel} is not waiting to be bridged (state {state})")]
    NotInWait { channel: String, state: String },

    /// The bridge technology refused the member
    #[error("Technology {technology} refused channel {channel}: {reason}")]
    TechnologyRefused {
        technology: String,
        channel: String,
        reason: String,
    },
}

impl BridgeError {
    /// Create a new dissolved error
    pub fn dissolved(bridge: impl Into<String>) -> Self {
        Self::Dissolved {
            bridge: bridge.into(),
        }
    }

    /// Create a new not-in-wait error
    pub fn not_in_wait(channel: impl Into<String>, state: impl Into<String>) -> Self {
        Self::NotInWait {
            channel: channel.into(),
            state: state.into(),
        }
    }

    /// Create a new technology-refused error
    pub fn technology_refused(
        technology: impl Into<String>,
        channel: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TechnologyRefused {
            technology: technology.into(),
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::technology_refused("two_party", "leg-a", "bridge full");
        let display = format!("{}", err);
        assert!(display.contains("two_party"));
        assert!(display.contains("bridge full"));
    }
}
