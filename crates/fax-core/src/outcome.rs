//! Typed completion records for fax operations
//!
//! Every operation starts from a pre-seeded failure outcome so that an
//! early exit still reports something coherent; a real completion then
//! replaces it. The status field distinguishes a successful exchange, a
//! failed one, and a gateway pass-through, which is why a protocol
//! failure still travels through `Ok(FaxOutcome)` rather than an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of a fax operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaxStatus {
    /// A send or receive completed the T.30 exchange
    Success,
    /// The exchange failed or never ran
    Failed,
    /// The gateway relayed a complete exchange between two other parties
    Passed,
}

impl fmt::Display for FaxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Passed => write!(f, "PASSED"),
        }
    }
}

/// Which media path the exchange finished on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaxMode {
    /// Analog fax tones over PCM audio
    Audio,
    /// T.38 IFP packets
    T38,
}

impl fmt::Display for FaxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::T38 => write!(f, "T38"),
        }
    }
}

/// Whether the local endpoint transmits or receives the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaxDirection {
    /// The local endpoint sends pages
    Send,
    /// The local endpoint receives pages
    Receive,
}

impl fmt::Display for FaxDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Completion record of a fax operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaxOutcome {
    /// Final status of the operation
    pub status: FaxStatus,
    /// Engine diagnostic or transport description; "OK" on success
    pub error: String,
    /// Station identifier reported by the remote machine
    pub remote_station_id: String,
    /// Pages transferred
    pub pages: u32,
    /// Vertical resolution in rows per inch
    pub resolution: u32,
    /// Transfer rate in bits per second
    pub bit_rate: u32,
    /// The media path the exchange finished on
    pub mode: FaxMode,
}

impl FaxOutcome {
    /// The pre-seeded failure every operation starts from, with the given
    /// diagnostic text
    pub fn failed(error: impl Into<String>, mode: FaxMode) -> Self {
        Self {
            status: FaxStatus::Failed,
            error: error.into(),
            remote_station_id: String::new(),
            pages: 0,
            resolution: 0,
            bit_rate: 0,
            mode,
        }
    }

    /// True for `SUCCESS` and `PASSED`
    pub fn is_success(&self) -> bool {
        self.status != FaxStatus::Failed
    }
}

/// Result of the gateway's dial step, resolved from the peer leg's
/// control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialOutcome {
    /// The peer answered
    Answer,
    /// The peer reported busy
    Busy,
    /// The network reported congestion
    Congestion,
    /// The peer hung up before answering
    Cancel,
    /// The dial timeout elapsed without an answer
    NoAnswer,
    /// No usable response before the dial resolved
    ChanUnavail,
}

impl Default for DialOutcome {
    fn default() -> Self {
        Self::ChanUnavail
    }
}

impl fmt::Display for DialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answer => write!(f, "ANSWER"),
            Self::Busy => write!(f, "BUSY"),
            Self::Congestion => write!(f, "CONGESTION"),
            Self::Cancel => write!(f, "CANCEL"),
            Self::NoAnswer => write!(f, "NOANSWER"),
            Self::ChanUnavail => write!(f, "CHANUNAVAIL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_strings() {
        assert_eq!(FaxStatus::Passed.to_string(), "PASSED");
        assert_eq!(FaxMode::T38.to_string(), "T38");
        assert_eq!(FaxMode::Audio.to_string(), "audio");
        assert_eq!(DialOutcome::NoAnswer.to_string(), "NOANSWER");
        assert_eq!(DialOutcome::default(), DialOutcome::ChanUnavail);
    }

    #[test]
    fn test_preseeded_failure() {
        let outcome = FaxOutcome::failed("Channel problems", FaxMode::Audio);
        assert_eq!(outcome.status, FaxStatus::Failed);
        assert!(!outcome.is_success());
        assert_eq!(outcome.pages, 0);
    }

    #[test]
    fn test_outcome_serializes() {
        let outcome = FaxOutcome {
            status: FaxStatus::Success,
            error: "OK".into(),
            remote_station_id: "555 0100".into(),
            pages: 3,
            resolution: 196,
            bit_rate: 14400,
            mode: FaxMode::T38,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"Success\""));
        assert!(json.contains("555 0100"));
    }
}
