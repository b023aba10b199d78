//! T.38 negotiation state, control vocabulary and session parameters
//!
//! T.38 carries fax signaling/data as discrete IFP packets instead of
//! audio. A leg's negotiation state moves forward through the lattice
//! UNKNOWN/UNAVAILABLE -> NEGOTIATING -> NEGOTIATED | REJECTED; TERMINATED
//! ends an established T.38 session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// T.38 negotiation state of one channel leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum T38State {
    /// T.38 support unknown; negotiation has not been attempted
    Unknown,
    /// The leg cannot do T.38 at all
    Unavailable,
    /// A negotiation request is outstanding
    Negotiating,
    /// T.38 is up on this leg
    Negotiated,
    /// The far end refused the negotiation request
    Rejected,
    /// A previously negotiated T.38 session has ended
    Terminated,
}

impl T38State {
    /// True when a negotiation request could still succeed on this leg
    pub fn can_negotiate(&self) -> bool {
        matches!(self, Self::Unknown | Self::Negotiating)
    }

    /// True once the leg is carrying IFP packets
    pub fn is_negotiated(&self) -> bool {
        matches!(self, Self::Negotiated)
    }
}

impl fmt::Display for T38State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "UNKNOWN",
            Self::Unavailable => "UNAVAILABLE",
            Self::Negotiating => "NEGOTIATING",
            Self::Negotiated => "NEGOTIATED",
            Self::Rejected => "REJECTED",
            Self::Terminated => "TERMINATED",
        };
        write!(f, "{}", s)
    }
}

/// T.38 negotiation control messages carried in control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum T38Control {
    /// Ask the far end to switch this leg to T.38
    RequestNegotiate,
    /// The far end has completed negotiation; T.38 is up
    Negotiated,
    /// The far end refused to switch
    Refused,
    /// An established T.38 session has been torn down
    Terminated,
}

impl fmt::Display for T38Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RequestNegotiate => "REQUEST_NEGOTIATE",
            Self::Negotiated => "NEGOTIATED",
            Self::Refused => "REFUSED",
            Self::Terminated => "TERMINATED",
        };
        write!(f, "{}", s)
    }
}

/// Session parameters exchanged during T.38 negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct T38Parameters {
    /// Largest IFP packet the leg will accept, in bytes
    pub max_ifp: u16,
    /// Fax transfer rate in bits per second
    pub rate: u32,
    /// Far end strips HDLC fill bits before packetizing
    pub fill_bit_removal: bool,
    /// Far end may transcode MMR-compressed pages
    pub transcoding_mmr: bool,
    /// Far end may transcode JBIG-compressed pages
    pub transcoding_jbig: bool,
}

impl Default for T38Parameters {
    fn default() -> Self {
        Self {
            max_ifp: 400,
            rate: 14400,
            fill_bit_removal: false,
            transcoding_mmr: false,
            transcoding_jbig: false,
        }
    }
}
