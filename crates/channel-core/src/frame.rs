//! Frame vocabulary shared by the bridging and fax cores
//!
//! Every unit of traffic on a channel is one [`Frame`]: a block of voice
//! samples, one T.38 IFP packet, a DTMF begin/end event, or a control
//! signal. Dispatch sites match exhaustively instead of switching on a
//! numeric frame type.

use crate::format::AudioFormat;
use crate::t38::{T38Control, T38Parameters};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Minimum duration reported for a DTMF digit, used when synthesizing the
/// END event a leaving bridge member still owes
pub const MIN_DTMF_DURATION: Duration = Duration::from_millis(80);

/// DTMF digit definitions
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfDigit {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfDigit {
    /// Character representation of the digit
    pub fn to_char(self) -> char {
        match self {
            Self::Digit0 => '0',
            Self::Digit1 => '1',
            Self::Digit2 => '2',
            Self::Digit3 => '3',
            Self::Digit4 => '4',
            Self::Digit5 => '5',
            Self::Digit6 => '6',
            Self::Digit7 => '7',
            Self::Digit8 => '8',
            Self::Digit9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    /// Parse a digit from its character representation
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Digit0),
            '1' => Some(Self::Digit1),
            '2' => Some(Self::Digit2),
            '3' => Some(Self::Digit3),
            '4' => Some(Self::Digit4),
            '5' => Some(Self::Digit5),
            '6' => Some(Self::Digit6),
            '7' => Some(Self::Digit7),
            '8' => Some(Self::Digit8),
            '9' => Some(Self::Digit9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }
}

impl fmt::Display for DtmfDigit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// A block of audio samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    /// Sample encoding
    pub format: AudioFormat,
    /// Signed 16-bit samples (one block, at most a packetization interval)
    pub samples: Vec<i16>,
}

impl VoiceFrame {
    /// Build a signed-linear voice frame from samples
    pub fn slin(samples: Vec<i16>) -> Self {
        Self {
            format: AudioFormat::Slin,
            samples,
        }
    }
}

/// One T.38 IFP packet with its transport sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfpPacket {
    /// Encoded IFP payload
    pub payload: Bytes,
    /// Transport-layer sequence number, passed through to the engine so it
    /// can detect lost or reordered packets
    pub seq_no: u16,
}

/// DTMF begin/end events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfEvent {
    /// A digit press has started
    Begin {
        /// The pressed digit
        digit: DtmfDigit,
    },
    /// A digit press has ended
    End {
        /// The released digit
        digit: DtmfDigit,
        /// How long the digit was held
        duration: Duration,
    },
}

impl DtmfEvent {
    /// The digit this event refers to
    pub fn digit(&self) -> DtmfDigit {
        match self {
            Self::Begin { digit } | Self::End { digit, .. } => *digit,
        }
    }
}

/// Control signals indicated on or read from a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// The far end has hung up
    Hangup,
    /// The dialed leg is ringing
    Ringing,
    /// The dialed leg is busy
    Busy,
    /// The network reported congestion
    Congestion,
    /// The dialed leg answered
    Answer,
    /// The media source changed identity but the stream continues;
    /// downstream consumers should reset cached stream state
    SrcUpdate,
    /// The media source was replaced entirely
    SrcChange,
    /// A T.38 negotiation message, optionally carrying session parameters
    T38 {
        /// Which negotiation message this is
        control: T38Control,
        /// Session parameters, present on requests and confirmations
        parameters: Option<T38Parameters>,
    },
}

impl ControlSignal {
    /// Build a T.38 control signal without parameters
    pub fn t38(control: T38Control) -> Self {
        Self::T38 {
            control,
            parameters: None,
        }
    }
}

/// One unit of channel traffic
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Audio samples
    Voice(VoiceFrame),
    /// A T.38 IFP packet
    Modem(IfpPacket),
    /// DTMF begin or end
    Dtmf(DtmfEvent),
    /// A control signal
    Control(ControlSignal),
}

impl Frame {
    /// True for frames a suspended bridge member still keeps queued.
    /// Everything else is dropped while suspended.
    pub fn is_deferrable(&self) -> bool {
        match self {
            Frame::Dtmf(_) => true,
            Frame::Control(_) => true,
            Frame::Voice(_) | Frame::Modem(_) => false,
        }
    }

    /// Short tag for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Voice(_) => "voice",
            Frame::Modem(_) => "modem",
            Frame::Dtmf(DtmfEvent::Begin { .. }) => "dtmf-begin",
            Frame::Dtmf(DtmfEvent::End { .. }) => "dtmf-end",
            Frame::Control(_) => "control",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digit_round_trip() {
        for c in "0123456789*#ABCD".chars() {
            let digit = DtmfDigit::from_char(c).unwrap();
            assert_eq!(digit.to_char(), c);
        }
        assert!(DtmfDigit::from_char('x').is_none());
    }

    #[test]
    fn test_deferrable() {
        assert!(Frame::Control(ControlSignal::Hangup).is_deferrable());
        assert!(Frame::Dtmf(DtmfEvent::Begin {
            digit: DtmfDigit::Star
        })
        .is_deferrable());
        assert!(!Frame::Voice(VoiceFrame::slin(vec![0; 160])).is_deferrable());
        assert!(!Frame::Modem(IfpPacket {
            payload: Bytes::from_static(b"\x00"),
            seq_no: 0
        })
        .is_deferrable());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Frame::Control(ControlSignal::Answer).kind(), "control");
        assert_eq!(
            Frame::Dtmf(DtmfEvent::End {
                digit: DtmfDigit::Digit5,
                duration: Duration::from_millis(120)
            })
            .kind(),
            "dtmf-end"
        );
    }
}
