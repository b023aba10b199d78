//! # Channel-Core: Frame and Channel Abstractions
//!
//! This library provides the media/control frame vocabulary and the async
//! channel abstraction shared by the FAXGATE bridging and fax cores. A
//! channel is one call leg: frames are read from it, written to it, and
//! control signals (ringing, answer, T.38 negotiation messages) are
//! indicated on it.
//!
//! ## Features
//!
//! - **Tagged frames**: voice, modem (T.38 IFP), DTMF begin/end and control
//!   signals as one exhaustive enum
//! - **T.38 vocabulary**: negotiation state lattice, control messages and
//!   session parameters
//! - **Async `Channel` trait**: `read`/`write`/`indicate` plus format and
//!   answer/hangup management
//! - **`ChannelPair`**: an in-process leg (two connected endpoints) used by
//!   the application drivers' tests and local bridging
//!
//! ## Usage
//!
//! ```rust
//! use faxgate_channel_core::{ChannelPair, Channel, Frame, ControlSignal};
//!
//! # async fn demo() -> faxgate_channel_core::Result<()> {
//! let (app_side, far_side) = ChannelPair::new("leg-a", "leg-a-remote");
//! far_side.write(Frame::Control(ControlSignal::Ringing)).await?;
//! let frame = app_side.read().await?;
//! assert!(matches!(frame, Some(Frame::Control(ControlSignal::Ringing))));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod channel;
pub mod error;
pub mod format;
pub mod frame;
pub mod t38;

// Re-export commonly used types and traits
pub use channel::{Channel, ChannelEndpoint, ChannelId, ChannelPair};
pub use error::{ChannelError, Result};
pub use format::{AudioFormat, MAX_BLOCK_SAMPLES, PTIME_MS, SAMPLE_RATE};
pub use frame::{
    ControlSignal, DtmfDigit, DtmfEvent, Frame, IfpPacket, VoiceFrame, MIN_DTMF_DURATION,
};
pub use t38::{T38Control, T38Parameters, T38State};

/// Version information for the channel library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
