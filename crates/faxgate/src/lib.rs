//! # FAXGATE: Channels, Bridging and T.30/T.38 Fax Sessions
//!
//! This is the umbrella crate for the FAXGATE stack. It re-exports the
//! member crates under stable module names so applications depend on one
//! crate:
//!
//! - [`channel_core`]: frames, control signals and the channel trait
//! - [`bridge_core`]: multi-party bridging with per-member tasks and
//!   feature hooks
//! - [`fax_core`]: T.30/T.38 fax sessions, audio-to-T.38 switchover and
//!   the fax gateway
//!
//! The [`prelude`] gathers the types most applications touch.
//!
//! ## Usage
//!
//! ```rust
//! use faxgate::fax_core::{FaxConfig, RuntimeContext};
//!
//! let ctx = RuntimeContext::new(FaxConfig {
//!     local_station_id: "555 0100".into(),
//!     ..FaxConfig::default()
//! });
//! assert_eq!(ctx.config().local_station_id, "555 0100");
//! ```

#![deny(missing_docs)]

/// Frame, control-signal and channel abstractions
pub use faxgate_channel_core as channel_core;

/// Multi-party media bridging
pub use faxgate_bridge_core as bridge_core;

/// Fax sessions, switchover and gateway
pub use faxgate_fax_core as fax_core;

/// The types most applications need, in one import
pub mod prelude {
    pub use crate::bridge_core::{
        Bridge, BridgeChannel, BridgeFeatures, BridgeOptions, BridgeTechnology, MemberState,
        SimpleTechnology,
    };
    pub use crate::channel_core::{
        Channel, ChannelId, ChannelPair, ControlSignal, Frame, T38Control, T38Parameters,
        T38State, VoiceFrame,
    };
    pub use crate::fax_core::{
        ChannelRequester, EngineFactory, FaxConfig, FaxDirection, FaxError, FaxEvent,
        FaxEventHandler, FaxGateway, FaxMode, FaxOutcome, FaxStatus, GatewayOutcome, ReceiveFax,
        RuntimeContext, SendFax,
    };
}

/// Version information for the FAXGATE stack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
