//! # Fax-Core: T.30/T.38 Fax Sessions and Gateway
//!
//! This library drives fax exchanges over the channel abstraction: a
//! terminating session sends or receives a document through an external
//! T.30/T.38 engine, and a gateway session bridges a plain-audio leg to a
//! T.38 leg, translating between PCM fax tones and IFP packets. The
//! engine itself (DSP, HDLC, TIFF handling) is an external collaborator
//! consumed through traits; this crate owns the session lifecycle,
//! switchover policy, watchdogs and reporting around it.
//!
//! ## Features
//!
//! - **Terminating drivers**: [`SendFax`] and [`ReceiveFax`] with
//!   audio/T.38 switchover mid-exchange
//! - **Gateway driver**: [`FaxGateway`] dials a peer, bridges, and relays
//!   between audio and T.38 when exactly one leg negotiates
//! - **Engine traits**: object-safe surface for the external fax engine,
//!   with a single-shot completion reporter
//! - **Watchdogs**: no-progress and total-elapsed abort policy
//! - **Typed outcomes and events**: [`FaxOutcome`], [`GatewayOutcome`]
//!   and a fan-out event registry
//!
//! ## Usage
//!
//! ```rust
//! use faxgate_fax_core::{FaxConfig, RuntimeContext};
//!
//! let ctx = RuntimeContext::new(FaxConfig {
//!     local_station_id: "555 0100".into(),
//!     ..FaxConfig::default()
//! });
//! assert!(ctx.config().ecm);
//! ```

#![deny(missing_docs)]

pub mod apps;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod outcome;
pub mod session;
pub mod switchover;
pub mod t38_path;

// Re-export commonly used types and traits
pub use apps::{ChannelRequester, FaxGateway, GatewayOutcome, ReceiveFax, SendFax};
pub use config::{FaxConfig, RuntimeContext};
pub use engine::{
    log_engine_message, phase_e_channel, EngineFactory, EngineLogLevel, FaxTone, GatewayStats,
    PhaseEHandle, PhaseEReport, PhaseEReporter, T30State, T30Terminal, T38GatewayCore, T38Terminal,
    TerminalConfig, ToneDetector,
};
pub use error::{FaxError, Result};
pub use events::{EventRegistry, FaxEvent, FaxEventHandler};
pub use gateway::{
    gateway_applicable, AudioBridge, BridgeExit, GatewayDriver, GatewayRelay, RelayExit,
};
pub use outcome::{DialOutcome, FaxDirection, FaxMode, FaxOutcome, FaxStatus};
pub use session::{FaxSession, SessionState, Watchdog, IDLE_WAIT};
pub use switchover::{AudioPhaseOutcome, SwitchoverController};
pub use t38_path::T38Phase;

/// Version information for the fax library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
