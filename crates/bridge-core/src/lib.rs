//! # Bridge-Core: Channel Bridging Framework
//!
//! This library bridges channels: each member channel is serviced by its
//! own task, frames read from one member are routed to the others by a
//! pluggable technology, and per-member feature hooks (DTMF codes,
//! interval timers, join/leave/hangup callbacks) run on the member's own
//! task. It is the relay layer underneath the FAXGATE gateway
//! applications.
//!
//! ## Features
//!
//! - **One task per member**: all dispatch for a member happens on the
//!   task that joined it, via a FIFO queue with a wake signal
//! - **Lifecycle states**: `WAIT` until kicked to `END` or
//!   `END_NO_DISSOLVE`; the first terminal state wins
//! - **Suspension**: media is dropped while a member is borrowed for
//!   playback, applications or feature hooks
//! - **DTMF features**: prefix-matched digit collection with an
//!   inter-digit timeout
//! - **Interval hooks**: a min-heap of periodic callbacks that skips
//!   missed trips instead of bunching them
//! - **Dissolve semantics**: hangup-driven teardown and the lonely-member
//!   cascade
//!
//! ## Usage
//!
//! ```rust
//! use faxgate_bridge_core::{Bridge, BridgeFeatures, SimpleTechnology};
//! use faxgate_channel_core::ChannelPair;
//! use std::sync::Arc;
//!
//! # async fn demo() -> faxgate_bridge_core::Result<()> {
//! let bridge = Bridge::new(Arc::new(SimpleTechnology));
//! let (leg_a, _far_a) = ChannelPair::new("caller", "caller-remote");
//! let (leg_b, _far_b) = ChannelPair::new("callee", "callee-remote");
//! let (_member_a, task_a) = bridge.impart(leg_a, BridgeFeatures::new());
//! let (_member_b, task_b) = bridge.impart(leg_b, BridgeFeatures::new());
//! # let _ = (task_a, task_b);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod actions;
pub mod bridge;
pub mod bridge_channel;
pub mod error;
pub mod features;
pub mod frame_queue;
pub mod technology;

// Re-export commonly used types and traits
pub use actions::{ActionCallback, ActionRunner, BridgeAction, NullActionRunner};
pub use bridge::{Bridge, BridgeOptions};
pub use bridge_channel::{BridgeChannel, MemberState};
pub use error::{BridgeError, Result};
pub use features::{
    BridgeFeatures, DtmfHook, DtmfHookCallback, HookCallback, IntervalCallback, TalkCallback,
    DEFAULT_DIGIT_TIMEOUT, MAX_FEATURE_DIGITS,
};
pub use frame_queue::{FrameQueue, QueuedEntry};
pub use technology::{BridgeTechnology, SimpleTechnology};

/// Version information for the bridging library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
