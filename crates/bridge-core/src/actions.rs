//! Bridge actions
//!
//! Actions are queued to a member and executed on that member's own task,
//! inside the suspend/source-update envelope where the action needs the
//! media path. Playback, application execution, parking and transfers are
//! delegated to a registered [`ActionRunner`] so the bridging core stays
//! free of dialplan knowledge.

use crate::bridge_channel::BridgeChannel;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A custom callback executed on the member's task
#[async_trait]
pub trait ActionCallback: Send + Sync {
    /// Invoked on the member's task when the queued action is dispatched
    async fn run(&self, member: &Arc<BridgeChannel>);
}

/// Executes the dialplan-facing actions on behalf of the bridge
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Play a sound file to the member
    async fn play_file(&self, member: &Arc<BridgeChannel>, file: &str) {
        debug!("no action runner: dropping playback of '{}' for {}", file, member.name());
    }

    /// Run a dialplan application against the member
    async fn run_app(&self, member: &Arc<BridgeChannel>, app: &str, args: &str) {
        debug!(
            "no action runner: dropping application {}({}) for {}",
            app,
            args,
            member.name()
        );
    }

    /// Park the member in a holding lot
    async fn park(&self, member: &Arc<BridgeChannel>, lot: &str) {
        debug!("no action runner: dropping park to '{}' for {}", lot, member.name());
    }

    /// Blind-transfer the member toward a new destination
    async fn blind_transfer(&self, member: &Arc<BridgeChannel>, destination: &str) {
        debug!(
            "no action runner: dropping blind transfer to '{}' for {}",
            destination,
            member.name()
        );
    }

    /// Complete an attended transfer of the member
    async fn attended_transfer(&self, member: &Arc<BridgeChannel>, target: &str) {
        debug!(
            "no action runner: dropping attended transfer to '{}' for {}",
            target,
            member.name()
        );
    }
}

/// Runner that drops every action. The default until one is registered.
pub struct NullActionRunner;

#[async_trait]
impl ActionRunner for NullActionRunner {}

/// Work queued to a bridge member beyond plain frames
#[derive(Clone)]
#[allow(missing_docs)]
pub enum BridgeAction {
    /// Play a DTMF digit string toward this member
    DtmfStream { digits: String },
    /// Play a sound file to this member
    PlayFile { file: String },
    /// Run a dialplan application on this member
    RunApp { app: String, args: String },
    /// Run a custom callback; `suspend_media` wraps it in the
    /// suspend/source-update envelope
    Callback {
        callback: Arc<dyn ActionCallback>,
        suspend_media: bool,
    },
    /// Talk detection notification from the technology
    Talking { start: bool },
    /// Park this member
    Park { lot: String },
    /// Blind-transfer this member
    BlindTransfer { destination: String },
    /// Attended-transfer this member
    AttendedTransfer { target: String },
}

impl fmt::Debug for BridgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DtmfStream { digits } => f.debug_struct("DtmfStream").field("digits", digits).finish(),
            Self::PlayFile { file } => f.debug_struct("PlayFile").field("file", file).finish(),
            Self::RunApp { app, args } => f
                .debug_struct("RunApp")
                .field("app", app)
                .field("args", args)
                .finish(),
            Self::Callback { suspend_media, .. } => f
                .debug_struct("Callback")
                .field("suspend_media", suspend_media)
                .finish_non_exhaustive(),
            Self::Talking { start } => f.debug_struct("Talking").field("start", start).finish(),
            Self::Park { lot } => f.debug_struct("Park").field("lot", lot).finish(),
            Self::BlindTransfer { destination } => f
                .debug_struct("BlindTransfer")
                .field("destination", destination)
                .finish(),
            Self::AttendedTransfer { target } => f
                .debug_struct("AttendedTransfer")
                .field("target", target)
                .finish(),
        }
    }
}
