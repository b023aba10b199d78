//! Bridge technology trait and the two-party relay
//!
//! A technology decides how frames written into the bridge reach the other
//! members. Hooks receive a snapshot of the member list instead of the
//! bridge itself, so a technology can never re-enter the bridge lock that
//! its caller already holds.

use crate::bridge_channel::BridgeChannel;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use faxgate_channel_core::Frame;
use std::sync::Arc;
use tracing::trace;

/// Frame routing strategy for one bridge
#[async_trait]
pub trait BridgeTechnology: Send + Sync {
    /// Technology name used in logs
    fn name(&self) -> &str;

    /// Accept or refuse a joining member. `members` already contains
    /// `joining`. Called under the bridge lock; must not touch the bridge.
    async fn join(
        &self,
        members: &[Arc<BridgeChannel>],
        joining: &Arc<BridgeChannel>,
    ) -> Result<()>;

    /// A member left. `members` no longer contains `leaving`.
    async fn leave(&self, members: &[Arc<BridgeChannel>], leaving: &Arc<BridgeChannel>);

    /// Route one frame written by `from` toward the other members.
    async fn write(&self, members: &[Arc<BridgeChannel>], from: &Arc<BridgeChannel>, frame: Frame);

    /// A member was taken off the media path for playback or a hook.
    /// Called with a roster snapshot, not under the bridge lock.
    async fn suspended(&self, _members: &[Arc<BridgeChannel>], _member: &Arc<BridgeChannel>) {}

    /// A suspended member rejoined the media path.
    async fn unsuspended(&self, _members: &[Arc<BridgeChannel>], _member: &Arc<BridgeChannel>) {}
}

/// Two-party relay: every frame goes to the one other member
pub struct SimpleTechnology;

#[async_trait]
impl BridgeTechnology for SimpleTechnology {
    fn name(&self) -> &str {
        "simple_bridge"
    }

    async fn join(
        &self,
        members: &[Arc<BridgeChannel>],
        joining: &Arc<BridgeChannel>,
    ) -> Result<()> {
        if members.len() > 2 {
            return Err(BridgeError::technology_refused(
                self.name(),
                joining.name(),
                "simple bridge holds at most two members",
            ));
        }
        Ok(())
    }

    async fn leave(&self, _members: &[Arc<BridgeChannel>], leaving: &Arc<BridgeChannel>) {
        trace!("Member {} left simple bridge", leaving.name());
    }

    async fn write(&self, members: &[Arc<BridgeChannel>], from: &Arc<BridgeChannel>, frame: Frame) {
        for member in members {
            if Arc::ptr_eq(member, from) {
                continue;
            }
            member.queue_frame(frame.clone());
        }
    }
}
