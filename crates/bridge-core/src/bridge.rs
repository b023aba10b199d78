//! The bridge itself: a member roster behind one async lock
//!
//! Membership changes (push, pull, swap, dissolve) all happen under the
//! roster lock. A member's back-pointer to its bridge and the roster entry
//! for that member are only ever changed together, under that lock; the
//! member side revalidates the pointer after acquiring the lock (see
//! [`BridgeChannel::lock_bridge`]). The roster and the back-pointers form
//! a reference cycle that every join breaks on the way out: a member is
//! always pulled before `join` returns.

use crate::actions::{ActionRunner, NullActionRunner};
use crate::bridge_channel::{BridgeChannel, MemberState};
use crate::error::{BridgeError, Result};
use crate::features::BridgeFeatures;
use crate::frame_queue::QueuedEntry;
use crate::technology::BridgeTechnology;
use faxgate_channel_core::{Channel, ControlSignal};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Roster state guarded by the bridge lock
pub(crate) struct BridgeInner {
    pub(crate) channels: Vec<Arc<BridgeChannel>>,
    pub(crate) dissolved: bool,
    joins: u64,
}

/// Bridge-level teardown policy
///
/// The per-member counterpart to `dissolve_on_hangup` lives in
/// [`BridgeFeatures`]; either flag dissolves the bridge when a hung-up
/// member leaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    /// Dissolve as soon as the last member leaves
    pub dissolve_when_empty: bool,
    /// Dissolve whenever a member leaves because its channel hung up
    pub dissolve_on_hangup: bool,
}

/// A bridge: members, a frame-routing technology and an action runner
pub struct Bridge {
    id: String,
    technology: Arc<dyn BridgeTechnology>,
    runner: Arc<dyn ActionRunner>,
    options: BridgeOptions,
    inner: Arc<AsyncMutex<BridgeInner>>,
}

impl Bridge {
    /// Create a bridge with the default (drop-everything) action runner
    pub fn new(technology: Arc<dyn BridgeTechnology>) -> Arc<Self> {
        Self::with_options(
            technology,
            Arc::new(NullActionRunner),
            BridgeOptions::default(),
        )
    }

    /// Create a bridge with an action runner for playback, applications,
    /// parking and transfers
    pub fn with_runner(
        technology: Arc<dyn BridgeTechnology>,
        runner: Arc<dyn ActionRunner>,
    ) -> Arc<Self> {
        Self::with_options(technology, runner, BridgeOptions::default())
    }

    /// Create a bridge with an explicit teardown policy
    pub fn with_options(
        technology: Arc<dyn BridgeTechnology>,
        runner: Arc<dyn ActionRunner>,
        options: BridgeOptions,
    ) -> Arc<Self> {
        let id = format!("bridge-{}", Uuid::new_v4());
        info!("Created {} using technology {}", id, technology.name());
        Arc::new(Self {
            id,
            technology,
            runner,
            options,
            inner: Arc::new(AsyncMutex::new(BridgeInner {
                channels: Vec::new(),
                dissolved: false,
                joins: 0,
            })),
        })
    }

    /// Unique bridge identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn technology(&self) -> &Arc<dyn BridgeTechnology> {
        &self.technology
    }

    pub(crate) fn runner_arc(&self) -> Arc<dyn ActionRunner> {
        self.runner.clone()
    }

    pub(crate) async fn inner_owned(&self) -> OwnedMutexGuard<BridgeInner> {
        self.inner.clone().lock_owned().await
    }

    /// Snapshot of the current members
    pub async fn members(&self) -> Vec<Arc<BridgeChannel>> {
        self.inner.lock().await.channels.clone()
    }

    /// Number of current members
    pub async fn member_count(&self) -> usize {
        self.inner.lock().await.channels.len()
    }

    /// True once the bridge has been dissolved; no further joins succeed
    pub async fn is_dissolved(&self) -> bool {
        self.inner.lock().await.dissolved
    }

    /// Total members pushed over the bridge's lifetime
    pub async fn total_joins(&self) -> u64 {
        self.inner.lock().await.joins
    }

    /// Join the calling task's channel to the bridge and service it until
    /// it leaves. Returns the member's final state.
    pub async fn join(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        features: BridgeFeatures,
    ) -> Result<MemberState> {
        let member = BridgeChannel::new(channel, features);
        self.join_member(&member, None).await
    }

    /// Join a prepared member, optionally swapping out an existing one.
    /// The swapped member is kicked with `END_NO_DISSOLVE` so its exit
    /// does not tear the bridge down.
    pub async fn join_member(
        self: &Arc<Self>,
        member: &Arc<BridgeChannel>,
        swap: Option<&Arc<BridgeChannel>>,
    ) -> Result<MemberState> {
        member.save_formats();
        {
            let mut inner = self.inner.lock().await;
            self.push_locked(&mut inner, member, swap).await?;
        }
        if let Err(e) = member.channel().indicate(ControlSignal::SrcChange).await {
            debug!("member {}: join source change failed: {}", member.name(), e);
        }
        for hook in member.join_hooks() {
            hook.run(member).await;
        }

        member.run_loop().await;

        for hook in member.leave_hooks() {
            hook.run(member).await;
        }
        if let Some((bridge, mut guard)) = member.lock_bridge().await {
            bridge.pull_locked(&mut guard, member).await;
        }
        // Settled against the bridge this join started on: a swapped-out
        // member has already been pulled and lost its back-pointer
        member.settle_owed_events(self).await;
        if let Err(e) = member.channel().indicate(ControlSignal::SrcChange).await {
            debug!("member {}: leave source change failed: {}", member.name(), e);
        }
        member.restore_formats().await;
        Ok(member.state())
    }

    /// Join on a spawned task. The returned member handle is the caller's
    /// way to kick or suspend the imparted channel.
    pub fn impart(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
        features: BridgeFeatures,
    ) -> (Arc<BridgeChannel>, JoinHandle<Result<MemberState>>) {
        let member = BridgeChannel::new(channel, features);
        let bridge = Arc::clone(self);
        let task_member = Arc::clone(&member);
        let handle = tokio::spawn(async move { bridge.join_member(&task_member, None).await });
        (member, handle)
    }

    /// Queue an entry to every member except `from`
    pub async fn queue_to_others(&self, from: &Arc<BridgeChannel>, entry: QueuedEntry) {
        let inner = self.inner.lock().await;
        for member in inner.channels.iter() {
            if !Arc::ptr_eq(member, from) {
                member.queue_entry(entry.clone());
            }
        }
    }

    /// Dissolve the bridge: every member is kicked and no new member can
    /// be pushed. Idempotent.
    pub async fn dissolve(&self) {
        let mut inner = self.inner.lock().await;
        self.dissolve_locked(&mut inner);
    }

    pub(crate) async fn push_locked(
        self: &Arc<Self>,
        inner: &mut BridgeInner,
        member: &Arc<BridgeChannel>,
        swap: Option<&Arc<BridgeChannel>>,
    ) -> Result<()> {
        if inner.dissolved {
            return Err(BridgeError::dissolved(&self.id));
        }
        if member.state() != MemberState::Wait {
            return Err(BridgeError::not_in_wait(
                member.name(),
                member.state().to_string(),
            ));
        }
        if let Some(swap) = swap {
            let present = inner.channels.iter().any(|m| Arc::ptr_eq(m, swap));
            if !present || swap.state() != MemberState::Wait {
                return Err(BridgeError::not_in_wait(
                    swap.name(),
                    swap.state().to_string(),
                ));
            }
            debug!("{}: swapping {} out for {}", self.id, swap.name(), member.name());
            // Pull the swap target here, under the same lock, so the
            // technology never sees both members at once. Its own task
            // notices the terminal state and skips the duplicate pull.
            swap.kick(MemberState::EndNoDissolve);
            self.pull_locked(inner, swap).await;
        }
        member.set_bridge(Arc::clone(self));
        inner.channels.push(Arc::clone(member));
        inner.joins += 1;
        if let Err(e) = self.technology.join(&inner.channels, member).await {
            inner.channels.retain(|m| !Arc::ptr_eq(m, member));
            member.clear_bridge();
            return Err(e);
        }
        debug!(
            "{}: pushed {} ({} member(s))",
            self.id,
            member.name(),
            inner.channels.len()
        );
        Ok(())
    }

    pub(crate) async fn pull_locked(
        self: &Arc<Self>,
        inner: &mut BridgeInner,
        member: &Arc<BridgeChannel>,
    ) {
        let before = inner.channels.len();
        inner.channels.retain(|m| !Arc::ptr_eq(m, member));
        if inner.channels.len() == before {
            return;
        }
        member.clear_bridge();
        let dropped = member.flush_queue();
        if dropped > 0 {
            debug!(
                "{}: dropped {} queued entries while pulling {}",
                self.id,
                dropped,
                member.name()
            );
        }
        self.technology.leave(&inner.channels, member).await;
        debug!(
            "{}: pulled {} ({} member(s) remain)",
            self.id,
            member.name(),
            inner.channels.len()
        );
        if member.state() != MemberState::EndNoDissolve {
            self.dissolve_check_locked(inner, member);
        }
    }

    /// After a departure, decide whether the bridge should wind down.
    /// When only lonely members remain, one of them is kicked; its own
    /// pull repeats the check, so the teardown cascades one member at a
    /// time until the bridge is empty.
    fn dissolve_check_locked(&self, inner: &mut BridgeInner, left: &Arc<BridgeChannel>) {
        if inner.dissolved {
            return;
        }
        if inner.channels.is_empty() && self.options.dissolve_when_empty {
            debug!("{}: last member left, dissolving", self.id);
            self.dissolve_locked(inner);
            return;
        }
        if left.channel().is_hungup()
            && (self.options.dissolve_on_hangup || left.dissolves_on_hangup())
        {
            debug!("{}: {} hung up, dissolving", self.id, left.name());
            self.dissolve_locked(inner);
            return;
        }
        if !inner.channels.is_empty() && inner.channels.iter().all(|m| m.is_lonely()) {
            if let Some(member) = inner
                .channels
                .iter()
                .find(|m| m.state() == MemberState::Wait)
            {
                debug!(
                    "{}: only lonely members remain, kicking {}",
                    self.id,
                    member.name()
                );
                member.kick(MemberState::End);
            }
        }
    }

    fn dissolve_locked(&self, inner: &mut BridgeInner) {
        if inner.dissolved {
            return;
        }
        info!("Dissolving {}", self.id);
        inner.dissolved = true;
        for member in inner.channels.iter() {
            member.kick(MemberState::End);
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("technology", &self.technology.name())
            .finish()
    }
}
