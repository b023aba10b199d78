//! One channel's membership in a bridge
//!
//! Every member is serviced by exactly one task: the task that called
//! [`Bridge::join`](crate::bridge::Bridge::join) (or the task spawned by
//! `impart`). That task owns the run loop, which multiplexes four event
//! sources: the poke signal (kicks and unsuspends), the member's outbound
//! queue, frames read from the channel, and hook deadlines. All frame and
//! action dispatch for the member happens on this one task, so hooks and
//! actions never race each other.
//!
//! Other tasks interact with a member only through its queue, `kick`,
//! `suspend` and `unsuspend`.

use crate::actions::BridgeAction;
use crate::bridge::{Bridge, BridgeInner};
use crate::features::{BridgeFeatures, DtmfHook, HookCallback, TalkCallback, MAX_FEATURE_DIGITS};
use crate::frame_queue::{FrameQueue, QueuedEntry};
use faxgate_channel_core::{
    AudioFormat, Channel, ControlSignal, DtmfDigit, DtmfEvent, Frame, MIN_DTMF_DURATION,
};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Lifecycle state of a bridge member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Serving frames in the run loop
    Wait,
    /// Leaving; the departure runs the dissolve check
    End,
    /// Leaving without a dissolve check (swap-outs and orderly teardown)
    EndNoDissolve,
}

impl MemberState {
    /// True for the two leaving states. Terminal states never change.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MemberState::Wait)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberState::Wait => "WAIT",
            MemberState::End => "END",
            MemberState::EndNoDissolve => "END_NO_DISSOLVE",
        };
        write!(f, "{}", s)
    }
}

/// A DTMF begin that entered the bridge without its end
struct OwedDtmf {
    digit: DtmfDigit,
    since: Instant,
}

/// A channel bound to a bridge, with its queue, state and feature hooks
pub struct BridgeChannel {
    channel: Arc<dyn Channel>,
    state: Mutex<MemberState>,
    /// Back-pointer to the owning bridge; cleared when the member is pulled
    bridge: Mutex<Option<Arc<Bridge>>>,
    queue: FrameQueue,
    /// Wakes the run loop after kicks and unsuspends
    poke: Notify,
    /// Suspension count; media is dropped while non-zero
    suspended: AtomicUsize,
    features: Mutex<BridgeFeatures>,
    /// DTMF digits collected toward a feature code
    collected: Mutex<String>,
    /// Inter-digit deadline of an in-progress collection
    digit_deadline: Mutex<Option<Instant>>,
    owed_dtmf: Mutex<Option<OwedDtmf>>,
    saved_read_format: Mutex<Option<AudioFormat>>,
    saved_write_format: Mutex<Option<AudioFormat>>,
}

impl BridgeChannel {
    /// Bind a channel and its feature set into a new member
    pub fn new(channel: Arc<dyn Channel>, features: BridgeFeatures) -> Arc<Self> {
        Arc::new(Self {
            channel,
            state: Mutex::new(MemberState::Wait),
            bridge: Mutex::new(None),
            queue: FrameQueue::new(),
            poke: Notify::new(),
            suspended: AtomicUsize::new(0),
            features: Mutex::new(features),
            collected: Mutex::new(String::new()),
            digit_deadline: Mutex::new(None),
            owed_dtmf: Mutex::new(None),
            saved_read_format: Mutex::new(None),
            saved_write_format: Mutex::new(None),
        })
    }

    /// The underlying channel
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Channel name, for logs
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Current lifecycle state
    pub fn state(&self) -> MemberState {
        *self.state.lock()
    }

    /// The bridge this member currently belongs to
    pub fn bridge(&self) -> Option<Arc<Bridge>> {
        self.bridge.lock().clone()
    }

    /// Move the member to a terminal state and wake its task. The first
    /// terminal state wins; later kicks are no-ops.
    pub fn kick(&self, state: MemberState) {
        debug_assert!(state.is_terminal());
        {
            let mut current = self.state.lock();
            if current.is_terminal() {
                return;
            }
            debug!("member {}: {} -> {}", self.name(), *current, state);
            *current = state;
        }
        self.poke.notify_one();
    }

    /// Suspend the member. Media stops being queued to it and its run loop
    /// parks until the matching `unsuspend`. Suspensions nest. The poke
    /// makes a task parked in its select re-check the flag.
    pub fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        self.poke.notify_one();
    }

    /// Drop one suspension; wakes the task when the count reaches zero
    pub fn unsuspend(&self) {
        let prev = self
            .suspended
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .ok();
        if prev == Some(1) {
            self.poke.notify_one();
        }
    }

    /// True while at least one suspension is outstanding
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    /// Queue a frame toward this member's channel
    pub fn queue_frame(&self, frame: Frame) {
        self.queue_entry(QueuedEntry::Frame(frame));
    }

    /// Queue an action for this member's task
    pub fn queue_action(&self, action: BridgeAction) {
        self.queue_entry(QueuedEntry::Action(action));
    }

    /// Queue a control signal toward this member's channel
    pub fn queue_control(&self, signal: ControlSignal) {
        self.queue_frame(Frame::Control(signal));
    }

    /// Write a control signal into the bridge toward the other members
    pub async fn write_control(self: &Arc<Self>, signal: ControlSignal) {
        self.route_frame(Frame::Control(signal)).await;
    }

    /// Stream digits to every other member, one queued action each
    pub async fn write_dtmf_stream(self: &Arc<Self>, digits: &str) {
        if let Some(bridge) = self.bridge() {
            bridge
                .queue_to_others(
                    self,
                    QueuedEntry::Action(BridgeAction::DtmfStream {
                        digits: digits.to_string(),
                    }),
                )
                .await;
        }
    }

    /// Queue policy: accepted then dropped once the member is leaving, and
    /// non-deferrable entries are dropped while suspended.
    pub(crate) fn queue_entry(&self, entry: QueuedEntry) {
        if self.state().is_terminal() {
            trace!("member {}: dropping {:?} queued after leave", self.name(), entry);
            return;
        }
        if self.is_suspended() && !entry.is_deferrable() {
            trace!("member {}: dropping {:?} while suspended", self.name(), entry);
            return;
        }
        self.queue.push(entry);
    }

    pub(crate) fn set_bridge(&self, bridge: Arc<Bridge>) {
        *self.bridge.lock() = Some(bridge);
    }

    pub(crate) fn clear_bridge(&self) {
        *self.bridge.lock() = None;
    }

    pub(crate) fn flush_queue(&self) -> usize {
        self.queue.flush()
    }

    pub(crate) fn is_lonely(&self) -> bool {
        self.features.lock().lonely
    }

    pub(crate) fn dissolves_on_hangup(&self) -> bool {
        self.features.lock().dissolve_on_hangup
    }

    pub(crate) fn join_hooks(&self) -> Vec<Arc<dyn HookCallback>> {
        self.features.lock().join_hooks()
    }

    pub(crate) fn leave_hooks(&self) -> Vec<Arc<dyn HookCallback>> {
        self.features.lock().leave_hooks()
    }

    pub(crate) fn save_formats(&self) {
        *self.saved_read_format.lock() = Some(self.channel.read_format());
        *self.saved_write_format.lock() = Some(self.channel.write_format());
    }

    /// Put the channel back on the formats it joined with, if bridging
    /// changed them and the channel is still up
    pub(crate) async fn restore_formats(&self) {
        if self.channel.is_hungup() {
            return;
        }
        let saved_read = self.saved_read_format.lock().take();
        if let Some(format) = saved_read {
            if self.channel.read_format() != format {
                debug!("member {}: restoring read format {}", self.name(), format);
                if let Err(e) = self.channel.set_read_format(format).await {
                    debug!("member {}: read format restore failed: {}", self.name(), e);
                }
            }
        }
        let saved_write = self.saved_write_format.lock().take();
        if let Some(format) = saved_write {
            if self.channel.write_format() != format {
                debug!("member {}: restoring write format {}", self.name(), format);
                if let Err(e) = self.channel.set_write_format(format).await {
                    debug!("member {}: write format restore failed: {}", self.name(), e);
                }
            }
        }
    }

    /// Lock the owning bridge, retrying until the member's bridge pointer
    /// is the same bridge before and after the lock was acquired. The
    /// pointer can move while this task waits on the lock.
    pub(crate) async fn lock_bridge(
        self: &Arc<Self>,
    ) -> Option<(Arc<Bridge>, OwnedMutexGuard<BridgeInner>)> {
        loop {
            let target = { self.bridge.lock().clone() }?;
            let guard = target.inner_owned().await;
            match &*self.bridge.lock() {
                Some(current) if Arc::ptr_eq(current, &target) => return Some((target, guard)),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Service the member until it reaches a terminal state. Runs on the
    /// joining task; everything the member does happens here.
    pub(crate) async fn run_loop(self: &Arc<Self>) {
        while self.state() == MemberState::Wait {
            if self.is_suspended() {
                // Parked: queued entries wait until the unsuspend poke
                self.poke.notified().await;
                continue;
            }
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = self.poke.notified() => {}
                _ = self.queue.wait() => {
                    if let Some(entry) = self.queue.pop() {
                        self.dispatch_entry(entry).await;
                    }
                }
                result = self.channel.read() => {
                    match result {
                        Ok(Some(frame)) => self.handle_read(frame).await,
                        Ok(None) => self.handle_hangup().await,
                        Err(e) => {
                            warn!("member {}: read failed: {}", self.name(), e);
                            self.kick(MemberState::End);
                        }
                    }
                }
                _ = sleep_until_opt(deadline) => {
                    self.handle_deadlines().await;
                }
            }
        }
    }

    /// Earliest of the inter-digit deadline and the next interval trip
    fn next_deadline(&self) -> Option<Instant> {
        let interval = self.features.lock().next_interval_deadline();
        let digit = *self.digit_deadline.lock();
        match (interval, digit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    async fn handle_deadlines(self: &Arc<Self>) {
        let now = Instant::now();
        let digit_due = self.digit_deadline.lock().is_some_and(|at| at <= now);
        if digit_due {
            self.feature_timeout().await;
        }
        self.run_due_intervals().await;
    }

    async fn dispatch_entry(self: &Arc<Self>, entry: QueuedEntry) {
        match entry {
            QueuedEntry::Frame(frame) => self.handle_write(frame).await,
            QueuedEntry::Action(action) => self.run_action(action).await,
        }
    }

    /// Write one queued frame out to the channel. A fatal write error ends
    /// the membership.
    async fn handle_write(self: &Arc<Self>, frame: Frame) {
        if let Err(e) = self.deliver(frame).await {
            if e.is_fatal() {
                warn!("member {}: write failed, leaving: {}", self.name(), e);
                self.kick(MemberState::End);
            } else {
                debug!("member {}: write failed: {}", self.name(), e);
            }
        }
    }

    async fn deliver(&self, frame: Frame) -> faxgate_channel_core::Result<()> {
        match frame {
            Frame::Control(signal) => self.channel.indicate(signal).await,
            other => self.channel.write(other).await,
        }
    }

    async fn run_action(self: &Arc<Self>, action: BridgeAction) {
        trace!("member {}: action {:?}", self.name(), action);
        match action {
            BridgeAction::DtmfStream { digits } => {
                let member = Arc::clone(self);
                self.with_suspended(async move { member.stream_dtmf(&digits).await })
                    .await;
            }
            BridgeAction::PlayFile { file } => {
                let Some(runner) = self.bridge().map(|b| b.runner_arc()) else {
                    return;
                };
                let member = Arc::clone(self);
                self.with_suspended(async move { runner.play_file(&member, &file).await })
                    .await;
            }
            BridgeAction::RunApp { app, args } => {
                let Some(runner) = self.bridge().map(|b| b.runner_arc()) else {
                    return;
                };
                let member = Arc::clone(self);
                self.with_suspended(async move { runner.run_app(&member, &app, &args).await })
                    .await;
            }
            BridgeAction::Callback {
                callback,
                suspend_media,
            } => {
                if suspend_media {
                    let member = Arc::clone(self);
                    self.with_suspended(async move { callback.run(&member).await })
                        .await;
                } else {
                    callback.run(self).await;
                }
            }
            BridgeAction::Talking { start } => {
                let hook: Option<Arc<dyn TalkCallback>> = self.features.lock().talk_hook();
                if let Some(hook) = hook {
                    hook.run(self, start).await;
                }
            }
            BridgeAction::Park { lot } => {
                let Some(runner) = self.bridge().map(|b| b.runner_arc()) else {
                    return;
                };
                let member = Arc::clone(self);
                self.with_suspended(async move { runner.park(&member, &lot).await })
                    .await;
            }
            BridgeAction::BlindTransfer { destination } => {
                if let Some(runner) = self.bridge().map(|b| b.runner_arc()) {
                    runner.blind_transfer(self, &destination).await;
                }
            }
            BridgeAction::AttendedTransfer { target } => {
                if let Some(runner) = self.bridge().map(|b| b.runner_arc()) {
                    runner.attended_transfer(self, &target).await;
                }
            }
        }
    }

    /// Suspend envelope for work that borrows the member's media path:
    /// suspend, mark a new media source, run, mark again, unsuspend.
    async fn with_suspended<Fut>(self: &Arc<Self>, fut: Fut)
    where
        Fut: Future<Output = ()>,
    {
        self.suspend();
        self.notify_suspension(true).await;
        if let Err(e) = self.channel.indicate(ControlSignal::SrcUpdate).await {
            debug!("member {}: source update failed: {}", self.name(), e);
        }
        fut.await;
        if let Err(e) = self.channel.indicate(ControlSignal::SrcUpdate).await {
            debug!("member {}: source update failed: {}", self.name(), e);
        }
        self.unsuspend();
        self.notify_suspension(false).await;
    }

    /// Tell the technology the member's media path changed hands
    async fn notify_suspension(self: &Arc<Self>, entering: bool) {
        let Some((bridge, guard)) = self.lock_bridge().await else {
            return;
        };
        let members = guard.channels.clone();
        drop(guard);
        if entering {
            bridge.technology().suspended(&members, self).await;
        } else {
            bridge.technology().unsuspended(&members, self).await;
        }
    }

    /// Send a digit string out the member's channel as begin/end pairs
    async fn stream_dtmf(self: &Arc<Self>, digits: &str) {
        for c in digits.chars() {
            let Some(digit) = DtmfDigit::from_char(c) else {
                warn!("member {}: ignoring non-digit '{}' in stream", self.name(), c);
                continue;
            };
            if self
                .deliver(Frame::Dtmf(DtmfEvent::Begin { digit }))
                .await
                .is_err()
            {
                return;
            }
            if self
                .deliver(Frame::Dtmf(DtmfEvent::End {
                    digit,
                    duration: MIN_DTMF_DURATION,
                }))
                .await
                .is_err()
            {
                return;
            }
        }
    }

    /// A frame arrived from the channel
    async fn handle_read(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::Control(ControlSignal::Hangup) => self.handle_hangup().await,
            Frame::Dtmf(event) => self.handle_dtmf(event).await,
            frame => self.route_frame(frame).await,
        }
    }

    /// The channel hung up: run hangup hooks on this task, then leave
    async fn handle_hangup(self: &Arc<Self>) {
        debug!("member {}: channel hung up", self.name());
        let hooks = self.features.lock().hangup_hooks();
        for hook in hooks {
            hook.run(self).await;
        }
        self.kick(MemberState::End);
    }

    async fn handle_dtmf(self: &Arc<Self>, event: DtmfEvent) {
        let intercept = {
            let features = self.features.lock();
            features.has_dtmf_hooks() && !features.dtmf_passthrough
        };
        if !intercept {
            self.route_frame(Frame::Dtmf(event)).await;
            return;
        }
        match event {
            // Feature codes collect completed digits
            DtmfEvent::Begin { .. } => {}
            DtmfEvent::End { digit, .. } => self.feature_digit(digit).await,
        }
    }

    /// One completed digit toward a feature code
    async fn feature_digit(self: &Arc<Self>, digit: DtmfDigit) {
        let collected = {
            let mut collected = self.collected.lock();
            collected.push(digit.to_char());
            collected.clone()
        };
        let (has_prefix, exact, longer) = {
            let features = self.features.lock();
            (
                features.dtmf_prefix_exists(&collected),
                features.dtmf_exact_match(&collected),
                features.dtmf_longer_candidate(&collected),
            )
        };
        if !has_prefix {
            self.clear_collection();
            self.flush_collected(collected).await;
            return;
        }
        if let Some(hook) = exact {
            if !longer {
                self.clear_collection();
                self.run_feature(hook).await;
                return;
            }
        }
        if collected.len() >= MAX_FEATURE_DIGITS {
            // No room to disambiguate further
            self.clear_collection();
            let exact = self.features.lock().dtmf_exact_match(&collected);
            match exact {
                Some(hook) => self.run_feature(hook).await,
                None => self.flush_collected(collected).await,
            }
            return;
        }
        let timeout = self.features.lock().digit_timeout;
        *self.digit_deadline.lock() = Some(Instant::now() + timeout);
    }

    /// The inter-digit timeout expired mid-collection
    async fn feature_timeout(self: &Arc<Self>) {
        let collected = {
            let mut collected = self.collected.lock();
            let taken = collected.clone();
            collected.clear();
            taken
        };
        *self.digit_deadline.lock() = None;
        if collected.is_empty() {
            return;
        }
        let exact = self.features.lock().dtmf_exact_match(&collected);
        match exact {
            Some(hook) => self.run_feature(hook).await,
            None => self.flush_collected(collected).await,
        }
    }

    fn clear_collection(&self) {
        self.collected.lock().clear();
        *self.digit_deadline.lock() = None;
    }

    /// Run a matched feature inside the suspend envelope; the hook decides
    /// whether it stays registered
    async fn run_feature(self: &Arc<Self>, hook: DtmfHook) {
        debug!("member {}: feature '{}' matched", self.name(), hook.code);
        let member = Arc::clone(self);
        let code = hook.code.clone();
        self.with_suspended(async move {
            if hook.callback.run(&member).await {
                member.features.lock().remove_dtmf_hook(&code);
            }
        })
        .await;
        // A hook borrows the whole channel and may hang it up
        if self.channel.is_hungup() {
            self.kick(MemberState::End);
        }
    }

    /// Digits that matched no feature are streamed to the other members
    async fn flush_collected(self: &Arc<Self>, digits: String) {
        debug!(
            "member {}: no feature matches '{}', passing into the bridge",
            self.name(),
            digits
        );
        self.write_dtmf_stream(&digits).await;
    }

    /// Run every interval hook that is due, under one suspension
    async fn run_due_intervals(self: &Arc<Self>) {
        let first = { self.features.lock().pop_due(Instant::now()) };
        let Some(first) = first else {
            return;
        };
        self.suspend();
        self.notify_suspension(true).await;
        let mut entry = Some(first);
        while let Some(current) = entry {
            if current.media {
                if let Err(e) = self.channel.indicate(ControlSignal::SrcUpdate).await {
                    debug!("member {}: source update failed: {}", self.name(), e);
                }
            }
            let media = current.media;
            let old_interval = current.interval;
            let next = current.callback.run(self).await;
            if media {
                if let Err(e) = self.channel.indicate(ControlSignal::SrcUpdate).await {
                    debug!("member {}: source update failed: {}", self.name(), e);
                }
            }
            match next {
                Some(interval) => {
                    let interval = if interval.is_zero() { old_interval } else { interval };
                    self.features
                        .lock()
                        .reschedule(current, interval, Instant::now());
                }
                None => trace!("member {}: interval hook removed", self.name()),
            }
            entry = { self.features.lock().pop_due(Instant::now()) };
        }
        self.unsuspend();
        self.notify_suspension(false).await;
    }

    /// Route a frame read from the channel into the bridge. The bridge
    /// lock is held across the technology write so concurrent writers
    /// interleave whole frames, never reorder them.
    async fn route_frame(self: &Arc<Self>, frame: Frame) {
        if let Frame::Dtmf(event) = &frame {
            match event {
                DtmfEvent::Begin { digit } => {
                    *self.owed_dtmf.lock() = Some(OwedDtmf {
                        digit: *digit,
                        since: Instant::now(),
                    });
                }
                DtmfEvent::End { .. } => {
                    *self.owed_dtmf.lock() = None;
                }
            }
        }
        let Some((bridge, guard)) = self.lock_bridge().await else {
            trace!("member {}: dropping {} read after leave", self.name(), frame.kind());
            return;
        };
        let members = guard.channels.clone();
        bridge.technology().write(&members, self, frame).await;
    }

    /// Synthesize the DTMF end the member still owes the bridge. Runs
    /// after the pull, so the end is queued to the surviving members.
    pub(crate) async fn settle_owed_events(self: &Arc<Self>, bridge: &Arc<Bridge>) {
        let owed = self.owed_dtmf.lock().take();
        if let Some(owed) = owed {
            let held = owed.since.elapsed().max(MIN_DTMF_DURATION);
            debug!(
                "member {}: left mid-digit, settling {} end after {}ms",
                self.name(),
                owed.digit,
                held.as_millis()
            );
            bridge
                .queue_to_others(
                    self,
                    QueuedEntry::Frame(Frame::Dtmf(DtmfEvent::End {
                        digit: owed.digit,
                        duration: held,
                    })),
                )
                .await;
        }
    }
}

impl fmt::Debug for BridgeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeChannel")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("suspended", &self.is_suspended())
            .field("queued", &self.queue.len())
            .finish()
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
