//! Feature hooks attached to a bridge member
//!
//! DTMF hooks are keyed by digit strings and matched by prefix while the
//! member's task collects digits. Interval hooks live in a min-heap keyed
//! by (trip time, sequence number); the sequence number makes tie-breaks
//! deterministic. Join, leave, hangup and talk hooks are plain callback
//! lists.

use crate::bridge_channel::BridgeChannel;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Longest DTMF feature code that can be collected
pub const MAX_FEATURE_DIGITS: usize = 8;

/// Default per-digit timeout while collecting a feature code
pub const DEFAULT_DIGIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Callback for join, leave and hangup hooks
#[async_trait]
pub trait HookCallback: Send + Sync {
    /// Invoked on the member's task
    async fn run(&self, member: &Arc<BridgeChannel>);
}

/// Callback for a matched DTMF feature
#[async_trait]
pub trait DtmfHookCallback: Send + Sync {
    /// Returns true when the hook should be removed after this run
    async fn run(&self, member: &Arc<BridgeChannel>) -> bool;
}

/// Callback for a periodic interval hook
#[async_trait]
pub trait IntervalCallback: Send + Sync {
    /// Returns the next interval, or `None` to remove the hook
    async fn run(&self, member: &Arc<BridgeChannel>) -> Option<Duration>;
}

/// Callback for talk detection notifications
#[async_trait]
pub trait TalkCallback: Send + Sync {
    /// `talking` is true at speech onset, false when it stops
    async fn run(&self, member: &Arc<BridgeChannel>, talking: bool);
}

/// A DTMF feature registration
#[derive(Clone)]
pub struct DtmfHook {
    /// Digit string that triggers the hook
    pub code: String,
    /// Executed on a full match
    pub callback: Arc<dyn DtmfHookCallback>,
}

pub(crate) struct IntervalEntry {
    pub trip_time: Instant,
    pub seqno: u64,
    pub interval: Duration,
    pub media: bool,
    pub callback: Arc<dyn IntervalCallback>,
}

impl IntervalEntry {
    fn key(&self) -> (Instant, u64) {
        (self.trip_time, self.seqno)
    }
}

impl PartialEq for IntervalEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IntervalEntry {}

impl PartialOrd for IntervalEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntervalEntry {
    // Reversed so the BinaryHeap pops the earliest (trip_time, seqno)
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Hook set attached to one bridge member
pub struct BridgeFeatures {
    dtmf_hooks: Vec<DtmfHook>,
    hangup_hooks: Vec<Arc<dyn HookCallback>>,
    join_hooks: Vec<Arc<dyn HookCallback>>,
    leave_hooks: Vec<Arc<dyn HookCallback>>,
    talk_hook: Option<Arc<dyn TalkCallback>>,
    interval_hooks: BinaryHeap<IntervalEntry>,
    interval_seqno: u64,
    /// Pass member DTMF into the bridge even when hooks are registered
    pub dtmf_passthrough: bool,
    /// Per-digit timeout while collecting a feature code
    pub digit_timeout: Duration,
    /// Member has no real counterpart; drives automatic teardown
    pub lonely: bool,
    /// Dissolve the bridge when this member leaves by hangup
    pub dissolve_on_hangup: bool,
}

impl BridgeFeatures {
    /// An empty hook set with default flags and timeouts
    pub fn new() -> Self {
        Self {
            dtmf_hooks: Vec::new(),
            hangup_hooks: Vec::new(),
            join_hooks: Vec::new(),
            leave_hooks: Vec::new(),
            talk_hook: None,
            interval_hooks: BinaryHeap::new(),
            interval_seqno: 0,
            dtmf_passthrough: false,
            digit_timeout: DEFAULT_DIGIT_TIMEOUT,
            lonely: false,
            dissolve_on_hangup: false,
        }
    }

    /// Register a DTMF feature hook
    pub fn add_dtmf_hook(&mut self, code: impl Into<String>, callback: Arc<dyn DtmfHookCallback>) {
        self.dtmf_hooks.push(DtmfHook {
            code: code.into(),
            callback,
        });
    }

    /// Run `callback` on the member's task when its channel hangs up,
    /// before the member leaves the bridge
    pub fn add_hangup_hook(&mut self, callback: Arc<dyn HookCallback>) {
        self.hangup_hooks.push(callback);
    }

    /// Run `callback` right after the member is pushed into a bridge
    pub fn add_join_hook(&mut self, callback: Arc<dyn HookCallback>) {
        self.join_hooks.push(callback);
    }

    /// Run `callback` when the member's run loop ends, before the pull
    pub fn add_leave_hook(&mut self, callback: Arc<dyn HookCallback>) {
        self.leave_hooks.push(callback);
    }

    /// Receive talk detection notifications queued by the technology
    pub fn set_talk_hook(&mut self, callback: Arc<dyn TalkCallback>) {
        self.talk_hook = Some(callback);
    }

    /// Register a periodic hook; first trip is one interval from now.
    /// `media` wraps each run in the suspend/source-update envelope.
    pub fn add_interval_hook(
        &mut self,
        interval: Duration,
        media: bool,
        callback: Arc<dyn IntervalCallback>,
    ) {
        let seqno = self.next_seqno();
        self.interval_hooks.push(IntervalEntry {
            trip_time: Instant::now() + interval,
            seqno,
            interval,
            media,
            callback,
        });
    }

    pub(crate) fn hangup_hooks(&self) -> Vec<Arc<dyn HookCallback>> {
        self.hangup_hooks.clone()
    }

    pub(crate) fn join_hooks(&self) -> Vec<Arc<dyn HookCallback>> {
        self.join_hooks.clone()
    }

    pub(crate) fn leave_hooks(&self) -> Vec<Arc<dyn HookCallback>> {
        self.leave_hooks.clone()
    }

    pub(crate) fn talk_hook(&self) -> Option<Arc<dyn TalkCallback>> {
        self.talk_hook.clone()
    }

    /// True when some registered code starts with the collected digits
    pub(crate) fn dtmf_prefix_exists(&self, collected: &str) -> bool {
        self.dtmf_hooks.iter().any(|h| h.code.starts_with(collected))
    }

    /// Hook whose code equals the collected digits, if any
    pub(crate) fn dtmf_exact_match(&self, collected: &str) -> Option<DtmfHook> {
        self.dtmf_hooks.iter().find(|h| h.code == collected).cloned()
    }

    /// True when a strictly longer code could still match, so an exact
    /// match has to wait out the inter-digit timeout
    pub(crate) fn dtmf_longer_candidate(&self, collected: &str) -> bool {
        self.dtmf_hooks
            .iter()
            .any(|h| h.code.len() > collected.len() && h.code.starts_with(collected))
    }

    pub(crate) fn remove_dtmf_hook(&mut self, code: &str) {
        self.dtmf_hooks.retain(|h| h.code != code);
    }

    pub(crate) fn has_dtmf_hooks(&self) -> bool {
        !self.dtmf_hooks.is_empty()
    }

    /// Deadline of the soonest interval hook
    pub(crate) fn next_interval_deadline(&self) -> Option<Instant> {
        self.interval_hooks.peek().map(|e| e.trip_time)
    }

    /// Pop the next hook that is due at `now`, soonest first
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<IntervalEntry> {
        match self.interval_hooks.peek() {
            Some(entry) if entry.trip_time <= now => self.interval_hooks.pop(),
            _ => None,
        }
    }

    /// True when any due hook wants the media path to itself
    pub(crate) fn any_due_needs_media(&self, now: Instant) -> bool {
        self.interval_hooks
            .iter()
            .any(|e| e.trip_time <= now && e.media)
    }

    /// Re-queue a hook after a run. If the task fell behind, whole missed
    /// intervals are skipped so the cadence stays aligned instead of
    /// drifting by the delay.
    pub(crate) fn reschedule(&mut self, mut entry: IntervalEntry, interval: Duration, now: Instant) {
        entry.interval = interval;
        let mut trip = entry.trip_time + interval;
        if trip <= now && !interval.is_zero() {
            let behind = now.duration_since(trip);
            let missed = (behind.as_nanos() / interval.as_nanos()) as u32 + 1;
            trip += interval * missed;
        }
        entry.trip_time = trip;
        entry.seqno = self.next_seqno();
        self.interval_hooks.push(entry);
    }

    fn next_seqno(&mut self) -> u64 {
        self.interval_seqno += 1;
        self.interval_seqno
    }
}

impl Default for BridgeFeatures {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopInterval;

    #[async_trait]
    impl IntervalCallback for NoopInterval {
        async fn run(&self, _member: &Arc<BridgeChannel>) -> Option<Duration> {
            None
        }
    }

    #[tokio::test]
    async fn test_heap_orders_by_trip_then_seqno() {
        let mut features = BridgeFeatures::new();
        let now = Instant::now();
        let cb: Arc<dyn IntervalCallback> = Arc::new(NoopInterval);
        for _ in 0..3 {
            let seqno = features.next_seqno();
            features.interval_hooks.push(IntervalEntry {
                trip_time: now,
                seqno,
                interval: Duration::from_millis(10),
                media: false,
                callback: cb.clone(),
            });
        }
        let first = features.pop_due(now).unwrap();
        let second = features.pop_due(now).unwrap();
        let third = features.pop_due(now).unwrap();
        assert!(first.seqno < second.seqno && second.seqno < third.seqno);
        assert!(features.pop_due(now).is_none());
    }

    #[tokio::test]
    async fn test_reschedule_skips_missed_intervals() {
        let mut features = BridgeFeatures::new();
        let now = Instant::now();
        let interval = Duration::from_millis(100);
        let entry = IntervalEntry {
            // 5.5 intervals in the past
            trip_time: now - Duration::from_millis(550),
            seqno: 1,
            interval,
            media: false,
            callback: Arc::new(NoopInterval),
        };
        features.reschedule(entry, interval, now);
        let trip = features.next_interval_deadline().unwrap();
        assert!(trip > now);
        // Next trip stays on the original cadence: -550ms + 6 * 100ms = +50ms
        let ahead = trip.duration_since(now);
        assert_eq!(ahead, Duration::from_millis(50));
    }

    struct NoopDtmf;

    #[async_trait]
    impl DtmfHookCallback for NoopDtmf {
        async fn run(&self, _member: &Arc<BridgeChannel>) -> bool {
            false
        }
    }

    #[test]
    fn test_dtmf_prefix_and_match() {
        let mut features = BridgeFeatures::new();
        features.add_dtmf_hook("*1", Arc::new(NoopDtmf));
        features.add_dtmf_hook("*21", Arc::new(NoopDtmf));
        assert!(features.dtmf_prefix_exists("*"));
        assert!(features.dtmf_prefix_exists("*2"));
        assert!(!features.dtmf_prefix_exists("#"));
        assert!(features.dtmf_exact_match("*1").is_some());
        assert!(features.dtmf_exact_match("*2").is_none());
        features.remove_dtmf_hook("*1");
        assert!(features.dtmf_exact_match("*1").is_none());
    }
}
