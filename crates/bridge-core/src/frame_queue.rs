//! Per-member FIFO queue with a wake signal
//!
//! Entries are appended under a short lock and the member's task is woken
//! with a notifier. The run loop pops exactly one entry per wake and
//! re-arms the notifier if more are pending, so queued traffic interleaves
//! fairly with inbound channel frames and timer work.

use crate::actions::BridgeAction;
use faxgate_channel_core::Frame;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// One entry in a member's outbound queue
#[derive(Debug, Clone)]
pub enum QueuedEntry {
    /// A frame to write to (or indicate on) the member's channel
    Frame(Frame),
    /// A bridge action to execute on the member's task
    Action(BridgeAction),
}

impl QueuedEntry {
    /// True for entries a suspended member keeps queued instead of dropping
    pub fn is_deferrable(&self) -> bool {
        match self {
            Self::Frame(frame) => frame.is_deferrable(),
            Self::Action(_) => true,
        }
    }
}

/// FIFO queue of outbound entries for one bridge member
pub struct FrameQueue {
    entries: Mutex<VecDeque<QueuedEntry>>,
    wake: Notify,
}

impl FrameQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
        }
    }

    /// Append an entry and wake the owning task
    pub fn push(&self, entry: QueuedEntry) {
        self.entries.lock().push_back(entry);
        self.wake.notify_one();
    }

    /// Pop the oldest entry. Re-arms the wake signal when entries remain,
    /// so one notifier permit never strands a backlog.
    pub fn pop(&self) -> Option<QueuedEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.pop_front();
        if !entries.is_empty() {
            self.wake.notify_one();
        }
        entry
    }

    /// Wait until an entry has been queued
    pub async fn wait(&self) {
        self.wake.notified().await;
    }

    /// Number of entries waiting to be dispatched
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop everything still queued. Called once the member has left and
    /// its task will never dispatch again.
    pub fn flush(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
