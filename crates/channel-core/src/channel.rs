//! The async channel abstraction and an in-process implementation
//!
//! A [`Channel`] is one call leg. The bridging and fax cores are pure
//! consumers of this trait; production legs are provided by the
//! signaling/transport layer. [`ChannelPair`] is the in-process
//! implementation used by local bridging and by the application drivers'
//! tests: two endpoints joined back to back, sharing one T.38 negotiation
//! state and answer/hangup flags, so the far endpoint doubles as the
//! remote fax machine.

use crate::error::{ChannelError, Result};
use crate::format::AudioFormat;
use crate::frame::{ControlSignal, Frame};
use crate::t38::{T38Control, T38State};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier for a channel leg
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Generate a fresh channel ID
    pub fn new() -> Self {
        Self(format!("chan-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One call leg as consumed by the bridging and fax cores
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable identifier of this leg
    fn id(&self) -> &ChannelId;

    /// Human-readable leg name for logs
    fn name(&self) -> &str;

    /// Read the next frame. `Ok(None)` means the leg has hung up and no
    /// further frames will arrive.
    async fn read(&self) -> Result<Option<Frame>>;

    /// Write one frame toward the far end
    async fn write(&self, frame: Frame) -> Result<()>;

    /// Indicate a control signal out of band
    async fn indicate(&self, signal: ControlSignal) -> Result<()>;

    /// Current T.38 negotiation state of this leg
    fn t38_state(&self) -> T38State;

    /// Format of frames read from this leg
    fn read_format(&self) -> AudioFormat;

    /// Format of frames written to this leg
    fn write_format(&self) -> AudioFormat;

    /// Change the read format
    async fn set_read_format(&self, format: AudioFormat) -> Result<()>;

    /// Change the write format
    async fn set_write_format(&self, format: AudioFormat) -> Result<()>;

    /// True once the leg has been answered
    fn is_answered(&self) -> bool;

    /// Answer the leg
    async fn answer(&self) -> Result<()>;

    /// Hang the leg up; readers on both sides unblock with end-of-stream
    async fn hangup(&self);

    /// True once the leg has hung up
    fn is_hungup(&self) -> bool;
}

/// State shared by the two endpoints of one in-process leg
struct PairShared {
    t38_state: Mutex<T38State>,
    answered: AtomicBool,
    hungup: AtomicBool,
}

/// One side of an in-process channel pair
pub struct ChannelEndpoint {
    id: ChannelId,
    name: String,
    to_peer: mpsc::UnboundedSender<Frame>,
    to_self: mpsc::UnboundedSender<Frame>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
    read_format: Mutex<AudioFormat>,
    write_format: Mutex<AudioFormat>,
    shared: Arc<PairShared>,
}

/// Builder for in-process channel pairs
pub struct ChannelPair;

impl ChannelPair {
    /// Create a connected pair of endpoints. Frames written on one side are
    /// read on the other. Both sides share one T.38 state and one
    /// answered/hungup lifecycle.
    pub fn new(left: &str, right: &str) -> (Arc<ChannelEndpoint>, Arc<ChannelEndpoint>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let shared = Arc::new(PairShared {
            t38_state: Mutex::new(T38State::Unknown),
            answered: AtomicBool::new(false),
            hungup: AtomicBool::new(false),
        });

        let a = Arc::new(ChannelEndpoint {
            id: ChannelId::new(),
            name: left.to_string(),
            to_peer: tx_b.clone(),
            to_self: tx_a.clone(),
            rx: tokio::sync::Mutex::new(rx_a),
            read_format: Mutex::new(AudioFormat::Slin),
            write_format: Mutex::new(AudioFormat::Slin),
            shared: shared.clone(),
        });
        let b = Arc::new(ChannelEndpoint {
            id: ChannelId::new(),
            name: right.to_string(),
            to_peer: tx_a,
            to_self: tx_b,
            rx: tokio::sync::Mutex::new(rx_b),
            read_format: Mutex::new(AudioFormat::Slin),
            write_format: Mutex::new(AudioFormat::Slin),
            shared,
        });
        (a, b)
    }
}

impl ChannelEndpoint {
    /// Override the leg's T.38 state directly. Test harnesses use this to
    /// model legs that cannot do T.38 at all.
    pub fn set_t38_state(&self, state: T38State) {
        *self.shared.t38_state.lock() = state;
    }

    /// Apply the negotiation bookkeeping a T.38 control message implies.
    /// Unavailable legs never move; the far end would refuse anyway.
    fn apply_t38(&self, control: T38Control) {
        let mut state = self.shared.t38_state.lock();
        if *state == T38State::Unavailable {
            return;
        }
        let next = match control {
            T38Control::RequestNegotiate => T38State::Negotiating,
            T38Control::Negotiated => T38State::Negotiated,
            T38Control::Refused => T38State::Rejected,
            T38Control::Terminated => T38State::Terminated,
        };
        if *state != next {
            debug!("channel {}: t38 {} -> {}", self.name, *state, next);
            *state = next;
        }
    }

    fn deliver(&self, frame: Frame) -> Result<()> {
        if let Frame::Control(ControlSignal::T38 { control, .. }) = &frame {
            self.apply_t38(*control);
        }
        if let Frame::Control(ControlSignal::Answer) = &frame {
            self.shared.answered.store(true, Ordering::SeqCst);
        }
        self.to_peer
            .send(frame)
            .map_err(|_| ChannelError::write_failed(&self.name, "far endpoint gone"))
    }
}

#[async_trait]
impl Channel for ChannelEndpoint {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Option<Frame>> {
        if self.shared.hungup.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(Frame::Control(ControlSignal::Hangup)) | None => {
                self.shared.hungup.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Some(frame) => Ok(Some(frame)),
        }
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        if self.shared.hungup.load(Ordering::SeqCst) {
            return Err(ChannelError::write_failed(&self.name, "channel hung up"));
        }
        self.deliver(frame)
    }

    async fn indicate(&self, signal: ControlSignal) -> Result<()> {
        if self.shared.hungup.load(Ordering::SeqCst) {
            return Err(ChannelError::indicate_failed(&self.name, "channel hung up"));
        }
        self.deliver(Frame::Control(signal))
            .map_err(|e| ChannelError::indicate_failed(&self.name, e.to_string()))
    }

    fn t38_state(&self) -> T38State {
        *self.shared.t38_state.lock()
    }

    fn read_format(&self) -> AudioFormat {
        *self.read_format.lock()
    }

    fn write_format(&self) -> AudioFormat {
        *self.write_format.lock()
    }

    async fn set_read_format(&self, format: AudioFormat) -> Result<()> {
        *self.read_format.lock() = format;
        Ok(())
    }

    async fn set_write_format(&self, format: AudioFormat) -> Result<()> {
        *self.write_format.lock() = format;
        Ok(())
    }

    fn is_answered(&self) -> bool {
        self.shared.answered.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> Result<()> {
        if self.shared.hungup.load(Ordering::SeqCst) {
            return Err(ChannelError::answer_failed(&self.name, "channel hung up"));
        }
        if !self.shared.answered.swap(true, Ordering::SeqCst) {
            debug!("channel {}: answered", self.name);
            let _ = self.to_peer.send(Frame::Control(ControlSignal::Answer));
        }
        Ok(())
    }

    async fn hangup(&self) {
        if self.shared.hungup.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("channel {}: hangup", self.name);
        // Wake readers parked on either side
        let _ = self.to_peer.send(Frame::Control(ControlSignal::Hangup));
        let _ = self.to_self.send(Frame::Control(ControlSignal::Hangup));
    }

    fn is_hungup(&self) -> bool {
        self.shared.hungup.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("t38_state", &self.t38_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VoiceFrame;

    #[tokio::test]
    async fn test_frames_cross_the_pair() {
        let (a, b) = ChannelPair::new("a", "b");
        a.write(Frame::Voice(VoiceFrame::slin(vec![1, 2, 3])))
            .await
            .unwrap();
        let frame = b.read().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Voice(v) if v.samples == vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_hangup_unblocks_both_sides() {
        let (a, b) = ChannelPair::new("a", "b");
        let reader = tokio::spawn(async move { b.read().await });
        a.hangup().await;
        assert!(reader.await.unwrap().unwrap().is_none());
        assert!(a.read().await.unwrap().is_none());
        assert!(a.is_hungup());
    }

    #[tokio::test]
    async fn test_t38_bookkeeping_on_control() {
        let (a, b) = ChannelPair::new("a", "b");
        assert_eq!(a.t38_state(), T38State::Unknown);
        a.indicate(ControlSignal::t38(T38Control::RequestNegotiate))
            .await
            .unwrap();
        assert_eq!(b.t38_state(), T38State::Negotiating);
        b.indicate(ControlSignal::t38(T38Control::Negotiated))
            .await
            .unwrap();
        assert_eq!(a.t38_state(), T38State::Negotiated);
    }

    #[tokio::test]
    async fn test_unavailable_leg_never_moves() {
        let (a, b) = ChannelPair::new("a", "b");
        a.set_t38_state(T38State::Unavailable);
        a.indicate(ControlSignal::t38(T38Control::RequestNegotiate))
            .await
            .unwrap();
        assert_eq!(b.t38_state(), T38State::Unavailable);
    }

    #[tokio::test]
    async fn test_answer_is_visible_to_far_side() {
        let (a, b) = ChannelPair::new("a", "b");
        assert!(!b.is_answered());
        a.answer().await.unwrap();
        assert!(b.is_answered());
        let frame = b.read().await.unwrap().unwrap();
        assert!(matches!(frame, Frame::Control(ControlSignal::Answer)));
    }

    #[tokio::test]
    async fn test_write_after_hangup_fails() {
        let (a, b) = ChannelPair::new("a", "b");
        b.hangup().await;
        let err = a
            .write(Frame::Control(ControlSignal::Ringing))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
