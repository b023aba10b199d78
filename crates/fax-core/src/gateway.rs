//! T.38 gateway between an audio leg and a T.38 leg
//!
//! The gateway alternates between two phases. While the two legs' T.38
//! states agree it bridges them plainly, watching the calling leg for CNG
//! and the answering leg for CED and requesting T.38 toward the opposite
//! side when a tone fires. Once exactly one leg carries T.38 the relay
//! phase takes over: IFP packets feed the engine, audio is pumped through
//! the engine's gateway entry points in lockstep with the inbound frame
//! cadence, and the loop runs until the T.38 side tears the session down,
//! the audio side negotiates T.38 as well, or something breaks.

use crate::config::RuntimeContext;
use crate::engine::{EngineFactory, FaxTone, GatewayStats, T38GatewayCore, ToneDetector};
use crate::error::Result;
use crate::session::{FaxSession, SessionState, Watchdog, IDLE_WAIT};
use faxgate_channel_core::{
    AudioFormat, Channel, ChannelError, ControlSignal, Frame, T38Control, T38Parameters, T38State,
    VoiceFrame, MAX_BLOCK_SAMPLES,
};
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// True when exactly one leg carries T.38 and no negotiation is pending,
/// which is the only arrangement the gateway relay can serve
pub fn gateway_applicable(a: T38State, b: T38State) -> bool {
    (a.is_negotiated() ^ b.is_negotiated())
        && a != T38State::Negotiating
        && b != T38State::Negotiating
}

/// Why the plain bridge phase returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The legs diverged; hand over to the gateway relay
    ReadyForGateway,
    /// One side hung up before any fax handoff
    CallEnded,
    /// The progress watchdog fired
    Expired,
}

/// Why the relay loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The T.38 side ended the session cleanly
    CleanShutdown,
    /// The audio side negotiated T.38 as well; resume plain bridging
    Converged,
    /// The engine or the frame routing failed
    Faulted {
        /// Failure reason recorded on the session
        reason: &'static str,
    },
    /// The progress watchdog fired
    Expired,
}

/// Plain frame bridge with fax tone detection
///
/// Frames relay active-to-inactive. While either leg is negotiating T.38
/// the media is muted; control and DTMF frames still cross so the far
/// ends can finish their own signaling.
pub struct AudioBridge<'a> {
    caller: &'a dyn Channel,
    peer: &'a dyn Channel,
    cng: Option<Box<dyn ToneDetector>>,
    ced: Option<Box<dyn ToneDetector>>,
}

impl<'a> AudioBridge<'a> {
    /// Create a bridge over two legs. The CNG detector watches the
    /// calling leg, the CED detector the answering leg; either may be
    /// absent, in which case handoff relies on the far ends requesting
    /// T.38 themselves.
    pub fn new(
        caller: &'a dyn Channel,
        peer: &'a dyn Channel,
        cng: Option<Box<dyn ToneDetector>>,
        ced: Option<Box<dyn ToneDetector>>,
    ) -> Self {
        Self {
            caller,
            peer,
            cng,
            ced,
        }
    }

    /// Bridge until the legs diverge, the call ends or the watchdog fires
    pub async fn run(&mut self, watchdog: &mut Watchdog) -> Result<BridgeExit> {
        let caller = self.caller;
        let peer = self.peer;
        let mut last_states = (caller.t38_state(), peer.t38_state());
        debug!(
            "bridging {} and {} (t38 {} / {})",
            caller.name(),
            peer.name(),
            last_states.0,
            last_states.1
        );
        loop {
            let states = (caller.t38_state(), peer.t38_state());
            if states != last_states {
                debug!("t38 states now {} / {}", states.0, states.1);
                watchdog.touch();
                last_states = states;
            }
            if gateway_applicable(states.0, states.1) {
                return Ok(BridgeExit::ReadyForGateway);
            }
            if watchdog.expired() {
                warn!(
                    "no fax progress between {} and {}, aborting",
                    caller.name(),
                    peer.name()
                );
                return Ok(BridgeExit::Expired);
            }
            let muted =
                states.0 == T38State::Negotiating || states.1 == T38State::Negotiating;

            tokio::select! {
                _ = sleep(IDLE_WAIT) => {} // idle slice
                frame = caller.read() => match frame? {
                    Some(frame) => {
                        relay_frame(frame, caller, peer, &mut self.cng, muted, watchdog).await?;
                    }
                    None => {
                        debug!("channel {} hung up during bridging", caller.name());
                        return Ok(BridgeExit::CallEnded);
                    }
                },
                frame = peer.read() => match frame? {
                    Some(frame) => {
                        relay_frame(frame, peer, caller, &mut self.ced, muted, watchdog).await?;
                    }
                    None => {
                        debug!("channel {} hung up during bridging", peer.name());
                        return Ok(BridgeExit::CallEnded);
                    }
                },
            }
        }
    }
}

/// Forward one frame across the bridge, feeding the tone detector for the
/// source leg and triggering a T.38 request toward the destination when a
/// tone fires on a leg that has not attempted negotiation yet
async fn relay_frame(
    frame: Frame,
    from: &dyn Channel,
    to: &dyn Channel,
    detector: &mut Option<Box<dyn ToneDetector>>,
    muted: bool,
    watchdog: &mut Watchdog,
) -> Result<()> {
    match &frame {
        Frame::Voice(voice) if voice.format == AudioFormat::Slin => {
            if let Some(detector) = detector.as_deref_mut() {
                if let Some(tone) = detector.feed(&voice.samples) {
                    debug!("{} tone detected on {}", tone, from.name());
                    if to.t38_state() == T38State::Unknown {
                        debug!("requesting T.38 negotiation on {}", to.name());
                        let request = ControlSignal::T38 {
                            control: T38Control::RequestNegotiate,
                            parameters: Some(T38Parameters::default()),
                        };
                        if let Err(e) = to.indicate(request).await {
                            warn!("channel {}: unable to request T.38: {}", to.name(), e);
                        }
                        return Ok(());
                    }
                }
            }
        }
        Frame::Modem(_) => watchdog.touch(),
        _ => {}
    }
    if muted && !frame.is_deferrable() {
        return Ok(());
    }
    to.write(frame).await?;
    Ok(())
}

/// The relay phase: one leg on T.38 IFP packets, the other on audio
pub struct GatewayRelay<'a> {
    t38_leg: &'a dyn Channel,
    audio_leg: &'a dyn Channel,
}

impl<'a> GatewayRelay<'a> {
    /// Create a relay with the legs already identified
    pub fn new(t38_leg: &'a dyn Channel, audio_leg: &'a dyn Channel) -> Self {
        Self { t38_leg, audio_leg }
    }

    /// Run the relay. The audio leg is forced to signed linear for the
    /// duration and restored afterwards.
    pub async fn run(
        &self,
        core: &mut dyn T38GatewayCore,
        watchdog: &mut Watchdog,
    ) -> Result<RelayExit> {
        let original_read = self.audio_leg.read_format();
        let original_write = self.audio_leg.write_format();
        if original_read != AudioFormat::Slin {
            self.audio_leg.set_read_format(AudioFormat::Slin).await?;
        }
        if original_write != AudioFormat::Slin {
            if let Err(e) = self.audio_leg.set_write_format(AudioFormat::Slin).await {
                self.restore_formats(original_read, original_write).await;
                return Err(e.into());
            }
        }
        let result = self.pump(core, watchdog).await;
        self.restore_formats(original_read, original_write).await;
        result
    }

    async fn pump(
        &self,
        core: &mut dyn T38GatewayCore,
        watchdog: &mut Watchdog,
    ) -> Result<RelayExit> {
        let t38_leg = self.t38_leg;
        let audio_leg = self.audio_leg;
        debug!(
            "gateway relay running: {} (T.38) <-> {} (audio)",
            t38_leg.name(),
            audio_leg.name()
        );
        let mut last_stats = core.stats();
        loop {
            if t38_leg.t38_state().is_negotiated() && audio_leg.t38_state().is_negotiated() {
                debug!("channel {} negotiated T.38 as well", audio_leg.name());
                return Ok(RelayExit::Converged);
            }
            let stats = core.stats();
            if stats != last_stats {
                last_stats = stats;
                watchdog.touch();
            }
            if watchdog.expired() {
                warn!(
                    "no fax progress between {} and {}, aborting",
                    t38_leg.name(),
                    audio_leg.name()
                );
                return Ok(RelayExit::Expired);
            }

            tokio::select! {
                _ = sleep(IDLE_WAIT) => {} // idle slice
                frame = t38_leg.read() => match frame? {
                    Some(Frame::Modem(packet)) => {
                        core.feed_ifp(&packet.payload, packet.seq_no);
                    }
                    Some(Frame::Control(ControlSignal::T38 {
                        control: T38Control::Terminated | T38Control::Refused,
                        ..
                    })) => {
                        debug!("channel {} ended the T.38 session", t38_leg.name());
                        return Ok(RelayExit::CleanShutdown);
                    }
                    Some(_) => {} // stray voice or unrelated controls
                    None => {
                        debug!("channel {} hung up during gateway relay", t38_leg.name());
                        return Err(ChannelError::hangup(t38_leg.name()).into());
                    }
                },
                frame = audio_leg.read() => match frame? {
                    Some(Frame::Voice(voice)) if voice.format == AudioFormat::Slin => {
                        if !core.gateway_rx(&voice.samples) {
                            error!("gateway engine rejected samples from {}", audio_leg.name());
                            return Ok(RelayExit::Faulted { reason: "engine receive fault" });
                        }
                        let generated = core.gateway_tx(MAX_BLOCK_SAMPLES);
                        if !generated.is_empty() {
                            audio_leg
                                .write(Frame::Voice(VoiceFrame::slin(generated)))
                                .await?;
                        }
                        for packet in core.take_outbound_ifp() {
                            t38_leg.write(Frame::Modem(packet)).await?;
                        }
                    }
                    Some(Frame::Modem(_)) => {
                        error!("modem frame on audio leg {}", audio_leg.name());
                        return Ok(RelayExit::Faulted { reason: "modem frame on the audio leg" });
                    }
                    Some(_) => {}
                    None => {
                        debug!("channel {} hung up during gateway relay", audio_leg.name());
                        return Err(ChannelError::hangup(audio_leg.name()).into());
                    }
                },
            }
        }
    }

    async fn restore_formats(&self, read: AudioFormat, write: AudioFormat) {
        if self.audio_leg.read_format() != read {
            if let Err(e) = self.audio_leg.set_read_format(read).await {
                warn!(
                    "unable to restore read format on {}: {}",
                    self.audio_leg.name(),
                    e
                );
            }
        }
        if self.audio_leg.write_format() != write {
            if let Err(e) = self.audio_leg.set_write_format(write).await {
                warn!(
                    "unable to restore write format on {}: {}",
                    self.audio_leg.name(),
                    e
                );
            }
        }
    }
}

/// Alternates bridge and relay phases over one gateway session
pub struct GatewayDriver<'a> {
    caller: &'a dyn Channel,
    peer: &'a dyn Channel,
    session: &'a FaxSession,
    ctx: &'a RuntimeContext,
}

impl<'a> GatewayDriver<'a> {
    /// Create a driver for one gateway session
    pub fn new(
        caller: &'a dyn Channel,
        peer: &'a dyn Channel,
        session: &'a FaxSession,
        ctx: &'a RuntimeContext,
    ) -> Self {
        Self {
            caller,
            peer,
            session,
            ctx,
        }
    }

    /// Run the gateway until the call ends
    ///
    /// The verdict lands on the session. Returns the engine's transfer
    /// statistics when a relay phase ran, `None` when the call ended
    /// without any T.38 handoff. `Err` is reserved for transport
    /// failures on either leg.
    pub async fn run(&self, factory: &dyn EngineFactory) -> Result<Option<GatewayStats>> {
        let cng = match factory.tone_detector(FaxTone::Cng) {
            Ok(detector) => Some(detector),
            Err(e) => {
                warn!("CNG detector unavailable: {}", e);
                None
            }
        };
        let ced = match factory.tone_detector(FaxTone::Ced) {
            Ok(detector) => Some(detector),
            Err(e) => {
                warn!("CED detector unavailable: {}", e);
                None
            }
        };

        let mut watchdog = Watchdog::new(self.ctx.config());
        self.session.enter_audio();
        let mut bridge = AudioBridge::new(self.caller, self.peer, cng, ced);
        loop {
            match bridge.run(&mut watchdog).await {
                Ok(BridgeExit::ReadyForGateway) => {}
                Ok(BridgeExit::CallEnded) => {
                    debug!("call ended before any fax handoff");
                    self.session.succeed();
                    return Ok(None);
                }
                Ok(BridgeExit::Expired) => {
                    self.session.fail("fax watchdog timeout");
                    return Ok(None);
                }
                Err(e) => {
                    self.session.fail("Channel problems");
                    return Err(e);
                }
            }

            let states = (self.caller.t38_state(), self.peer.t38_state());
            if !gateway_applicable(states.0, states.1) {
                continue;
            }
            let (t38_leg, audio_leg) = if states.0.is_negotiated() {
                (self.caller, self.peer)
            } else {
                (self.peer, self.caller)
            };

            let mut core = factory.gateway()?;
            if self.session.state() != SessionState::T38Active {
                self.session.enter_t38();
            }
            let relay = GatewayRelay::new(t38_leg, audio_leg);
            match relay.run(core.as_mut(), &mut watchdog).await {
                Ok(RelayExit::CleanShutdown) => {
                    let stats = core.stats();
                    debug!(
                        "connection statistics: bit rate {}, ecm {}, pages {}",
                        stats.bit_rate, stats.error_correcting_mode, stats.pages_transferred
                    );
                    self.session.succeed();
                    return Ok(Some(stats));
                }
                Ok(RelayExit::Converged) => {
                    debug!("both legs carrying T.38, back to plain bridging");
                }
                Ok(RelayExit::Faulted { reason }) => {
                    self.session.fail(reason);
                    return Ok(Some(core.stats()));
                }
                Ok(RelayExit::Expired) => {
                    self.session.fail("fax watchdog timeout");
                    return Ok(Some(core.stats()));
                }
                Err(e) => {
                    self.session.fail("Channel problems");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_applicable() {
        use T38State::*;
        assert!(gateway_applicable(Negotiated, Unknown));
        assert!(gateway_applicable(Unavailable, Negotiated));
        assert!(gateway_applicable(Negotiated, Rejected));
        assert!(gateway_applicable(Terminated, Negotiated));

        // no T.38 side at all
        assert!(!gateway_applicable(Unknown, Unknown));
        assert!(!gateway_applicable(Unknown, Rejected));
        // negotiation still pending
        assert!(!gateway_applicable(Negotiated, Negotiating));
        assert!(!gateway_applicable(Negotiating, Unknown));
        // both sides carrying T.38 end to end
        assert!(!gateway_applicable(Negotiated, Negotiated));
    }
}
