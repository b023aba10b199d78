//! Receive-entry T.38 negotiation and the audio phase of a terminating
//! session
//!
//! A receiving endpoint prefers T.38: before any audio engine is built it
//! asks the leg to negotiate and waits a bounded time for the answer,
//! falling back to analog tones on refusal or silence. The audio loop
//! itself keeps watching for a switchover for the whole exchange: a far
//! end request is accepted immediately, but the loop only hands over to
//! the T.38 terminal once it has observed the negotiation confirmation.
//! On that handover the completion reporter is detached before the audio
//! terminal is torn down, so the teardown cannot masquerade as an end of
//! the fax.

use crate::config::RuntimeContext;
use crate::engine::{phase_e_channel, EngineFactory, PhaseEHandle, T30Terminal};
use crate::error::Result;
use crate::events::FaxEvent;
use crate::outcome::FaxDirection;
use crate::session::{FaxSession, Watchdog, IDLE_WAIT};
use faxgate_channel_core::{
    AudioFormat, Channel, ChannelError, ControlSignal, Frame, T38Control, T38Parameters, T38State,
    VoiceFrame,
};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// How the audio phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPhaseOutcome {
    /// The exchange ran to completion (or failed) in audio mode
    Completed,
    /// The leg switched to T.38; the session continues in the T.38
    /// terminal
    SwitchedToT38,
}

/// Drives the audio phase of one terminating fax session
pub struct SwitchoverController<'a> {
    channel: &'a dyn Channel,
    session: &'a FaxSession,
    ctx: &'a RuntimeContext,
}

impl<'a> SwitchoverController<'a> {
    /// Create a controller for one session on one leg
    pub fn new(channel: &'a dyn Channel, session: &'a FaxSession, ctx: &'a RuntimeContext) -> Self {
        Self {
            channel,
            session,
            ctx,
        }
    }

    /// Run the audio phase
    ///
    /// A leg already carrying T.38 skips the audio phase entirely. A
    /// receiving session otherwise starts with the entry negotiation; a
    /// confirmed switchover returns before any audio engine exists. The
    /// audio loop then relays PCM with the T.30 engine until phase E,
    /// a mid-exchange switchover, or a transport failure.
    pub async fn run_audio(&self, factory: &dyn EngineFactory) -> Result<AudioPhaseOutcome> {
        match self.channel.t38_state() {
            T38State::Negotiated => return Ok(AudioPhaseOutcome::SwitchedToT38),
            T38State::Unavailable => {}
            _ => {
                if self.session.direction() == FaxDirection::Receive && self.request_t38().await? {
                    return Ok(AudioPhaseOutcome::SwitchedToT38);
                }
            }
        }

        let original_read = self.channel.read_format();
        let original_write = self.channel.write_format();
        if original_read != AudioFormat::Slin {
            self.channel.set_read_format(AudioFormat::Slin).await?;
        }
        if original_write != AudioFormat::Slin {
            if let Err(e) = self.channel.set_write_format(AudioFormat::Slin).await {
                self.restore_formats(original_read, original_write).await;
                return Err(e.into());
            }
        }

        let (reporter, mut handle) = phase_e_channel();
        let mut terminal = match factory.t30_terminal(self.session.calling(), reporter) {
            Ok(terminal) => terminal,
            Err(e) => {
                self.restore_formats(original_read, original_write).await;
                return Err(e);
            }
        };
        self.session
            .configure_terminal(terminal.as_mut(), self.ctx.config());
        self.session.enter_audio();

        let result = self.audio_loop(terminal.as_mut(), &mut handle).await;
        self.restore_formats(original_read, original_write).await;
        result
    }

    async fn audio_loop(
        &self,
        terminal: &mut dyn T30Terminal,
        handle: &mut PhaseEHandle,
    ) -> Result<AudioPhaseOutcome> {
        let name = self.channel.name().to_string();
        let mut watchdog = Watchdog::new(self.ctx.config());
        let pull_size = AudioFormat::Slin.samples_per_frame();

        loop {
            if watchdog.expired() {
                warn!("no fax progress on {}, aborting", name);
                self.session.fail("fax watchdog timeout");
                terminal.detach_phase_e();
                terminal.terminate();
                return Ok(AudioPhaseOutcome::Completed);
            }

            match timeout(IDLE_WAIT, self.channel.read()).await {
                Err(_) => {} // idle slice
                Ok(Ok(Some(Frame::Voice(voice)))) if voice.format == AudioFormat::Slin => {
                    if !terminal.feed_audio(&voice.samples) {
                        error!("audio engine on {} rejected received samples", name);
                        self.session.fail("engine receive fault");
                        terminal.detach_phase_e();
                        terminal.terminate();
                        return Ok(AudioPhaseOutcome::Completed);
                    }
                    watchdog.observe_t30(terminal.t30_state());
                }
                Ok(Ok(Some(Frame::Control(ControlSignal::T38 {
                    control,
                    parameters,
                })))) => match control {
                    T38Control::Negotiated => {
                        if let Some(parameters) = parameters {
                            self.session.set_t38_parameters(parameters);
                        }
                        debug!("channel {}: T.38 negotiated, leaving the audio loop", name);
                        terminal.detach_phase_e();
                        terminal.terminate();
                        return Ok(AudioPhaseOutcome::SwitchedToT38);
                    }
                    T38Control::RequestNegotiate => {
                        debug!("channel {}: T.38 request received, accepting", name);
                        let accept = ControlSignal::T38 {
                            control: T38Control::Negotiated,
                            parameters: Some(T38Parameters::default()),
                        };
                        if let Err(e) = self.channel.indicate(accept).await {
                            warn!("channel {}: unable to accept T.38 request: {}", name, e);
                        }
                        // keep relaying audio until the confirmation arrives
                    }
                    _ => {}
                },
                Ok(Ok(Some(_))) => {} // off-format voice, DTMF, other controls
                Ok(Ok(None)) => {
                    debug!("channel {} hung up during the audio phase", name);
                    self.session.fail("channel hangup");
                    terminal.detach_phase_e();
                    terminal.terminate();
                    return Err(ChannelError::hangup(name).into());
                }
                Ok(Err(e)) => {
                    self.session.fail("channel read error");
                    terminal.detach_phase_e();
                    terminal.terminate();
                    return Err(e.into());
                }
            }

            if let Some(report) = handle.try_take() {
                self.session.complete_with_report(report);
                terminal.terminate();
                return Ok(AudioPhaseOutcome::Completed);
            }

            let generated = terminal.pull_audio(pull_size);
            if !generated.is_empty() {
                if let Err(e) = self.channel.write(Frame::Voice(VoiceFrame::slin(generated))).await
                {
                    terminal.detach_phase_e();
                    terminal.terminate();
                    return Err(e.into());
                }
            }
        }
    }

    /// Ask the leg to negotiate T.38 and wait a bounded time for the
    /// answer
    ///
    /// Returns true when the leg ended up negotiated. Refusal, an
    /// unusable answer or silence all fall back to audio; only transport
    /// failures surface as errors. Time is charged against the limit in
    /// poll slices, so traffic unrelated to the negotiation does not
    /// starve the wait.
    async fn request_t38(&self) -> Result<bool> {
        let name = self.channel.name().to_string();
        let request = ControlSignal::T38 {
            control: T38Control::RequestNegotiate,
            parameters: Some(T38Parameters::default()),
        };
        if let Err(e) = self.channel.indicate(request).await {
            warn!("channel {}: unable to request T.38: {}", name, e);
            return Ok(false);
        }
        debug!("channel {}: negotiating T.38 for receive", name);
        self.ctx
            .events()
            .publish(FaxEvent::negotiation_requested(self.channel.id().clone()))
            .await;

        let config = self.ctx.config();
        let mut remaining = config.negotiation_timeout;
        while !remaining.is_zero() {
            let slice = config.negotiation_poll.min(remaining);
            match timeout(slice, self.channel.read()).await {
                Err(_) => remaining = remaining.saturating_sub(slice),
                Ok(Ok(Some(Frame::Control(ControlSignal::T38 {
                    control,
                    parameters,
                })))) => match control {
                    T38Control::Negotiated => {
                        if let Some(parameters) = parameters {
                            self.session.set_t38_parameters(parameters);
                        }
                        debug!("channel {}: T.38 negotiated for receive", name);
                        return Ok(true);
                    }
                    T38Control::Refused => {
                        warn!("channel {} refused to negotiate T.38", name);
                        return Ok(false);
                    }
                    _ => {
                        error!("channel {} failed to negotiate T.38", name);
                        return Ok(false);
                    }
                },
                Ok(Ok(Some(_))) => {} // unrelated traffic, keep waiting
                Ok(Ok(None)) => {
                    debug!("channel {} hung up during T.38 negotiation", name);
                    return Err(ChannelError::hangup(name).into());
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        warn!("channel {} timed out during T.38 negotiation", name);
        Ok(false)
    }

    async fn restore_formats(&self, read: AudioFormat, write: AudioFormat) {
        if self.channel.read_format() != read {
            if let Err(e) = self.channel.set_read_format(read).await {
                warn!(
                    "unable to restore read format on {}: {}",
                    self.channel.name(),
                    e
                );
            }
        }
        if self.channel.write_format() != write {
            if let Err(e) = self.channel.set_write_format(write).await {
                warn!(
                    "unable to restore write format on {}: {}",
                    self.channel.name(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FaxConfig;
    use faxgate_channel_core::{ChannelId, ChannelPair};
    use std::sync::Arc;
    use std::time::Duration;

    fn receive_session(channel: &ChannelId) -> FaxSession {
        FaxSession::terminating(channel.clone(), FaxDirection::Receive, false, "/tmp/in.tiff")
    }

    fn fast_ctx() -> Arc<RuntimeContext> {
        RuntimeContext::new(FaxConfig {
            negotiation_timeout: Duration::from_millis(120),
            negotiation_poll: Duration::from_millis(30),
            ..FaxConfig::default()
        })
    }

    #[tokio::test]
    async fn test_entry_negotiation_confirmed() {
        let (near, far) = ChannelPair::new("app-leg", "far-leg");
        let ctx = fast_ctx();
        let session = receive_session(near.id());

        let answer = tokio::spawn(async move {
            // the far end sees the request and confirms
            loop {
                match far.read().await.unwrap() {
                    Some(Frame::Control(ControlSignal::T38 {
                        control: T38Control::RequestNegotiate,
                        ..
                    })) => break,
                    Some(_) => continue,
                    None => panic!("near end hung up"),
                }
            }
            let confirm = ControlSignal::T38 {
                control: T38Control::Negotiated,
                parameters: Some(T38Parameters {
                    max_ifp: 123,
                    ..T38Parameters::default()
                }),
            };
            far.indicate(confirm).await.unwrap();
        });

        let controller = SwitchoverController::new(&*near, &session, &ctx);
        assert!(controller.request_t38().await.unwrap());
        assert_eq!(session.t38_parameters().unwrap().max_ifp, 123);
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_negotiation_refused() {
        let (near, far) = ChannelPair::new("app-leg", "far-leg");
        let ctx = fast_ctx();
        let session = receive_session(near.id());

        let answer = tokio::spawn(async move {
            loop {
                match far.read().await.unwrap() {
                    Some(Frame::Control(ControlSignal::T38 {
                        control: T38Control::RequestNegotiate,
                        ..
                    })) => break,
                    Some(_) => continue,
                    None => panic!("near end hung up"),
                }
            }
            far.indicate(ControlSignal::t38(T38Control::Refused))
                .await
                .unwrap();
        });

        let controller = SwitchoverController::new(&*near, &session, &ctx);
        assert!(!controller.request_t38().await.unwrap());
        answer.await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_negotiation_times_out() {
        let (near, _far) = ChannelPair::new("app-leg", "far-leg");
        let ctx = fast_ctx();
        let session = receive_session(near.id());

        let controller = SwitchoverController::new(&*near, &session, &ctx);
        let started = tokio::time::Instant::now();
        assert!(!controller.request_t38().await.unwrap());
        assert!(started.elapsed() >= Duration::from_millis(120));
    }
}
