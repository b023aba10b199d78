//! Application drivers: SendFax, ReceiveFax and FaxGateway
//!
//! These assemble the session, switchover, T.38 and gateway machinery
//! into complete operations. A terminating driver answers its leg, runs
//! the audio phase with switchover handling, continues in the T.38
//! terminal when a switchover happened, and reports a typed
//! [`FaxOutcome`]. The gateway driver dials an owned peer leg, waits for
//! the answer, then alternates plain bridging and gateway relay until
//! the call ends.

use crate::config::RuntimeContext;
use crate::engine::{EngineFactory, GatewayStats};
use crate::error::{FaxError, Result};
use crate::events::FaxEvent;
use crate::gateway::GatewayDriver;
use crate::outcome::{DialOutcome, FaxDirection, FaxMode, FaxOutcome, FaxStatus};
use crate::session::{FaxSession, SessionState};
use crate::switchover::{AudioPhaseOutcome, SwitchoverController};
use crate::t38_path::T38Phase;
use async_trait::async_trait;
use faxgate_channel_core::{Channel, ChannelError, ControlSignal, Frame, T38State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Builds owned peer legs for the gateway
///
/// `request` returns a leg that is already dialing; the caller owns it
/// and must hang it up when done with it.
#[async_trait]
pub trait ChannelRequester: Send + Sync {
    /// Request a new leg toward `destination`
    async fn request(
        &self,
        destination: &str,
    ) -> faxgate_channel_core::Result<Arc<dyn Channel>>;
}

/// Final record of one gateway invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayOutcome {
    /// How the dial step ended
    pub dial: DialOutcome,
    /// The fax verdict for the bridged session
    pub fax: FaxOutcome,
    /// Engine transfer statistics when a relay phase ran
    pub stats: Option<GatewayStats>,
}

/// Sends a document as a fax over one leg
pub struct SendFax {
    ctx: Arc<RuntimeContext>,
    factory: Arc<dyn EngineFactory>,
}

impl SendFax {
    /// Create the driver
    pub fn new(ctx: Arc<RuntimeContext>, factory: Arc<dyn EngineFactory>) -> Self {
        Self { ctx, factory }
    }

    /// Transmit `document` over `channel`
    ///
    /// The sender is normally the calling party; pass `answering` when
    /// this end answered the call and the far end polls the document.
    pub async fn run(
        &self,
        channel: &dyn Channel,
        document: &str,
        answering: bool,
    ) -> Result<FaxOutcome> {
        run_terminating(
            &self.ctx,
            self.factory.as_ref(),
            channel,
            document,
            FaxDirection::Send,
            !answering,
        )
        .await
    }
}

/// Receives a fax into a document over one leg
pub struct ReceiveFax {
    ctx: Arc<RuntimeContext>,
    factory: Arc<dyn EngineFactory>,
}

impl ReceiveFax {
    /// Create the driver
    pub fn new(ctx: Arc<RuntimeContext>, factory: Arc<dyn EngineFactory>) -> Self {
        Self { ctx, factory }
    }

    /// Receive a fax over `channel` into `document`
    ///
    /// The receiver is normally the answering party; pass `calling` when
    /// this end placed the call to poll a document from the far end.
    pub async fn run(
        &self,
        channel: &dyn Channel,
        document: &str,
        calling: bool,
    ) -> Result<FaxOutcome> {
        run_terminating(
            &self.ctx,
            self.factory.as_ref(),
            channel,
            document,
            FaxDirection::Receive,
            calling,
        )
        .await
    }
}

/// Shared flow for the two terminating drivers
async fn run_terminating(
    ctx: &Arc<RuntimeContext>,
    factory: &dyn EngineFactory,
    channel: &dyn Channel,
    document: &str,
    direction: FaxDirection,
    calling: bool,
) -> Result<FaxOutcome> {
    if document.is_empty() {
        return Err(FaxError::invalid_argument("document path is empty"));
    }
    if !channel.is_answered() {
        channel.answer().await?;
    }
    let session = FaxSession::terminating(channel.id().clone(), direction, calling, document);
    info!(
        "channel {}: starting fax {} of {}",
        channel.name(),
        direction,
        document
    );

    let controller = SwitchoverController::new(channel, &session, ctx);
    match controller.run_audio(factory).await? {
        AudioPhaseOutcome::Completed => {}
        AudioPhaseOutcome::SwitchedToT38 => {
            ctx.events()
                .publish(FaxEvent::switched_to_t38(channel.id().clone()))
                .await;
            let live = channel.t38_state();
            if live != T38State::Negotiated {
                // trust the confirmation the loop observed over the live query
                error!(
                    "channel {} reports {} after a confirmed T.38 switchover",
                    channel.name(),
                    live
                );
            }
            T38Phase::new(channel, &session, ctx).run(factory).await?;
        }
    }

    let mode = match session.state() {
        SessionState::T38Active => FaxMode::T38,
        _ => FaxMode::Audio,
    };
    session.mark_terminated();
    let outcome = session.outcome(mode);
    if outcome.is_success() {
        info!(
            "channel {}: fax {} completed over {}: {} pages from '{}'",
            channel.name(),
            direction,
            mode,
            outcome.pages,
            outcome.remote_station_id
        );
        ctx.events()
            .publish(FaxEvent::fax_completed(
                direction,
                outcome.clone(),
                channel.id().clone(),
                document,
            ))
            .await;
    } else {
        warn!(
            "channel {}: fax {} failed: {}",
            channel.name(),
            direction,
            outcome.error
        );
    }
    Ok(outcome)
}

/// Bridges an incoming leg to a dialed peer, gatewaying T.30 and T.38
pub struct FaxGateway {
    ctx: Arc<RuntimeContext>,
    factory: Arc<dyn EngineFactory>,
}

impl FaxGateway {
    /// Create the driver
    pub fn new(ctx: Arc<RuntimeContext>, factory: Arc<dyn EngineFactory>) -> Self {
        Self { ctx, factory }
    }

    /// Dial `destination`, bridge it to `caller` and gateway any fax
    ///
    /// The dialed peer leg is owned here and hung up on every exit path,
    /// including errors. A failed request or an unanswered dial is an
    /// outcome, not an error.
    pub async fn run(
        &self,
        caller: &dyn Channel,
        requester: &dyn ChannelRequester,
        destination: &str,
    ) -> Result<GatewayOutcome> {
        if destination.is_empty() {
            return Err(FaxError::invalid_argument("dial destination is empty"));
        }
        let peer = match requester.request(destination).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("unable to request a leg toward {}: {}", destination, e);
                return Ok(GatewayOutcome {
                    dial: DialOutcome::default(),
                    fax: FaxOutcome::failed("Channel unavailable", FaxMode::Audio),
                    stats: None,
                });
            }
        };
        self.ctx
            .events()
            .publish(FaxEvent::dial_begin(
                caller.id().clone(),
                peer.id().clone(),
                destination,
            ))
            .await;

        let result = self.bridge_legs(caller, peer.as_ref()).await;
        peer.hangup().await;
        let outcome = result?;
        self.ctx
            .events()
            .publish(FaxEvent::gateway_completed(
                caller.id().clone(),
                peer.id().clone(),
                outcome.fax.clone(),
                outcome.stats,
            ))
            .await;
        Ok(outcome)
    }

    async fn bridge_legs(&self, caller: &dyn Channel, peer: &dyn Channel) -> Result<GatewayOutcome> {
        let dial = wait_for_answer(caller, peer, self.ctx.config().dial_timeout).await?;
        if dial != DialOutcome::Answer {
            debug!("dial toward {} ended: {}", peer.name(), dial);
            return Ok(GatewayOutcome {
                dial,
                fax: FaxOutcome::failed("Call setup failed", FaxMode::Audio),
                stats: None,
            });
        }
        if !caller.is_answered() {
            caller.answer().await?;
        }

        let session = FaxSession::gateway(caller.id().clone(), peer.id().clone());
        let driver = GatewayDriver::new(caller, peer, &session, &self.ctx);
        let stats = driver.run(self.factory.as_ref()).await?;

        let mode = match session.state() {
            SessionState::T38Active => FaxMode::T38,
            _ => FaxMode::Audio,
        };
        session.mark_terminated();
        let mut fax = session.outcome(mode);
        if fax.status == FaxStatus::Success {
            // the gateway grades itself PASSED, not SUCCESS
            fax.status = FaxStatus::Passed;
        }
        if let Some(stats) = stats {
            fax.pages = stats.pages_transferred;
            fax.bit_rate = stats.bit_rate;
        }
        Ok(GatewayOutcome {
            dial: DialOutcome::Answer,
            fax,
            stats,
        })
    }
}

/// Wait for the dialed peer to resolve, relaying call progress to the
/// caller
async fn wait_for_answer(
    caller: &dyn Channel,
    peer: &dyn Channel,
    dial_timeout: Duration,
) -> Result<DialOutcome> {
    let deadline = Instant::now() + dial_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("channel {} did not answer in time", peer.name());
            return Ok(DialOutcome::NoAnswer);
        }
        tokio::select! {
            _ = sleep(remaining) => {
                debug!("channel {} did not answer in time", peer.name());
                return Ok(DialOutcome::NoAnswer);
            }
            frame = peer.read() => match frame? {
                Some(Frame::Control(ControlSignal::Ringing)) => {
                    debug!("channel {} is ringing", peer.name());
                    if let Err(e) = caller.indicate(ControlSignal::Ringing).await {
                        warn!("unable to relay ringing to {}: {}", caller.name(), e);
                    }
                }
                Some(Frame::Control(ControlSignal::Answer)) => {
                    debug!("channel {} answered", peer.name());
                    return Ok(DialOutcome::Answer);
                }
                Some(Frame::Control(
                    control @ (ControlSignal::Busy | ControlSignal::Congestion),
                )) => {
                    debug!("dial toward {} got {:?}", peer.name(), control);
                    if let Err(e) = caller.indicate(control).await {
                        warn!("unable to relay {:?} to {}: {}", control, caller.name(), e);
                    }
                    return Ok(match control {
                        ControlSignal::Busy => DialOutcome::Busy,
                        _ => DialOutcome::Congestion,
                    });
                }
                Some(_) => {} // early media
                None => {
                    debug!("channel {} hung up before answering", peer.name());
                    return Ok(DialOutcome::Cancel);
                }
            },
            frame = caller.read() => match frame? {
                Some(_) => {} // nothing useful from the caller while dialing
                None => {
                    debug!("caller {} hung up during dial", caller.name());
                    return Err(ChannelError::hangup(caller.name()).into());
                }
            },
        }
    }
}
