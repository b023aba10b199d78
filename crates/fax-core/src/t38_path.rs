//! The T.38 phase of a terminating session
//!
//! Once a leg reports T.38 negotiated the exchange runs on IFP packets:
//! inbound modem frames feed the terminal, the engine clock is advanced
//! by the wall time between polls, and generated packets go back out as
//! modem frames. A Terminated control from the far end closes the
//! session; whether that counts as success depends on whether the engine
//! delivered its completion report by then.

use crate::config::RuntimeContext;
use crate::engine::{phase_e_channel, EngineFactory};
use crate::error::Result;
use crate::session::{FaxSession, Watchdog, IDLE_WAIT};
use faxgate_channel_core::{Channel, ChannelError, ControlSignal, Frame, T38Control};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Drives the T.38 phase of one terminating fax session
pub struct T38Phase<'a> {
    channel: &'a dyn Channel,
    session: &'a FaxSession,
    ctx: &'a RuntimeContext,
}

impl<'a> T38Phase<'a> {
    /// Create a driver for one session on one leg
    pub fn new(channel: &'a dyn Channel, session: &'a FaxSession, ctx: &'a RuntimeContext) -> Self {
        Self {
            channel,
            session,
            ctx,
        }
    }

    /// Run the exchange over T.38 until completion or teardown
    ///
    /// The verdict lands on the session; `Err` is reserved for transport
    /// failures on the leg.
    pub async fn run(&self, factory: &dyn EngineFactory) -> Result<()> {
        let name = self.channel.name().to_string();
        let (reporter, mut handle) = phase_e_channel();
        let mut terminal = factory.t38_terminal(self.session.calling(), reporter)?;
        self.session
            .configure_terminal(terminal.as_mut(), self.ctx.config());
        if let Some(parameters) = self.session.t38_parameters() {
            terminal.apply_parameters(&parameters);
        }
        self.session.enter_t38();
        debug!("channel {}: fax exchange running over T.38", name);

        let mut watchdog = Watchdog::new(self.ctx.config());
        let mut last_tick = Instant::now();
        loop {
            if watchdog.expired() {
                warn!("no fax progress on {}, aborting", name);
                self.session.fail("fax watchdog timeout");
                terminal.detach_phase_e();
                terminal.terminate();
                return Ok(());
            }

            match timeout(IDLE_WAIT, self.channel.read()).await {
                Err(_) => {} // idle slice
                Ok(Ok(Some(Frame::Modem(packet)))) => {
                    terminal.feed_ifp(&packet.payload, packet.seq_no);
                }
                Ok(Ok(Some(Frame::Control(ControlSignal::T38 {
                    control: T38Control::Terminated,
                    ..
                })))) => {
                    debug!("channel {}: far end ended the T.38 session", name);
                    terminal.terminate();
                    match handle.try_take() {
                        Some(report) => {
                            self.session.complete_with_report(report);
                        }
                        None => {
                            self.session.fail("T.38 session ended prematurely");
                        }
                    }
                    return Ok(());
                }
                Ok(Ok(Some(_))) => {} // stray voice or unrelated controls
                Ok(Ok(None)) => {
                    debug!("channel {} hung up during the T.38 phase", name);
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

            let elapsed = last_tick.elapsed();
            last_tick = Instant::now();
            for packet in terminal.poll(elapsed) {
                if let Err(e) = self.channel.write(Frame::Modem(packet)).await {
                    terminal.detach_phase_e();
                    terminal.terminate();
                    return Err(e.into());
                }
            }
            watchdog.observe_t30(terminal.t30_state());

            if let Some(report) = handle.try_take() {
                self.session.complete_with_report(report);
                terminal.terminate();
                return Ok(());
            }
        }
    }
}
