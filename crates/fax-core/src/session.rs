//! Fax session state, completion tracking and the watchdog
//!
//! A [`FaxSession`] is shared by the phase drivers of one operation. Its
//! `finished` flag is a write-once tri-state: zero while running, then
//! exactly one transition to success or failure. The phase-E completion
//! path and the watchdog both try to claim that transition; whichever
//! arrives first wins and the loser's write is dropped. The state machine
//! is equally one-way: a session can move from audio to T.38 once and
//! never back.

use crate::config::FaxConfig;
use crate::engine::{PhaseEReport, T30State, TerminalConfig};
use crate::outcome::{FaxDirection, FaxMode, FaxOutcome, FaxStatus};
use faxgate_channel_core::{ChannelId, T38Parameters};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicI8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long the phase loops wait for a frame before running their idle
/// work (watchdog check, engine pacing)
pub const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Lifecycle of a fax session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no media phase running yet
    Init,
    /// The audio T.30 loop is driving the exchange
    AudioActive,
    /// The T.38 terminal loop is driving the exchange
    T38Active,
    /// The session is over
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::AudioActive => "AUDIO_ACTIVE",
            Self::T38Active => "T38_ACTIVE",
            Self::Terminated => "TERMINATED",
        };
        write!(f, "{}", s)
    }
}

/// Shared state of one fax operation
pub struct FaxSession {
    channel: ChannelId,
    peer: Option<ChannelId>,
    direction: FaxDirection,
    calling: bool,
    document: Option<String>,
    state: Mutex<SessionState>,
    finished: AtomicI8,
    failure_reason: Mutex<Option<String>>,
    report: Mutex<Option<PhaseEReport>>,
    t38_parameters: Mutex<Option<T38Parameters>>,
}

impl FaxSession {
    /// Create a session for a terminating send or receive on one leg
    pub fn terminating(
        channel: ChannelId,
        direction: FaxDirection,
        calling: bool,
        document: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            peer: None,
            direction,
            calling,
            document: Some(document.into()),
            state: Mutex::new(SessionState::Init),
            finished: AtomicI8::new(0),
            failure_reason: Mutex::new(None),
            report: Mutex::new(None),
            t38_parameters: Mutex::new(None),
        }
    }

    /// Create a session for a gateway between two legs
    ///
    /// A gateway session tracks no document; the terminating engines on
    /// either side of the relay own their own files.
    pub fn gateway(channel: ChannelId, peer: ChannelId) -> Self {
        Self {
            channel,
            peer: Some(peer),
            direction: FaxDirection::Send,
            calling: true,
            document: None,
            state: Mutex::new(SessionState::Init),
            finished: AtomicI8::new(0),
            failure_reason: Mutex::new(None),
            report: Mutex::new(None),
            t38_parameters: Mutex::new(None),
        }
    }

    /// The local leg this session runs on
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// The gateway's peer leg, when there is one
    pub fn peer(&self) -> Option<&ChannelId> {
        self.peer.as_ref()
    }

    /// Whether the local endpoint sends or receives
    pub fn direction(&self) -> FaxDirection {
        self.direction
    }

    /// True when this endpoint behaves as the calling station
    pub fn calling(&self) -> bool {
        self.calling
    }

    /// Path of the TIFF document, when the session has one
    pub fn document(&self) -> Option<&str> {
        self.document.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Enter the audio phase; valid from `Init` only
    pub fn enter_audio(&self) -> bool {
        self.transition(SessionState::AudioActive, &[SessionState::Init])
    }

    /// Enter the T.38 phase; valid from `Init` or `AudioActive`
    ///
    /// A session never moves back to audio once T.38 is active.
    pub fn enter_t38(&self) -> bool {
        self.transition(
            SessionState::T38Active,
            &[SessionState::Init, SessionState::AudioActive],
        )
    }

    /// Mark the session terminated; valid from any live state
    pub fn mark_terminated(&self) {
        let mut state = self.state.lock();
        if *state != SessionState::Terminated {
            debug!("session on {}: {} -> TERMINATED", self.channel, *state);
            *state = SessionState::Terminated;
        }
    }

    fn transition(&self, next: SessionState, from: &[SessionState]) -> bool {
        let mut state = self.state.lock();
        if from.contains(&state) {
            debug!("session on {}: {} -> {}", self.channel, *state, next);
            *state = next;
            true
        } else {
            warn!(
                "session on {}: invalid transition {} -> {}",
                self.channel, *state, next
            );
            false
        }
    }

    /// True while no terminal result has been recorded
    pub fn is_running(&self) -> bool {
        self.finished.load(Ordering::SeqCst) == 0
    }

    /// True once a success has been recorded
    pub fn is_success(&self) -> bool {
        self.finished.load(Ordering::SeqCst) > 0
    }

    /// True once a failure has been recorded
    pub fn is_failure(&self) -> bool {
        self.finished.load(Ordering::SeqCst) < 0
    }

    /// Record a success without an engine report (gateway clean shutdown)
    ///
    /// Returns false when a result was already recorded.
    pub fn succeed(&self) -> bool {
        self.finished
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record a failure with a diagnostic
    ///
    /// Returns false when a result was already recorded; the reason is
    /// dropped in that case.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        if self
            .finished
            .compare_exchange(0, -1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.failure_reason.lock() = Some(reason.into());
            true
        } else {
            false
        }
    }

    /// Record the phase-E completion report
    ///
    /// Claims the result for success or failure according to the report.
    /// A report arriving after the result was already claimed (for
    /// example by the watchdog) is dropped.
    pub fn complete_with_report(&self, report: PhaseEReport) -> bool {
        let value = if report.is_success() { 1 } else { -1 };
        if self
            .finished
            .compare_exchange(0, value, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(error) = &report.error {
                warn!("fax on {} failed: {}", self.channel, error);
            } else {
                debug!(
                    "fax on {} completed: {} pages from '{}' at {} bps",
                    self.channel, report.pages, report.remote_station_id, report.bit_rate
                );
            }
            *self.report.lock() = Some(report);
            true
        } else {
            debug!(
                "late completion report on {} dropped, result already recorded",
                self.channel
            );
            false
        }
    }

    /// The phase-E report, once one was recorded
    pub fn report(&self) -> Option<PhaseEReport> {
        self.report.lock().clone()
    }

    /// The failure diagnostic, once one was recorded
    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }

    /// Store the T.38 parameters captured from a negotiation confirmation
    pub fn set_t38_parameters(&self, parameters: T38Parameters) {
        *self.t38_parameters.lock() = Some(parameters);
    }

    /// The captured T.38 parameters, when negotiation delivered any
    pub fn t38_parameters(&self) -> Option<T38Parameters> {
        *self.t38_parameters.lock()
    }

    /// Apply station identity, page header, ECM and the document to a
    /// freshly built terminal
    pub fn configure_terminal(&self, terminal: &mut dyn TerminalConfig, config: &FaxConfig) {
        if !config.local_station_id.is_empty() {
            terminal.set_local_station_id(&config.local_station_id);
        }
        if !config.page_header.is_empty() {
            terminal.set_page_header(&config.page_header);
        }
        terminal.set_ecm(config.ecm);
        if let Some(document) = self.document() {
            terminal.set_document(document, self.direction);
        }
    }

    /// Assemble the completion record for this session
    ///
    /// A recorded success takes its figures from the phase-E report; a
    /// failure carries the best available diagnostic, defaulting to the
    /// pre-seeded channel-problems text when nothing more specific was
    /// recorded.
    pub fn outcome(&self, mode: FaxMode) -> FaxOutcome {
        if self.is_success() {
            match self.report() {
                Some(report) => FaxOutcome {
                    status: FaxStatus::Success,
                    error: "OK".into(),
                    remote_station_id: report.remote_station_id,
                    pages: report.pages,
                    resolution: report.resolution,
                    bit_rate: report.bit_rate,
                    mode,
                },
                None => FaxOutcome {
                    status: FaxStatus::Success,
                    error: "OK".into(),
                    remote_station_id: String::new(),
                    pages: 0,
                    resolution: 0,
                    bit_rate: 0,
                    mode,
                },
            }
        } else {
            let error = self
                .report()
                .and_then(|r| r.error)
                .or_else(|| self.failure_reason())
                .unwrap_or_else(|| "Channel problems".into());
            FaxOutcome::failed(error, mode)
        }
    }
}

/// Watchdog against wedged fax exchanges
///
/// Two limits run together: a no-progress limit that restarts whenever
/// the observed protocol state moves, and a hard total limit on the whole
/// session. The phase loops check [`Watchdog::expired`] once per
/// iteration, so the total limit lands even against a line that never
/// goes quiet.
pub struct Watchdog {
    started: Instant,
    progressed: Instant,
    last_state: Option<T30State>,
    state_timeout: Duration,
    total_timeout: Duration,
}

impl Watchdog {
    /// Create a watchdog with the configured limits, started now
    pub fn new(config: &FaxConfig) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            progressed: now,
            last_state: None,
            state_timeout: config.watchdog_state_timeout,
            total_timeout: config.watchdog_total_timeout,
        }
    }

    /// Record the engine's current protocol phase; a change restarts the
    /// no-progress timer
    pub fn observe_t30(&mut self, state: T30State) {
        if self.last_state != Some(state) {
            self.last_state = Some(state);
            self.progressed = Instant::now();
        }
    }

    /// Restart the no-progress timer unconditionally
    pub fn touch(&mut self) {
        self.progressed = Instant::now();
    }

    /// True when either limit has been exceeded
    pub fn expired(&self) -> bool {
        let now = Instant::now();
        now.duration_since(self.progressed) >= self.state_timeout
            || now.duration_since(self.started) >= self.total_timeout
    }
}
