//! Engine abstraction for T.30/T.38 processing
//!
//! The session and gateway loops never touch modem DSP directly; they
//! drive one of the trait objects defined here. A production build backs
//! these traits with a real fax engine, tests back them with scripted
//! mocks. All trait methods are synchronous: the engines are pure
//! computation and are always called from the single task that owns the
//! session loop.
//!
//! Completion is delivered through a single-shot reporter rather than a
//! callback pointer. The engine adapter holds the [`PhaseEReporter`] and
//! fires it when the T.30 exchange reaches phase E; the session loop
//! polls the matching [`PhaseEHandle`] after each engine call. Detaching
//! the reporter (for example right before tearing an audio terminal down
//! during a T.38 switchover) guarantees the teardown cannot produce a
//! completion.

use crate::error::Result;
use crate::outcome::FaxDirection;
use faxgate_channel_core::{IfpPacket, T38Parameters};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Opaque T.30 protocol phase reported by an engine
///
/// The watchdog only compares values for change; it never interprets
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct T30State(pub u32);

/// Severity of a message from the engine's internal logger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLogLevel {
    /// The engine hit a hard fault
    Error,
    /// The engine noticed something abnormal but carried on
    Warning,
    /// Protocol flow detail
    Debug,
}

/// Forward one engine log message to the host logger
///
/// Engine adapters route their engine's internal logging through this so
/// that engine output lands in the same subscriber as everything else.
pub fn log_engine_message(level: EngineLogLevel, message: &str) {
    match level {
        EngineLogLevel::Error => error!("fax engine: {}", message),
        EngineLogLevel::Warning => warn!("fax engine: {}", message),
        EngineLogLevel::Debug => debug!("fax engine: {}", message),
    }
}

/// Final report delivered when the T.30 exchange reaches phase E
#[derive(Debug, Clone, Default)]
pub struct PhaseEReport {
    /// `None` on success, the engine's completion diagnostic on failure
    pub error: Option<String>,
    /// Station identifier the remote machine announced
    pub remote_station_id: String,
    /// Station identifier we announced
    pub local_station_id: String,
    /// Pages transferred in the session's direction
    pub pages: u32,
    /// Vertical resolution in rows per inch
    pub resolution: u32,
    /// Transfer rate in bits per second
    pub bit_rate: u32,
}

impl PhaseEReport {
    /// True when the exchange completed cleanly
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Send half of the phase-E completion channel, held by the engine
/// adapter
pub struct PhaseEReporter {
    tx: Option<oneshot::Sender<PhaseEReport>>,
}

impl PhaseEReporter {
    /// Deliver the completion report
    ///
    /// Returns false when the reporter already fired or was detached; the
    /// report is dropped in that case.
    pub fn report(&mut self, report: PhaseEReport) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(report).is_ok(),
            None => false,
        }
    }

    /// Disarm the reporter so later calls (including any fired from a
    /// teardown path) deliver nothing
    pub fn detach(&mut self) {
        self.tx = None;
    }

    /// True while the reporter can still deliver a report
    pub fn is_armed(&self) -> bool {
        self.tx.is_some()
    }
}

/// Receive half of the phase-E completion channel, polled by the session
/// loop
pub struct PhaseEHandle {
    rx: oneshot::Receiver<PhaseEReport>,
}

impl PhaseEHandle {
    /// Non-blocking poll; yields the report exactly once
    pub fn try_take(&mut self) -> Option<PhaseEReport> {
        self.rx.try_recv().ok()
    }
}

/// Build a connected reporter/handle pair for one terminal
pub fn phase_e_channel() -> (PhaseEReporter, PhaseEHandle) {
    let (tx, rx) = oneshot::channel();
    (PhaseEReporter { tx: Some(tx) }, PhaseEHandle { rx })
}

/// Transfer statistics read from a gateway core on exit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GatewayStats {
    /// Transfer rate in bits per second
    pub bit_rate: u32,
    /// Whether error correction mode was active
    pub error_correcting_mode: bool,
    /// Pages relayed
    pub pages_transferred: u32,
}

/// Fax calling and answer tones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaxTone {
    /// 1100 Hz calling tone from the originating machine
    Cng,
    /// 2100 Hz answer tone from the called machine
    Ced,
}

impl fmt::Display for FaxTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cng => write!(f, "CNG"),
            Self::Ced => write!(f, "CED"),
        }
    }
}

/// Configuration shared by both terminal flavors, applied after build and
/// before the first media call
pub trait TerminalConfig {
    /// Station identifier announced to the remote machine
    fn set_local_station_id(&mut self, id: &str);

    /// Header line stamped on each transmitted page
    fn set_page_header(&mut self, header: &str);

    /// Enable or disable T.30 error correction mode
    fn set_ecm(&mut self, enabled: bool);

    /// Attach the TIFF document; the engine owns the file from here on
    fn set_document(&mut self, path: &str, direction: FaxDirection);
}

/// A T.30 terminal driven over PCM audio
pub trait T30Terminal: TerminalConfig + Send {
    /// Feed received PCM samples into the engine
    ///
    /// The engine contract is that receive processing cannot fail; a
    /// false return is a logic fault and callers treat the session as
    /// failed.
    fn feed_audio(&mut self, samples: &[i16]) -> bool;

    /// Pull up to `max_samples` of generated fax tone audio
    ///
    /// An empty return means the engine has nothing to say right now,
    /// not an error.
    fn pull_audio(&mut self, max_samples: usize) -> Vec<i16>;

    /// Current protocol phase, compared by the watchdog for change only
    fn t30_state(&self) -> T30State;

    /// Disarm the completion reporter so `terminate` cannot fire it
    fn detach_phase_e(&mut self);

    /// Wind the exchange down and release engine resources
    ///
    /// Fires the phase-E reporter with the engine's final verdict unless
    /// it already fired or was detached.
    fn terminate(&mut self);
}

/// A T.30 terminal driven over T.38 IFP packets
pub trait T38Terminal: TerminalConfig + Send {
    /// Apply the session parameters the far end negotiated
    fn apply_parameters(&mut self, parameters: &T38Parameters);

    /// Feed one received IFP packet with its transport sequence number
    fn feed_ifp(&mut self, payload: &[u8], seq_no: u16);

    /// Advance the engine's pacing clock by `elapsed` and collect the
    /// IFP packets it wants sent, in order
    ///
    /// The caller forwards each packet as a single transport write.
    fn poll(&mut self, elapsed: Duration) -> Vec<IfpPacket>;

    /// Current protocol phase, compared by the watchdog for change only
    fn t30_state(&self) -> T30State;

    /// Disarm the completion reporter so `terminate` cannot fire it
    fn detach_phase_e(&mut self);

    /// Wind the exchange down and release engine resources
    fn terminate(&mut self);
}

/// The audio-to-T.38 translation core used by the gateway
pub trait T38GatewayCore: Send {
    /// Feed one IFP packet received from the T.38 leg
    fn feed_ifp(&mut self, payload: &[u8], seq_no: u16);

    /// Feed PCM received from the audio leg
    ///
    /// As with [`T30Terminal::feed_audio`], a false return is a logic
    /// fault, not a recoverable condition.
    fn gateway_rx(&mut self, samples: &[i16]) -> bool;

    /// Pull up to `max_samples` of audio destined for the audio leg
    fn gateway_tx(&mut self, max_samples: usize) -> Vec<i16>;

    /// Collect IFP packets the engine wants sent toward the T.38 leg
    fn take_outbound_ifp(&mut self) -> Vec<IfpPacket>;

    /// Transfer statistics accumulated so far
    fn stats(&self) -> GatewayStats;
}

/// CNG/CED tone detection over PCM
pub trait ToneDetector: Send {
    /// Feed one voice frame; reports the watched tone at most once per
    /// call
    fn feed(&mut self, samples: &[i16]) -> Option<FaxTone>;
}

/// Builds engine instances for fax sessions
///
/// One factory serves many sessions; each call returns a freshly
/// initialized engine object. `calling` selects calling-station versus
/// answering-station behavior for the T.30 exchange.
pub trait EngineFactory: Send + Sync {
    /// Build an audio T.30 terminal
    fn t30_terminal(&self, calling: bool, reporter: PhaseEReporter)
        -> Result<Box<dyn T30Terminal>>;

    /// Build a T.38 terminal
    fn t38_terminal(&self, calling: bool, reporter: PhaseEReporter)
        -> Result<Box<dyn T38Terminal>>;

    /// Build a gateway translation core
    fn gateway(&self) -> Result<Box<dyn T38GatewayCore>>;

    /// Build a detector watching for `tone`
    fn tone_detector(&self, tone: FaxTone) -> Result<Box<dyn ToneDetector>>;
}
