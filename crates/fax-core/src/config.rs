//! Configuration for fax sessions and the shared runtime context

use crate::events::EventRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for fax sessions and the gateway
///
/// All timeouts are plain durations so tests can shrink them to
/// millisecond scale; the defaults are the production values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaxConfig {
    /// Station identifier announced to the remote machine
    pub local_station_id: String,

    /// Header line stamped on each transmitted page
    pub page_header: String,

    /// Enable T.30 error correction mode
    pub ecm: bool,

    /// How long a receive entry waits for the far end to answer a T.38
    /// negotiation request before falling back to audio
    pub negotiation_timeout: Duration,

    /// Poll slice used while waiting for the negotiation answer
    pub negotiation_poll: Duration,

    /// How long the gateway waits for the dialed peer to answer
    pub dial_timeout: Duration,

    /// Abort when the T.30 state has not changed for this long
    pub watchdog_state_timeout: Duration,

    /// Abort when a session has run for this long in total
    pub watchdog_total_timeout: Duration,

    /// Verbosity hint engine adapters apply when wiring the engine's
    /// internal logging
    pub engine_verbose: bool,
}

impl Default for FaxConfig {
    fn default() -> Self {
        Self {
            local_station_id: String::new(),
            page_header: String::new(),
            ecm: true,
            negotiation_timeout: Duration::from_secs(5),
            negotiation_poll: Duration::from_secs(1),
            dial_timeout: Duration::from_secs(6),
            watchdog_state_timeout: Duration::from_secs(5 * 60),
            watchdog_total_timeout: Duration::from_secs(30 * 60),
            engine_verbose: false,
        }
    }
}

/// Shared state injected into every session and gateway driver
///
/// Owns the configuration and the event-handler registry. Application
/// embedders build one context at startup and hand clones of the `Arc`
/// to each driver.
pub struct RuntimeContext {
    config: FaxConfig,
    events: EventRegistry,
}

impl RuntimeContext {
    /// Create a context from a configuration
    pub fn new(config: FaxConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            events: EventRegistry::new(),
        })
    }

    /// The configuration this context was built with
    pub fn config(&self) -> &FaxConfig {
        &self.config
    }

    /// The event-handler registry
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }
}
