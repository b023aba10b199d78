//! Events published by the fax applications
//!
//! Handlers are registered by name and receive every published event in
//! registration order, on the publisher's task. Publishing must never
//! block the media path, so handlers are expected to queue and return;
//! anything slow belongs on the handler's own task.

use crate::engine::GatewayStats;
use crate::outcome::{FaxDirection, FaxOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use faxgate_channel_core::ChannelId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Event published by a fax application driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaxEvent {
    /// The gateway's outbound leg has started dialing
    DialBegin {
        /// The calling leg
        caller: ChannelId,
        /// The freshly requested peer leg
        peer: ChannelId,
        /// Dial string the peer was requested with
        destination: String,
        /// When the dial began
        at: DateTime<Utc>,
    },
    /// T.38 negotiation was requested on a leg
    NegotiationRequested {
        /// The leg the request was indicated on
        channel: ChannelId,
        /// When the request was indicated
        at: DateTime<Utc>,
    },
    /// A session switched from audio to T.38 mid-exchange
    SwitchedToT38 {
        /// The leg that switched
        channel: ChannelId,
        /// When the confirmation was observed
        at: DateTime<Utc>,
    },
    /// A send or receive completed successfully
    FaxCompleted {
        /// Whether the document was sent or received
        direction: FaxDirection,
        /// The completion record
        outcome: FaxOutcome,
        /// The local leg the exchange ran on
        channel: ChannelId,
        /// Path of the transferred document
        document: String,
        /// When the exchange completed
        at: DateTime<Utc>,
    },
    /// A gateway invocation finished
    GatewayCompleted {
        /// The calling leg
        caller: ChannelId,
        /// The dialed peer leg
        peer: ChannelId,
        /// The completion record
        outcome: FaxOutcome,
        /// Statistics from the relay phase, when one ran
        stats: Option<GatewayStats>,
        /// When the gateway finished
        at: DateTime<Utc>,
    },
}

impl FaxEvent {
    /// Build a dial-begin event stamped now
    pub fn dial_begin(caller: ChannelId, peer: ChannelId, destination: impl Into<String>) -> Self {
        Self::DialBegin {
            caller,
            peer,
            destination: destination.into(),
            at: Utc::now(),
        }
    }

    /// Build a negotiation-requested event stamped now
    pub fn negotiation_requested(channel: ChannelId) -> Self {
        Self::NegotiationRequested {
            channel,
            at: Utc::now(),
        }
    }

    /// Build a switched-to-T.38 event stamped now
    pub fn switched_to_t38(channel: ChannelId) -> Self {
        Self::SwitchedToT38 {
            channel,
            at: Utc::now(),
        }
    }

    /// Build a fax-completed event stamped now
    pub fn fax_completed(
        direction: FaxDirection,
        outcome: FaxOutcome,
        channel: ChannelId,
        document: impl Into<String>,
    ) -> Self {
        Self::FaxCompleted {
            direction,
            outcome,
            channel,
            document: document.into(),
            at: Utc::now(),
        }
    }

    /// Build a gateway-completed event stamped now
    pub fn gateway_completed(
        caller: ChannelId,
        peer: ChannelId,
        outcome: FaxOutcome,
        stats: Option<GatewayStats>,
    ) -> Self {
        Self::GatewayCompleted {
            caller,
            peer,
            outcome,
            stats,
            at: Utc::now(),
        }
    }
}

/// Receives published fax events
#[async_trait]
pub trait FaxEventHandler: Send + Sync {
    /// Handle one event; runs on the publisher's task
    async fn handle_event(&self, event: FaxEvent);
}

/// Named fan-out registry for event handlers
#[derive(Default)]
pub struct EventRegistry {
    handlers: RwLock<Vec<(String, Arc<dyn FaxEventHandler>)>>,
}

impl EventRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a name
    pub async fn register(&self, name: &str, handler: Arc<dyn FaxEventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push((name.to_string(), handler));
        debug!("registered fax event handler: {}", name);
    }

    /// Remove the handler registered under `name`; returns whether one
    /// was removed
    pub async fn unregister(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        if let Some(pos) = handlers.iter().position(|(n, _)| n == name) {
            handlers.remove(pos);
            debug!("unregistered fax event handler: {}", name);
            true
        } else {
            false
        }
    }

    /// Deliver an event to every registered handler in registration order
    pub async fn publish(&self, event: FaxEvent) {
        let handlers = self.handlers.read().await;
        for (_, handler) in handlers.iter() {
            handler.handle_event(event.clone()).await;
        }
    }

    /// Number of registered handlers
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}
