//! Routing event bus
//!
//! Broadcast-based hand-off point for observability. The core publishes
//! structured events; transport (log shipper, queue, webhook) is the
//! subscriber's concern. Publishing never blocks and never fails: with
//! no subscribers events are simply dropped.

use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Structured events emitted while routing one generation request
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    /// A binding was selected and is about to be called
    AttemptStarted {
        tenant_id: String,
        conversation_id: String,
        model: String,
    },

    /// A binding failed and the chain moved on
    ModelSwitched {
        tenant_id: String,
        conversation_id: String,
        from_model: String,
        reason: FailureKind,
    },

    /// Empty-truncated output triggered a budget escalation on the same binding
    BudgetEscalated {
        tenant_id: String,
        conversation_id: String,
        model: String,
        escalation: u32,
        max_output_tokens: u32,
    },

    /// The chain produced usable text
    GenerationSucceeded {
        tenant_id: String,
        conversation_id: String,
        model: String,
        tokens: u64,
        occurred_at: DateTime<Utc>,
    },

    /// The chain ended without usable text
    GenerationFailed {
        error_type: FailureKind,
        tenant_id: String,
        conversation_id: String,
        models_attempted: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
}

/// Broadcast channel for routing events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: RoutingEvent) {
        // send only errs when nobody is listening
        let _ = self.sender.send(event);
    }

    /// Open a new subscription
    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
