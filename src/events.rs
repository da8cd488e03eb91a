//! Notifications published after successful mutations.
//!
//! Delivery is fire-and-forget over a `tokio` broadcast channel: publishing
//! never blocks and never fails the mutation, subscribers that fall behind
//! lose the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::context::RepositoryKind;
use crate::transaction::TransactionSummary;

/// Default number of undelivered events kept per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryEvent {
    ValueInserted {
        subject: String,
        predicate: String,
        value: String,
        transaction: TransactionSummary,
    },
    ValueRemoved {
        subject: String,
        predicate: String,
        value: String,
        transaction: TransactionSummary,
    },
    ValueReplaced {
        subject: String,
        predicate: String,
        old_value: String,
        new_value: String,
        transaction: TransactionSummary,
    },
    LinkRemoved {
        subject: String,
        predicate: String,
        target: String,
        transaction: TransactionSummary,
    },
    StatementsImported {
        kind: RepositoryKind,
        label: String,
        count: usize,
    },
    RepositoryReset {
        kind: RepositoryKind,
        label: String,
    },
}

impl RepositoryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RepositoryEvent::ValueInserted { .. } => "value_inserted",
            RepositoryEvent::ValueRemoved { .. } => "value_removed",
            RepositoryEvent::ValueReplaced { .. } => "value_replaced",
            RepositoryEvent::LinkRemoved { .. } => "link_removed",
            RepositoryEvent::StatementsImported { .. } => "statements_imported",
            RepositoryEvent::RepositoryReset { .. } => "repository_reset",
        }
    }
}

/// Publisher side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RepositoryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.sender.subscribe()
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: RepositoryEvent) -> usize {
        let name = event.name();
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(event = name, delivered, "published repository event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
