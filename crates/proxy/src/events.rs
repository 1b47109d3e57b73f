//! Delivery of transaction-lifecycle events to external subscribers.
//!
//! The core does not store finished transactions; interested parties (a
//! UI, a persistence sink) subscribe to an [`EventBus`] and receive every
//! [`ProxyEvent`] as it happens. Snapshots travel behind [`Arc`] so that
//! cloning an event for each subscriber stays cheap and emission never
//! blocks a transaction.
//!
//! Per transaction, events arrive in strictly increasing lifecycle order
//! and each at most once; across transactions no ordering is guaranteed.
//! Subscribers run on runtime threads and must not block. A subscriber
//! that falls behind the channel capacity observes a
//! [`Lagged`](tokio::sync::broadcast::error::RecvError::Lagged) gap rather
//! than slowing the proxy down.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::protocol::{HttpMessage, ProxyError};

/// A lifecycle event of one transaction.
///
/// The message snapshots are immutable copies taken at emission time;
/// `ResponseHeadersRead` carries a partial response (headers only, body
/// not yet read).
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    TransactionStarted { id: i64 },
    RequestRead { id: i64, request: Arc<HttpMessage> },
    ResponseHeadersRead { id: i64, response: Arc<HttpMessage> },
    ResponseRead { id: i64, response: Arc<HttpMessage> },
    TransactionComplete { id: i64 },
    TransactionFailed { id: i64, error: Arc<ProxyError> },
}

impl ProxyEvent {
    /// The id of the transaction this event belongs to.
    pub fn transaction_id(&self) -> i64 {
        match self {
            Self::TransactionStarted { id }
            | Self::RequestRead { id, .. }
            | Self::ResponseHeadersRead { id, .. }
            | Self::ResponseRead { id, .. }
            | Self::TransactionComplete { id }
            | Self::TransactionFailed { id, .. } => *id,
        }
    }

    /// True for the two terminal events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TransactionComplete { .. } | Self::TransactionFailed { .. })
    }
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Multi-producer, multi-consumer fan-out of [`ProxyEvent`]s.
///
/// Cloning the bus yields another producer handle onto the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProxyEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Registers a new subscriber. Only events emitted after this call are
    /// observed.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all current subscribers. Never blocks; an event
    /// emitted while nobody is subscribed is simply dropped.
    pub fn emit(&self, event: ProxyEvent) {
        trace!(id = event.transaction_id(), event = ?event, "emit");
        let _ = self.sender.send(event);
    }
}
