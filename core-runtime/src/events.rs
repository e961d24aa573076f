//! # Bridge Event Bus
//!
//! Broadcasts what the WebSQL bridge is doing (databases opening, transactions
//! committing or rolling back, queries failing) to interested host code over
//! `tokio::sync::broadcast`. Events are informational: the JavaScript side
//! learns about outcomes through callbacks, never through this bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐    subscribe    ┌────────────┐
//! │ Batch Runner ├──────────────>│           ├────────────────>│ Diagnostics│
//! └──────────────┘               │ EventBus  │                 └────────────┘
//! ┌──────────────┐     emit      │ (broadcast│    subscribe    ┌────────────┐
//! │   Registry   ├──────────────>│  channel) ├────────────────>│   Tests    │
//! └──────────────┘               └───────────┘                 └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BridgeEvent, EventBus, TransactionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(BridgeEvent::Transaction(TransactionEvent::Committed {
//!     tx_id: 1,
//!     db_name: "inbox".to_string(),
//! }))
//! .ok();
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.description(), "Transaction committed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - `emit` fails only when nobody is subscribed; the bridge ignores that.
//! - `RecvError::Lagged(n)`: the subscriber missed `n` events and can keep
//!   going.
//! - `RecvError::Closed`: the bus was dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum BridgeEvent {
    Database(DatabaseEvent),
    Transaction(TransactionEvent),
}

impl BridgeEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            BridgeEvent::Database(e) => e.description(),
            BridgeEvent::Transaction(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            BridgeEvent::Database(DatabaseEvent::OpenFailed { .. }) => EventSeverity::Error,
            BridgeEvent::Transaction(TransactionEvent::TimedOut { .. }) => EventSeverity::Warning,
            BridgeEvent::Transaction(TransactionEvent::QueryFailed { .. }) => {
                EventSeverity::Warning
            }
            BridgeEvent::Transaction(TransactionEvent::RolledBack { .. }) => EventSeverity::Info,
            BridgeEvent::Database(DatabaseEvent::Opened { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Transaction id the event refers to, if any.
    pub fn tx_id(&self) -> Option<i64> {
        match self {
            BridgeEvent::Database(_) => None,
            BridgeEvent::Transaction(e) => Some(e.tx_id()),
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Database handle lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DatabaseEvent {
    /// A connection was opened for the database file.
    Opened { db_name: String, file_name: String },
    /// Opening the database file failed.
    OpenFailed { db_name: String, message: String },
    /// `close()` released every handle.
    Closed { count: usize },
}

impl DatabaseEvent {
    fn description(&self) -> &str {
        match self {
            DatabaseEvent::Opened { .. } => "Database opened",
            DatabaseEvent::OpenFailed { .. } => "Database open failed",
            DatabaseEvent::Closed { .. } => "Databases closed",
        }
    }
}

/// Transaction progress as seen by the batch runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransactionEvent {
    Begun {
        tx_id: i64,
        db_name: String,
    },
    Committed {
        tx_id: i64,
        db_name: String,
    },
    RolledBack {
        tx_id: i64,
        db_name: String,
        /// Whether the rollback was asked for by the host rather than forced
        /// by a failure
        requested: bool,
    },
    /// Rolled back after sitting idle at the head of the queue.
    TimedOut {
        tx_id: i64,
        db_name: String,
    },
    /// A statement failed and halted the transaction's queue.
    QueryFailed {
        tx_id: i64,
        db_name: String,
        message: String,
    },
}

impl TransactionEvent {
    fn description(&self) -> &str {
        match self {
            TransactionEvent::Begun { .. } => "Transaction begun",
            TransactionEvent::Committed { .. } => "Transaction committed",
            TransactionEvent::RolledBack { .. } => "Transaction rolled back",
            TransactionEvent::TimedOut { .. } => "Transaction timed out",
            TransactionEvent::QueryFailed { .. } => "Query failed",
        }
    }

    fn tx_id(&self) -> i64 {
        match self {
            TransactionEvent::Begun { tx_id, .. }
            | TransactionEvent::Committed { tx_id, .. }
            | TransactionEvent::RolledBack { tx_id, .. }
            | TransactionEvent::TimedOut { tx_id, .. }
            | TransactionEvent::QueryFailed { tx_id, .. } => *tx_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`BridgeEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Creates a new event bus; `capacity` events are buffered per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: BridgeEvent) -> Result<usize, SendError<BridgeEvent>> {
        self.sender.send(event)
    }

    /// Each subscriber receives events emitted after it subscribed.
    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&BridgeEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{BridgeEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let only_tx_7 = EventStream::new(bus.subscribe()).filter(|event| event.tx_id() == Some(7));
/// ```
pub struct EventStream {
    receiver: Receiver<BridgeEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<BridgeEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BridgeEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &BridgeEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<BridgeEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<BridgeEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(tx_id: i64) -> BridgeEvent {
        BridgeEvent::Transaction(TransactionEvent::Committed {
            tx_id,
            db_name: "inbox".to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_fails() {
        let bus = EventBus::new(4);
        assert!(bus.emit(committed(1)).is_err());
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(committed(1)).unwrap(), 2);
        assert_eq!(a.recv().await.unwrap(), committed(1));
        assert_eq!(b.recv().await.unwrap(), committed(1));
    }

    #[tokio::test]
    async fn test_stream_filter() {
        let bus = EventBus::new(8);
        let mut stream = EventStream::new(bus.subscribe()).filter(|e| e.tx_id() == Some(2));

        bus.emit(committed(1)).unwrap();
        bus.emit(BridgeEvent::Database(DatabaseEvent::Closed { count: 1 }))
            .unwrap();
        bus.emit(committed(2)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), committed(2));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut stream = EventStream::new(bus.subscribe());
        for id in 0..5 {
            bus.emit(committed(id)).unwrap();
        }
        assert!(matches!(stream.try_recv(), Some(Err(RecvError::Lagged(_)))));
    }

    #[test]
    fn test_severity() {
        let failed = BridgeEvent::Database(DatabaseEvent::OpenFailed {
            db_name: "x".to_string(),
            message: "disk I/O error".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);
        assert_eq!(committed(1).severity(), EventSeverity::Debug);
        assert!(EventSeverity::Error > EventSeverity::Warning);
    }

    #[test]
    fn test_serialization_shape() {
        let event = BridgeEvent::Transaction(TransactionEvent::TimedOut {
            tx_id: 9,
            db_name: "inbox".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Transaction");
        assert_eq!(json["payload"]["event"], "TimedOut");
        assert_eq!(json["payload"]["tx_id"], 9);

        let back: BridgeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
