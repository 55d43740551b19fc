//! # Event Bus System
//!
//! Typed events broadcast from the synchronization engine to any number of
//! host subscribers, over a `broadcast` channel.
//!
//! ## Overview
//!
//! - **Event Types**: `ScanEvent` (scan lifecycle and progress),
//!   `LibraryEvent` (catalog changes), `OpenEvent` (remote item open flow)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ScanEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Scan(ScanEvent::Started {
//!         library_id: "lib-1".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(subscriber.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind. Progress
//!   events are superseded by later ones, so lagging is safe to ignore.
//! - **`RecvError::Closed`**: every sender is gone (shutdown).
//!
//! Emitting with no subscribers returns an error; the engine ignores it.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Library scan lifecycle
    Scan(ScanEvent),
    /// Catalog record changes
    Library(LibraryEvent),
    /// Opening a cloud-backed item for playback
    Open(OpenEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Scan(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
            CoreEvent::Open(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Scan(ScanEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Open(OpenEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Scan(ScanEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Scan(ScanEvent::Completed { .. })
            | CoreEvent::Scan(ScanEvent::Reconciled { .. })
            | CoreEvent::Open(OpenEvent::Playable { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
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

/// Events emitted while a library is scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ScanEvent {
    /// A scan was requested and access to the root is being resolved.
    Started { library_id: String },
    /// Reconciliation finished; the catalog already reflects additions and
    /// removals.
    Reconciled {
        library_id: String,
        created: u64,
        removed: u64,
        queued: u64,
        skipped: u64,
        total_found: u64,
    },
    /// One extraction batch was committed.
    Progress {
        library_id: String,
        completed: u64,
        total: u64,
    },
    /// Every queued item was processed.
    Completed {
        library_id: String,
        extracted: u64,
        failed: u64,
        duration_ms: u64,
    },
    /// The scan was superseded or cancelled at a batch boundary.
    Cancelled { library_id: String, completed: u64 },
    /// The scan could not start (access grant, catalog unavailable).
    Failed { library_id: String, message: String },
}

impl ScanEvent {
    fn description(&self) -> &str {
        match self {
            ScanEvent::Started { .. } => "Scan started",
            ScanEvent::Reconciled { .. } => "Library reconciled",
            ScanEvent::Progress { .. } => "Metadata extraction in progress",
            ScanEvent::Completed { .. } => "Scan completed",
            ScanEvent::Cancelled { .. } => "Scan cancelled",
            ScanEvent::Failed { .. } => "Scan failed",
        }
    }
}

/// Events related to catalog content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    LibraryAdded { library_id: String, label: String },
    LibraryRemoved { library_id: String },
    ItemAdded { library_id: String, item_id: String },
    ItemRemoved { library_id: String, item_id: String },
    /// Extracted metadata was written for an item.
    ItemUpdated { item_id: String },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::LibraryAdded { .. } => "Library added",
            LibraryEvent::LibraryRemoved { .. } => "Library removed",
            LibraryEvent::ItemAdded { .. } => "Item added",
            LibraryEvent::ItemRemoved { .. } => "Item removed",
            LibraryEvent::ItemUpdated { .. } => "Item metadata updated",
        }
    }
}

/// Events emitted while an item is opened for playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum OpenEvent {
    Materializing { item_id: String, progress: f64 },
    Extracting { item_id: String },
    Playable { item_id: String },
    Failed { item_id: String, message: String },
}

impl OpenEvent {
    fn description(&self) -> &str {
        match self {
            OpenEvent::Materializing { .. } => "Downloading item",
            OpenEvent::Extracting { .. } => "Reading item metadata",
            OpenEvent::Playable { .. } => "Item ready to play",
            OpenEvent::Failed { .. } => "Item could not be opened",
        }
    }
}

/// Central event bus.
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events buffered per subscriber before
    ///   it receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
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

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let scans_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Scan(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
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
