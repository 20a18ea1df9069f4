//! # Event Bus System
//!
//! Typed broadcast events between the gallery core and its observers.
//!
//! ## Overview
//!
//! The reconciliation engine, the secure folder and the remote sync engine
//! publish what they did on a shared [`EventBus`]. The host UI subscribes and
//! renders from these events instead of polling the index.
//!
//! ```text
//! ┌──────────────────┐   emit   ┌──────────┐  subscribe  ┌────────────┐
//! │ Reconciliation   ├─────────>│          ├────────────>│ UI binding │
//! ├──────────────────┤          │ EventBus │             └────────────┘
//! │ Secure folder    ├─────────>│          │  subscribe  ┌────────────┐
//! ├──────────────────┤          │          ├────────────>│ Logger     │
//! │ Remote sync      ├─────────>│          │             └────────────┘
//! └──────────────────┘          └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, IndexEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut rx = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Index(IndexEvent::ResyncStarted {
//!         job_id: "job-1".to_string(),
//!         kind: "full".to_string(),
//!     }))
//!     .ok();
//!
//! assert!(rx.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! Subscribers that fall behind receive `RecvError::Lagged(n)` and may keep
//! reading; `RecvError::Closed` means the core shut down.

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
    /// Local media index reconciliation
    Index(IndexEvent),
    /// Secure folder and trash bin
    Vault(VaultEvent),
    /// Remote album sync
    Remote(RemoteEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Index(e) => e.description(),
            CoreEvent::Vault(e) => e.description(),
            CoreEvent::Remote(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Index(IndexEvent::ResyncFailed { .. }) => EventSeverity::Error,
            CoreEvent::Remote(RemoteEvent::AlbumsRefreshFailed { .. }) => EventSeverity::Error,
            CoreEvent::Remote(RemoteEvent::UploadCompleted { failed, .. }) if *failed > 0 => {
                EventSeverity::Warning
            }
            CoreEvent::Vault(VaultEvent::ItemsSecured { failed, .. })
            | CoreEvent::Vault(VaultEvent::ItemsRestored { failed, .. })
                if *failed > 0 =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Index(IndexEvent::ResyncCompleted { .. }) => EventSeverity::Info,
            CoreEvent::Remote(RemoteEvent::UploadCompleted { .. }) => EventSeverity::Info,
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

// ============================================================================
// Index Events
// ============================================================================

/// Events emitted while reconciling the local media index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum IndexEvent {
    /// A resync run started.
    ResyncStarted {
        job_id: String,
        /// `full` or `incremental`.
        kind: String,
    },
    /// A chunk was committed.
    ResyncProgress {
        job_id: String,
        processed: u64,
        total: u64,
        /// Completion in `[0.0, 1.0]`, non-decreasing within a run.
        fraction: f32,
    },
    /// A resync run finished.
    ResyncCompleted {
        job_id: String,
        added: u64,
        updated: u64,
        removed: u64,
        skipped: u64,
    },
    /// A resync run aborted.
    ResyncFailed { job_id: String, message: String },
    /// The media source returned no cursor; nothing was done.
    SourceUnavailable { kind: String },
}

impl IndexEvent {
    fn description(&self) -> &str {
        match self {
            IndexEvent::ResyncStarted { .. } => "Media index resync started",
            IndexEvent::ResyncProgress { .. } => "Media index resync progress",
            IndexEvent::ResyncCompleted { .. } => "Media index resync completed",
            IndexEvent::ResyncFailed { .. } => "Media index resync failed",
            IndexEvent::SourceUnavailable { .. } => "Media source unavailable",
        }
    }
}

// ============================================================================
// Vault Events
// ============================================================================

/// Events from the secure folder and the trash bin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum VaultEvent {
    ItemsSecured { secured: u64, failed: u64 },
    ItemsRestored { restored: u64, failed: u64 },
    ItemsPurged { purged: u64 },
    /// Legacy plaintext files were encrypted in place.
    MigrationCompleted { migrated: u64, failed: u64 },
    ItemsTrashed { trashed: u64, failed: u64 },
    ItemsUntrashed { restored: u64, failed: u64 },
    TrashEmptied { deleted: u64 },
}

impl VaultEvent {
    fn description(&self) -> &str {
        match self {
            VaultEvent::ItemsSecured { .. } => "Items moved to secure folder",
            VaultEvent::ItemsRestored { .. } => "Items restored from secure folder",
            VaultEvent::ItemsPurged { .. } => "Secure items permanently deleted",
            VaultEvent::MigrationCompleted { .. } => "Secure folder migration completed",
            VaultEvent::ItemsTrashed { .. } => "Items moved to trash",
            VaultEvent::ItemsUntrashed { .. } => "Items restored from trash",
            VaultEvent::TrashEmptied { .. } => "Trash emptied",
        }
    }
}

// ============================================================================
// Remote Events
// ============================================================================

/// Events from remote album sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RemoteEvent {
    /// An album's sync state changed (`Loading`, `InSync`, ...).
    AlbumStateChanged { album_id: String, state: String },
    /// An upload task made progress.
    UploadProgress {
        album_id: String,
        uploaded: u64,
        total: u64,
    },
    /// An upload task finished.
    UploadCompleted {
        album_id: String,
        uploaded: u64,
        skipped: u64,
        failed: u64,
    },
    /// Album listing failed after all retries.
    AlbumsRefreshFailed { attempts: u32, message: String },
    /// Stale remembered duplicates were dropped.
    DuplicatesPruned { album_id: String, removed: u64 },
}

impl RemoteEvent {
    fn description(&self) -> &str {
        match self {
            RemoteEvent::AlbumStateChanged { .. } => "Album sync state changed",
            RemoteEvent::UploadProgress { .. } => "Album upload progress",
            RemoteEvent::UploadCompleted { .. } => "Album upload completed",
            RemoteEvent::AlbumsRefreshFailed { .. } => "Album refresh failed",
            RemoteEvent::DuplicatesPruned { .. } => "Stale duplicates pruned",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cheap to clone; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers; publishers
    /// normally ignore it with `.ok()`.
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

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let remote_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Remote(_)));
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

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Ok(event),
            }
        }
    }

    /// Receives without waiting; `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => match &self.filter {
                    Some(filter) if !filter(&event) => continue,
                    _ => return Some(Ok(event)),
                },
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
