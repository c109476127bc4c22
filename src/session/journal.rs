//! Append-only event journal shared by every binding
//!
//! Each connection owns one [`Journal`]. Bindings append through the
//! connection core; everyone else reads snapshots or subscribes to the
//! broadcast stream of new events.

use crate::error::{ErrorKind, Fault};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default capacity of the live broadcast channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// One immutable journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<P> {
    /// Position in the journal, starting at 0
    pub seq: u64,
    /// Wall-clock time, never earlier than the previous entry
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind<P>,
}

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind<P> {
    Connecting,
    Connected,
    MessageSent {
        message: P,
    },
    MessageReceived {
        message: P,
    },
    Subscribed {
        topic: String,
    },
    Unsubscribed {
        topic: String,
    },
    Disconnected {
        manual: bool,
    },
    Error {
        error: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl<P> EventKind<P> {
    /// Wire name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Connecting => "CONNECTING",
            EventKind::Connected => "CONNECTED",
            EventKind::MessageSent { .. } => "MESSAGE_SENT",
            EventKind::MessageReceived { .. } => "MESSAGE_RECEIVED",
            EventKind::Subscribed { .. } => "SUBSCRIBED",
            EventKind::Unsubscribed { .. } => "UNSUBSCRIBED",
            EventKind::Disconnected { .. } => "DISCONNECTED",
            EventKind::Error { .. } => "ERROR",
        }
    }

    /// Error kind if this is an `ERROR` event
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            EventKind::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    pub(crate) fn fault(fault: Fault) -> Self {
        EventKind::Error {
            error: fault.kind,
            detail: fault.detail,
        }
    }
}

struct Entries<P> {
    events: Vec<Event<P>>,
    last_time: Option<DateTime<Utc>>,
}

/// Append-only, time-ordered log with snapshot and push access
pub struct Journal<P> {
    entries: Mutex<Entries<P>>,
    live: broadcast::Sender<Event<P>>,
}

impl<P: Clone> Journal<P> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a journal whose live channel buffers `capacity` events per reader
    pub fn with_capacity(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: Mutex::new(Entries {
                events: Vec::new(),
                last_time: None,
            }),
            live,
        }
    }

    /// Append an event and notify live readers
    pub(crate) fn append(&self, kind: EventKind<P>) -> Event<P> {
        let mut entries = self.entries.lock();

        let now = Utc::now();
        let time = match entries.last_time {
            Some(last) if last > now => last,
            _ => now,
        };
        let event = Event {
            seq: entries.events.len() as u64,
            time,
            kind,
        };

        entries.last_time = Some(time);
        entries.events.push(event.clone());
        // Sent under the lock so subscribe_with_history never splits an event.
        let _ = self.live.send(event.clone());
        event
    }

    /// Copy of the full log
    pub fn snapshot(&self) -> Vec<Event<P>> {
        self.entries.lock().events.clone()
    }

    /// The most recent `n` events in append order
    pub fn latest(&self, n: usize) -> Vec<Event<P>> {
        let entries = self.entries.lock();
        let start = entries.events.len().saturating_sub(n);
        entries.events[start..].to_vec()
    }

    /// Events appended after sequence number `seq`
    pub fn since(&self, seq: u64) -> Vec<Event<P>> {
        let entries = self.entries.lock();
        let start = usize::try_from(seq.saturating_add(1))
            .unwrap_or(usize::MAX)
            .min(entries.events.len());
        entries.events[start..].to_vec()
    }

    /// Only the kinds, in append order
    pub fn kinds(&self) -> Vec<EventKind<P>> {
        self.entries
            .lock()
            .events
            .iter()
            .map(|event| event.kind.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every event appended from now on
    ///
    /// A reader that falls more than the channel capacity behind observes
    /// `RecvError::Lagged` and can resynchronize with [`Journal::since`].
    pub fn subscribe(&self) -> broadcast::Receiver<Event<P>> {
        self.live.subscribe()
    }

    /// Snapshot plus a receiver positioned exactly after it
    pub fn subscribe_with_history(&self) -> (Vec<Event<P>>, broadcast::Receiver<Event<P>>) {
        let entries = self.entries.lock();
        (entries.events.clone(), self.live.subscribe())
    }
}

impl<P: Clone> Default for Journal<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for Journal<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("len", &self.entries.lock().events.len())
            .finish()
    }
}
