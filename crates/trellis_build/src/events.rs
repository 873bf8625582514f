//! Append-only event log.
//!
//! Every record gets a sequence number one higher than the previous one.
//! Subscribers hold their own cursor into the log and are woken through a
//! [`Notify`] when new records arrive, so a slow subscriber never blocks
//! the build. Past `capacity` the oldest records are dropped; a subscriber
//! that falls that far behind skips ahead.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use trellis_diagnostics::{Diagnostic, Severity};

/// Default number of records retained.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Category of an event, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Compile diagnostics and build messages.
    Log,
    /// Pass progress.
    Progress,
    /// Server state transitions.
    State,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Log => write!(f, "log"),
            EventKind::Progress => write!(f, "progress"),
            EventKind::State => write!(f, "state"),
        }
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(EventKind::Log),
            "progress" => Ok(EventKind::Progress),
            "state" => Ok(EventKind::State),
            other => Err(format!("unknown event kind `{other}` (expected log, progress or state)")),
        }
    }
}

/// Event content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// A message, usually a compile diagnostic.
    Log {
        /// Severity of the message.
        severity: Severity,
        /// The message text.
        message: String,
        /// Rendered `file:line:col`, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    /// A pass phase and how far it has come.
    Progress {
        /// Phase name, such as `scan` or `compile`.
        phase: String,
        /// Units finished.
        done: usize,
        /// Units in the phase.
        total: usize,
    },
    /// A server state transition.
    State {
        /// The new state.
        state: String,
    },
}

impl EventPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Log { .. } => EventKind::Log,
            EventPayload::Progress { .. } => EventKind::Progress,
            EventPayload::State { .. } => EventKind::State,
        }
    }

    /// A log payload describing `diag`.
    pub fn from_diagnostic(diag: &Diagnostic) -> Self {
        EventPayload::Log {
            severity: diag.severity,
            message: diag.message.clone(),
            location: diag.location.as_ref().map(ToString::to_string),
        }
    }

    /// A log payload with no location.
    pub fn log(severity: Severity, message: impl Into<String>) -> Self {
        EventPayload::Log {
            severity,
            message: message.into(),
            location: None,
        }
    }
}

impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::Log {
                severity,
                message,
                location: Some(loc),
            } => write!(f, "{loc}: {severity}: {message}"),
            EventPayload::Log {
                severity, message, ..
            } => write!(f, "{severity}: {message}"),
            EventPayload::Progress { phase, done, total } => write!(f, "{phase} {done}/{total}"),
            EventPayload::State { state } => write!(f, "{state}"),
        }
    }
}

/// One entry in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Position in the log, starting at 1.
    pub seq: u64,
    /// Category of the payload.
    pub kind: EventKind,
    /// Wall-clock time of publication.
    pub timestamp_ms: u64,
    /// The event content.
    pub payload: EventPayload,
}

struct Records {
    entries: VecDeque<EventRecord>,
    next_seq: u64,
    closed: bool,
}

/// Shared append-only log of build events.
pub struct EventLog {
    records: Mutex<Records>,
    notify: Notify,
    capacity: usize,
}

impl EventLog {
    /// Creates a log retaining at most `capacity` records.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Records {
                entries: VecDeque::new(),
                next_seq: 1,
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        })
    }

    /// Appends a record and wakes subscribers. Returns its sequence number.
    pub fn publish(&self, payload: EventPayload) -> u64 {
        let seq = {
            let mut records = self.lock();
            let seq = records.next_seq;
            records.next_seq += 1;
            records.entries.push_back(EventRecord {
                seq,
                kind: payload.kind(),
                timestamp_ms: now_ms(),
                payload,
            });
            while records.entries.len() > self.capacity {
                records.entries.pop_front();
            }
            seq
        };
        self.notify.notify_waiters();
        seq
    }

    /// Sequence number the next record will get.
    pub fn next_seq(&self) -> u64 {
        self.lock().next_seq
    }

    /// Number of records currently retained.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if no records are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to records published from now on.
    pub fn subscribe(self: &Arc<Self>, kind: Option<EventKind>) -> Subscriber {
        let cursor = self.next_seq();
        self.subscribe_from(cursor, kind)
    }

    /// Subscribes starting at `seq`, replaying retained records from there.
    pub fn subscribe_from(self: &Arc<Self>, seq: u64, kind: Option<EventKind>) -> Subscriber {
        Subscriber {
            log: Arc::clone(self),
            cursor: seq,
            kind,
        }
    }

    /// Marks the log closed. Waiting subscribers drain what is left and then
    /// receive `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A cursor into an [`EventLog`], optionally filtered by kind.
pub struct Subscriber {
    log: Arc<EventLog>,
    cursor: u64,
    kind: Option<EventKind>,
}

impl Subscriber {
    /// Returns every matching record past the cursor without waiting.
    pub fn drain(&mut self) -> Vec<EventRecord> {
        let records = self.log.lock();
        let matching: Vec<EventRecord> = records
            .entries
            .iter()
            .filter(|r| r.seq >= self.cursor)
            .filter(|r| self.kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        self.cursor = records.next_seq;
        matching
    }

    /// Waits for the next matching record. `None` once the log is closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            let notified = self.log.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let records = self.log.lock();
                let next = records
                    .entries
                    .iter()
                    .filter(|r| r.seq >= self.cursor)
                    .find(|r| self.kind.map_or(true, |k| r.kind == k))
                    .cloned();
                match next {
                    Some(record) => {
                        self.cursor = record.seq + 1;
                        return Some(record);
                    }
                    None => {
                        self.cursor = records.next_seq;
                        if records.closed {
                            return None;
                        }
                    }
                }
            }
            notified.await;
        }
    }

    /// Sequence number of the next record this subscriber will look at.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
