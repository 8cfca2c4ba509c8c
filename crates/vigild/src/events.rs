//! Detection event log (SQLite) and the bounded queue that keeps its
//! writes off the frame loop.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use vigil_core::{DetectionEvent, EventSink, SinkError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A row of the `logs` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedEvent {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub snapshot: Option<String>,
    pub timestamp: String,
}

/// Append-only SQLite event log.
pub struct EventLog {
    conn: Connection,
}

impl EventLog {
    /// Open (creating if needed) the log database and its `logs` table.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }
        let conn = Connection::open(path).map_err(storage)?;
        Self::init(conn)
    }

    /// Open an existing log for reading. Nothing is created; a missing
    /// database is an error.
    pub fn open_read_only(path: &Path) -> Result<Self, SinkError> {
        if !path.is_file() {
            return Err(SinkError::Storage(format!("no event log at {}", path.display())));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(storage)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory().map_err(storage)?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logs(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                status TEXT,
                snapshot TEXT,
                timestamp TEXT
            )",
        )
        .map_err(storage)?;
        Ok(Self { conn })
    }

    /// Insert one event and return its row id.
    pub fn insert(&self, event: &DetectionEvent) -> Result<i64, SinkError> {
        let snapshot = event.snapshot.as_ref().map(|p| p.to_string_lossy().into_owned());
        self.conn
            .execute(
                "INSERT INTO logs (name, status, snapshot, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    event.name,
                    event.status.as_str(),
                    snapshot,
                    event.timestamp.format(TIMESTAMP_FORMAT).to_string()
                ],
            )
            .map_err(storage)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent events first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LoggedEvent>, SinkError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, status, snapshot, timestamp FROM logs
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(storage)?;
        let rows = stmt
            .query_map(params![limit as i64], logged_event)
            .map_err(storage)?;
        let events = rows.collect::<Result<Vec<_>, _>>().map_err(storage)?;
        Ok(events)
    }

    /// A single row by id.
    pub fn get(&self, id: i64) -> Result<Option<LoggedEvent>, SinkError> {
        self.conn
            .query_row(
                "SELECT id, name, status, snapshot, timestamp FROM logs WHERE id = ?1",
                params![id],
                logged_event,
            )
            .optional()
            .map_err(storage)
    }
}

fn logged_event(row: &Row<'_>) -> rusqlite::Result<LoggedEvent> {
    Ok(LoggedEvent {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        snapshot: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

impl EventSink for EventLog {
    fn record(&self, event: &DetectionEvent) -> Result<(), SinkError> {
        self.insert(event).map(|_| ())
    }
}

fn storage(e: impl std::fmt::Display) -> SinkError {
    SinkError::Storage(e.to_string())
}

/// Event sink that hands events to a writer thread over a bounded queue.
///
/// A full queue drops the event rather than blocking the caller.
pub struct QueuedEventSink {
    tx: mpsc::Sender<DetectionEvent>,
}

impl QueuedEventSink {
    /// Start the writer thread. It exits once every sender is dropped and
    /// the queue is drained.
    pub fn spawn<S>(sink: S, capacity: usize) -> std::io::Result<(Self, JoinHandle<()>)>
    where
        S: EventSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<DetectionEvent>(capacity);
        let writer = std::thread::Builder::new()
            .name("vigil-events".into())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    if let Err(e) = sink.record(&event) {
                        tracing::warn!(error = %e, name = %event.name, "event log write failed");
                    }
                }
                tracing::debug!("event writer exiting");
            })?;
        Ok((Self { tx }, writer))
    }
}

impl EventSink for QueuedEventSink {
    fn record(&self, event: &DetectionEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::QueueFull,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
