//! Stream sources
//!
//! A source delivers the entries of a named stream strictly after a
//! cursor, in cursor order, ending when it has nothing more. Delivery is
//! at-least-once: subscribing again at the same cursor redelivers.
//!
//! - [`MemoryStreamSource`]: entries pushed in-process
//! - [`JournalStreamSource`]: one checksummed journal directory per stream,
//!   entry `event_type` is `apply` or `undo`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use venue_store::journal::{JournalConfig, JournalEntry, JournalError, JournalWriter};
use venue_store::reader::{JournalReader, ReaderError};
use venue_store::Cursor;

pub const APPLY_EVENT: &str = "apply";
pub const UNDO_EVENT: &str = "undo";

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub payload: Vec<u8>,
    /// Roll the event back instead of applying it.
    pub undo: bool,
    pub timestamp: DateTime<Utc>,
    pub cursor: Cursor,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Journal read error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Journal write error: {0}")]
    Journal(#[from] JournalError),

    #[error("Entry {cursor} has unknown event type {event_type}")]
    UnknownEntryType { cursor: Cursor, event_type: String },

    #[error("Source task failed: {0}")]
    Task(String),
}

pub type EntryStream = BoxStream<'static, Result<StreamEntry, SourceError>>;

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Entries of `stream` with a cursor strictly greater than `from`.
    async fn subscribe(&self, stream: &str, from: Cursor) -> Result<EntryStream, SourceError>;
}

// ── In-memory ───────────────────────────────────────────────────────

/// Append-only per-stream entry lists; cursors are 1-based positions.
#[derive(Clone, Default)]
pub struct MemoryStreamSource {
    streams: Arc<Mutex<BTreeMap<String, Vec<StreamEntry>>>>,
}

impl MemoryStreamSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry stamped now and return its cursor.
    pub fn push(&self, stream: &str, payload: Vec<u8>, undo: bool) -> Cursor {
        self.push_at(stream, payload, undo, Utc::now())
    }

    pub fn push_at(
        &self,
        stream: &str,
        payload: Vec<u8>,
        undo: bool,
        timestamp: DateTime<Utc>,
    ) -> Cursor {
        let mut streams = self.streams.lock();
        let entries = streams.entry(stream.to_string()).or_default();
        let cursor = Cursor(entries.len() as u64 + 1);
        entries.push(StreamEntry {
            payload,
            undo,
            timestamp,
            cursor,
        });
        cursor
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams.lock().get(stream).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }
}

#[async_trait]
impl StreamSource for MemoryStreamSource {
    async fn subscribe(&self, stream: &str, from: Cursor) -> Result<EntryStream, SourceError> {
        let entries: Vec<StreamEntry> = self
            .streams
            .lock()
            .get(stream)
            .map(|entries| entries.iter().filter(|e| e.cursor > from).cloned().collect())
            .unwrap_or_default();
        debug!(stream, from = %from, entries = entries.len(), "Memory subscription");
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }
}

// ── Journal-backed ──────────────────────────────────────────────────

fn entry_from_journal(entry: JournalEntry) -> Result<StreamEntry, SourceError> {
    let cursor = Cursor(entry.sequence);
    let undo = match entry.event_type.as_str() {
        APPLY_EVENT => false,
        UNDO_EVENT => true,
        _ => {
            return Err(SourceError::UnknownEntryType {
                cursor,
                event_type: entry.event_type,
            })
        }
    };
    Ok(StreamEntry {
        payload: entry.payload,
        undo,
        timestamp: DateTime::from_timestamp_nanos(entry.timestamp),
        cursor,
    })
}

/// Reads `<root>/<stream>/journal-*.bin`.
#[derive(Debug, Clone)]
pub struct JournalStreamSource {
    root: PathBuf,
}

impl JournalStreamSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn stream_dir(&self, stream: &str) -> PathBuf {
        self.root.join(stream)
    }
}

#[async_trait]
impl StreamSource for JournalStreamSource {
    async fn subscribe(&self, stream: &str, from: Cursor) -> Result<EntryStream, SourceError> {
        let dir = self.stream_dir(stream);
        let reader = tokio::task::spawn_blocking(move || -> Result<JournalReader, ReaderError> {
            let mut reader = JournalReader::open(&dir)?;
            reader.seek_to_sequence(from.0 + 1)?;
            Ok(reader)
        })
        .await
        .map_err(|e| SourceError::Task(e.to_string()))??;
        info!(stream, from = %from, "Journal subscription");

        // Each read runs on the blocking pool; the reader travels with it.
        let entries = stream::unfold(Some(reader), |state| async move {
            let mut reader = state?;
            let read = tokio::task::spawn_blocking(move || {
                let next = reader.next_entry();
                (reader, next)
            })
            .await;
            match read {
                Ok((reader, Ok(Some(entry)))) => Some((entry_from_journal(entry), Some(reader))),
                Ok((_, Ok(None))) => None,
                Ok((_, Err(e))) => Some((Err(SourceError::Reader(e)), None)),
                Err(e) => Some((Err(SourceError::Task(e.to_string())), None)),
            }
        });
        Ok(entries.boxed())
    }
}

/// Appends `apply`/`undo` entries to one stream directory.
pub struct JournalStreamWriter {
    writer: JournalWriter,
}

impl JournalStreamWriter {
    pub fn open(root: &Path, stream: &str) -> Result<Self, SourceError> {
        let dir = root.join(stream);
        let last = JournalReader::open(&dir)?.read_all()?.last().map(|e| e.sequence);
        let mut writer = JournalWriter::open(JournalConfig::new(&dir))?;
        writer.repair_tail()?;
        writer.set_next_sequence(last.unwrap_or(0) + 1);
        Ok(Self { writer })
    }

    pub fn append(
        &mut self,
        timestamp: DateTime<Utc>,
        payload: Vec<u8>,
        undo: bool,
    ) -> Result<Cursor, SourceError> {
        let event_type = if undo { UNDO_EVENT } else { APPLY_EVENT };
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or(0);
        let entry = self.writer.write_event(nanos, event_type, payload)?;
        Ok(Cursor(entry.sequence))
    }

    pub fn sync(&mut self) -> Result<(), SourceError> {
        self.writer.sync()?;
        Ok(())
    }
}
