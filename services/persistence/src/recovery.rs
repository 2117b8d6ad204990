//! Recovery Flow
//!
//! Boot from snapshot + journal replay.
//!
//! 1. Load the newest snapshot, if any.
//! 2. Seek the journal past `snapshot.sequence`.
//! 3. Replay every later entry in sequence order.
//! 4. Optionally compare the final state hash with an expected value.
//!
//! A gap in sequences or a damaged entry aborts recovery. Only a torn
//! final entry (see [`crate::reader`]) is tolerated.

use crate::journal::JournalEntry;
use crate::memory::ChangeSet;
use crate::reader::{JournalReader, ReaderError};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotLoader, SnapshotWriter, StoreState};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Journal event type for one committed transaction.
pub const COMMIT_EVENT: &str = "commit";

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("State hash divergence: expected {expected}, got {actual} at sequence {sequence}")]
    HashDivergence {
        expected: String,
        actual: String,
        sequence: u64,
    },

    #[error("Journal gap after snapshot: expected sequence {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("Cannot apply entry {sequence}: {detail}")]
    Apply { sequence: u64, detail: String },
}

// ── Recovery Metrics ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    pub snapshot_load_time_ms: u64,
    /// 0 when no snapshot was found.
    pub snapshot_sequence: u64,
    pub replay_count: u64,
    pub replay_time_ms: u64,
    pub total_recovery_time_ms: u64,
    pub final_state_hash: String,
    pub final_sequence: u64,
    /// Torn entries dropped from the journal tail.
    pub dropped_tail_entries: usize,
    pub success: bool,
}

// ── Recovery Log ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecoveryLogEntry {
    pub stage: RecoveryStage,
    pub message: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStage {
    Start,
    SnapshotSearch,
    SnapshotLoad,
    JournalOpen,
    JournalSeek,
    Replay,
    Validation,
    Complete,
    Error,
}

// ── Event Applier ───────────────────────────────────────────────────

/// How a journal entry transforms recovered state.
pub trait EventApplier {
    fn apply(&self, state: &mut StoreState, entry: &JournalEntry) -> Result<(), String>;
}

/// Replays `commit` entries carrying a JSON [`ChangeSet`].
pub struct ChangeSetApplier;

impl EventApplier for ChangeSetApplier {
    fn apply(&self, state: &mut StoreState, entry: &JournalEntry) -> Result<(), String> {
        if entry.event_type != COMMIT_EVENT {
            return Err(format!("unexpected event type {:?}", entry.event_type));
        }
        let changes: ChangeSet =
            serde_json::from_slice(&entry.payload).map_err(|e| e.to_string())?;
        changes.apply_to(&mut state.tables);
        Ok(())
    }
}

// ── Recovery Engine ─────────────────────────────────────────────────

pub struct RecoveryEngine {
    snapshot_dir: PathBuf,
    journal_dir: PathBuf,
    log: Vec<RecoveryLogEntry>,
}

impl RecoveryEngine {
    pub fn new(snapshot_dir: impl Into<PathBuf>, journal_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
            journal_dir: journal_dir.into(),
            log: Vec::new(),
        }
    }

    /// Snapshot load + journal replay, with optional final-hash validation.
    pub fn recover(
        &mut self,
        applier: &dyn EventApplier,
        expected_hash: Option<&str>,
    ) -> Result<(StoreState, RecoveryMetrics), RecoveryError> {
        let total_start = Instant::now();
        let mut metrics = RecoveryMetrics::default();

        self.log_stage(RecoveryStage::Start, "Recovery started", 0);

        let (mut state, snapshot_seq) = self.load_snapshot(&mut metrics)?;

        self.log_stage(RecoveryStage::JournalOpen, "Opening journal", 0);
        let mut reader = JournalReader::open(&self.journal_dir)?;
        if snapshot_seq > 0 {
            let skipped = reader.seek_to_sequence(snapshot_seq + 1)?;
            self.log_stage(
                RecoveryStage::JournalSeek,
                &format!("Skipped {} entries covered by snapshot", skipped),
                0,
            );
        }

        let replay_start = Instant::now();
        self.log_stage(RecoveryStage::Replay, "Starting journal replay", 0);

        let mut last_seq = snapshot_seq;
        loop {
            let entry = match reader.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    self.log_stage(
                        RecoveryStage::Error,
                        &format!("Replay error: {}", e),
                        replay_start.elapsed().as_millis() as u64,
                    );
                    return Err(RecoveryError::Reader(e));
                }
            };
            // The first entry of a fresh journal may start anywhere after the snapshot.
            let contiguous = entry.sequence == last_seq + 1
                || (metrics.replay_count == 0 && snapshot_seq == 0);
            if !contiguous {
                self.log_stage(
                    RecoveryStage::Error,
                    &format!("Gap: expected {}, got {}", last_seq + 1, entry.sequence),
                    0,
                );
                return Err(RecoveryError::Gap {
                    expected: last_seq + 1,
                    got: entry.sequence,
                });
            }
            applier
                .apply(&mut state, &entry)
                .map_err(|detail| RecoveryError::Apply {
                    sequence: entry.sequence,
                    detail,
                })?;
            last_seq = entry.sequence;
            metrics.replay_count += 1;
        }

        metrics.dropped_tail_entries = reader.corruption_log().len();
        if metrics.dropped_tail_entries > 0 {
            warn!(
                dropped = metrics.dropped_tail_entries,
                last_sequence = last_seq,
                "Dropped torn journal tail"
            );
        }

        metrics.replay_time_ms = replay_start.elapsed().as_millis() as u64;
        metrics.final_sequence = last_seq;
        self.log_stage(
            RecoveryStage::Replay,
            &format!(
                "Replayed {} entries in {}ms",
                metrics.replay_count, metrics.replay_time_ms
            ),
            metrics.replay_time_ms,
        );

        let final_hash = state.compute_hash()?;
        metrics.final_state_hash = final_hash.clone();

        if let Some(expected) = expected_hash {
            self.log_stage(RecoveryStage::Validation, "Validating state hash", 0);
            if final_hash != expected {
                self.log_stage(
                    RecoveryStage::Error,
                    &format!("Hash divergence: expected={}, actual={}", expected, final_hash),
                    0,
                );
                return Err(RecoveryError::HashDivergence {
                    expected: expected.to_string(),
                    actual: final_hash,
                    sequence: last_seq,
                });
            }
        }

        metrics.total_recovery_time_ms = total_start.elapsed().as_millis() as u64;
        metrics.success = true;

        self.log_stage(
            RecoveryStage::Complete,
            &format!(
                "Recovery complete: {} entries in {}ms, final seq={}",
                metrics.replay_count, metrics.total_recovery_time_ms, last_seq
            ),
            metrics.total_recovery_time_ms,
        );
        info!(
            snapshot_sequence = metrics.snapshot_sequence,
            replayed = metrics.replay_count,
            final_sequence = last_seq,
            rows = state.row_count(),
            "Store recovered"
        );

        Ok((state, metrics))
    }

    pub fn take_snapshot(
        &self,
        state: &StoreState,
        sequence: u64,
        timestamp: i64,
        compress: bool,
    ) -> Result<PathBuf, RecoveryError> {
        let writer = SnapshotWriter::new(&self.snapshot_dir, compress);
        let snapshot = Snapshot::new(sequence, timestamp, state.clone(), compress)?;
        Ok(writer.write(&snapshot)?)
    }

    pub fn log(&self) -> &[RecoveryLogEntry] {
        &self.log
    }

    // ── Internal ────────────────────────────────────────────────────

    fn load_snapshot(
        &mut self,
        metrics: &mut RecoveryMetrics,
    ) -> Result<(StoreState, u64), RecoveryError> {
        self.log_stage(RecoveryStage::SnapshotSearch, "Searching for snapshots", 0);
        let loader = SnapshotLoader::new(&self.snapshot_dir);

        let start = Instant::now();
        match loader.load_latest() {
            Ok(snapshot) => {
                metrics.snapshot_load_time_ms = start.elapsed().as_millis() as u64;
                metrics.snapshot_sequence = snapshot.sequence;
                self.log_stage(
                    RecoveryStage::SnapshotLoad,
                    &format!(
                        "Snapshot loaded: seq={}, rows={}",
                        snapshot.sequence,
                        snapshot.state.row_count()
                    ),
                    metrics.snapshot_load_time_ms,
                );
                Ok((snapshot.state, snapshot.sequence))
            }
            Err(SnapshotError::NoSnapshots) => {
                self.log_stage(
                    RecoveryStage::SnapshotSearch,
                    "No snapshots found, starting from empty state",
                    0,
                );
                Ok((StoreState::empty(), 0))
            }
            Err(e) => Err(RecoveryError::Snapshot(e)),
        }
    }

    fn log_stage(&mut self, stage: RecoveryStage, message: &str, elapsed_ms: u64) {
        self.log.push(RecoveryLogEntry {
            stage,
            message: message.to_string(),
            elapsed_ms,
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────
