//! Durable store
//!
//! Memory tables backed by a write-ahead journal.
//!
//! Every commit is appended to the journal as one `commit` entry before
//! its writes become visible; every `snapshot_every` commits the full table
//! set is written as a snapshot and journal files it covers are removed.
//! Opening the store replays snapshot + journal through
//! [`RecoveryEngine`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::journal::{FsyncPolicy, JournalConfig, JournalWriter};
use crate::memory::{ChangeSet, CommitLog, MemoryStore, MemoryTransaction, Tables};
use crate::recovery::{ChangeSetApplier, RecoveryEngine, RecoveryMetrics, COMMIT_EVENT};
use crate::snapshot::{
    Snapshot, SnapshotCleanupPolicy, SnapshotIntervalPolicy, SnapshotWriter, StoreState,
};
use crate::store::RelationalStore;

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DurableConfig {
    pub dir: PathBuf,
    /// Snapshot every N commits (0 = never).
    pub snapshot_every: u64,
    pub compress_snapshots: bool,
    /// Snapshots retained after cleanup.
    pub keep_snapshots: usize,
    pub fsync_policy: FsyncPolicy,
}

impl DurableConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            snapshot_every: 1_000,
            compress_snapshots: true,
            keep_snapshots: 2,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.dir.join("journal")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

// ── Journal-backed commit log ───────────────────────────────────────

struct JournalLog {
    writer: Mutex<JournalWriter>,
    policy: Mutex<SnapshotIntervalPolicy>,
    snapshots: SnapshotWriter,
    snapshot_dir: PathBuf,
    cleanup: SnapshotCleanupPolicy,
    compress: bool,
}

impl JournalLog {
    fn last_sequence(&self) -> u64 {
        self.writer.lock().next_sequence().saturating_sub(1)
    }
}

impl CommitLog for JournalLog {
    fn record(&self, changes: &ChangeSet) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(changes)
            .map_err(|e| StoreError::serialization("journal", COMMIT_EVENT, e))?;
        let entry = self
            .writer
            .lock()
            .write_event(unix_nanos(), COMMIT_EVENT, payload)?;
        debug!(sequence = entry.sequence, changes = changes.len(), "Commit journaled");
        Ok(())
    }

    fn snapshot_due(&self) -> Option<u64> {
        let sequence = self.last_sequence();
        let mut policy = self.policy.lock();
        if !policy.should_snapshot(sequence) {
            return None;
        }
        policy.record_snapshot(sequence);
        Some(sequence)
    }

    fn snapshot(&self, tables: &Tables, sequence: u64) -> Result<(), StoreError> {
        let snapshot = Snapshot::new(
            sequence,
            unix_nanos(),
            StoreState::from_tables(tables.clone()),
            self.compress,
        )?;
        let path = self.snapshots.write(&snapshot)?;

        let truncated = {
            let mut writer = self.writer.lock();
            writer.rotate()?;
            writer.truncate_through(sequence)?
        };
        let removed = self.cleanup.cleanup(&self.snapshot_dir)?;
        let mut policy = self.policy.lock();
        if sequence > policy.last_snapshot_seq {
            policy.record_snapshot(sequence);
        }
        drop(policy);

        info!(
            sequence,
            path = %path.display(),
            journal_files_removed = truncated.len(),
            snapshots_removed = removed.len(),
            "Snapshot written"
        );
        Ok(())
    }
}

// ── Durable Store ───────────────────────────────────────────────────

/// [`RelationalStore`] whose committed state survives restarts.
#[derive(Clone)]
pub struct DurableStore {
    memory: MemoryStore,
    log: Arc<JournalLog>,
    recovery: RecoveryMetrics,
}

impl DurableStore {
    /// Open (or create) a store in `dir` with default settings.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(DurableConfig::new(dir.as_ref()))
    }

    pub fn open_with(config: DurableConfig) -> Result<Self, StoreError> {
        let journal_dir = config.journal_dir();
        let snapshot_dir = config.snapshot_dir();

        let mut engine = RecoveryEngine::new(&snapshot_dir, &journal_dir);
        let (state, recovery) = engine.recover(&ChangeSetApplier, None)?;

        let mut writer = JournalWriter::open(JournalConfig {
            fsync_policy: config.fsync_policy,
            ..JournalConfig::new(&journal_dir)
        })?;
        let repaired = writer.repair_tail()?;
        if repaired > 0 {
            warn!(bytes = repaired, "Truncated torn journal tail");
        }
        writer.set_next_sequence(recovery.final_sequence + 1);

        let mut policy = SnapshotIntervalPolicy::with_interval(config.snapshot_every);
        policy.record_snapshot(recovery.final_sequence);

        let log = Arc::new(JournalLog {
            writer: Mutex::new(writer),
            policy: Mutex::new(policy),
            snapshots: SnapshotWriter::new(&snapshot_dir, config.compress_snapshots),
            snapshot_dir,
            cleanup: SnapshotCleanupPolicy::new(config.keep_snapshots.max(1)),
            compress: config.compress_snapshots,
        });

        info!(
            dir = %config.dir.display(),
            rows = state.row_count(),
            sequence = recovery.final_sequence,
            "Durable store opened"
        );

        let commit_log: Arc<dyn CommitLog> = log.clone();
        Ok(Self {
            memory: MemoryStore::with_tables(state.tables, Some(commit_log)),
            log,
            recovery,
        })
    }

    /// Committed tables, for inspection.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn recovery_metrics(&self) -> &RecoveryMetrics {
        &self.recovery
    }

    /// Sequence of the last journaled commit.
    pub fn last_sequence(&self) -> u64 {
        self.log.last_sequence()
    }

    /// Write a snapshot of the current committed state now.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let (tables, sequence) = self
            .memory
            .quiesced(|tables| (tables.clone(), self.log.last_sequence()));
        self.log.snapshot(&tables, sequence)
    }

    /// Flush and fsync the journal.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.log.writer.lock().sync()?;
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for DurableStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        self.memory.begin().await
    }
}

// ── Tests ───────────────────────────────────────────────────────────
