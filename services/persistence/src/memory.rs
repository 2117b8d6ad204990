//! In-memory transactional store
//!
//! Committed rows live in `BTreeMap` tables behind a lock. A transaction
//! keeps a private write-set; reads consult the write-set first and fall
//! back to the committed tables. Readers see either none or all of a
//! transaction's writes.
//!
//! Concurrency is optimistic. A transaction remembers the committed value
//! of every row it read or wrote, and `commit` rejects it with the
//! transient [`StoreError::Conflict`] when any of those rows changed since.
//! Commits are serialized by a commit lock; the table lock is only held to
//! validate and to apply, never across journal I/O or snapshots.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::store::{RelationalStore, Row, Transaction};

pub type Table = BTreeMap<String, Row>;
pub type Tables = BTreeMap<String, Table>;

// ── Change sets ─────────────────────────────────────────────────────

/// One row-level write: `row == None` is a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub table: String,
    pub key: String,
    pub row: Option<Row>,
}

/// Everything one transaction wrote, in key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Apply onto a table set.
    pub fn apply_to(&self, tables: &mut Tables) {
        for change in &self.changes {
            match &change.row {
                Some(row) => {
                    tables
                        .entry(change.table.clone())
                        .or_default()
                        .insert(change.key.clone(), row.clone());
                }
                None => {
                    if let Some(table) = tables.get_mut(&change.table) {
                        table.remove(&change.key);
                        if table.is_empty() {
                            tables.remove(&change.table);
                        }
                    }
                }
            }
        }
    }
}

/// Durability hook run by `commit`.
///
/// `record` runs with commits serialized but the tables unlocked, before
/// the change set becomes visible; an error aborts the commit. Once the
/// writes are visible and every lock is released, a sequence returned by
/// `snapshot_due` is handed to `snapshot` with a copy of the tables taken
/// at that point.
pub trait CommitLog: Send + Sync {
    fn record(&self, changes: &ChangeSet) -> Result<(), StoreError>;

    /// Claim a snapshot at the current sequence, if one is due.
    fn snapshot_due(&self) -> Option<u64> {
        None
    }

    fn snapshot(&self, _tables: &Tables, _sequence: u64) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Memory Store ────────────────────────────────────────────────────

struct Shared {
    tables: RwLock<Tables>,
    commit_lock: Mutex<()>,
    log: Option<Arc<dyn CommitLog>>,
    fail_commits: AtomicU32,
    commits: AtomicU64,
}

/// In-memory implementation of [`RelationalStore`]. Cheap to clone; clones share tables.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_tables(Tables::new(), None)
    }

    pub(crate) fn with_tables(tables: Tables, log: Option<Arc<dyn CommitLog>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(tables),
                commit_lock: Mutex::new(()),
                log,
                fail_commits: AtomicU32::new(0),
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Make the next `n` commits fail with a transient `Unavailable` error.
    pub fn fail_next_commits(&self, n: u32) {
        self.shared.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Copy of every committed table.
    pub fn dump(&self) -> Tables {
        self.shared.tables.read().clone()
    }

    /// Number of committed rows in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.shared
            .tables
            .read()
            .get(table)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Committed row lookup outside of any transaction.
    pub fn row(&self, table: &str, key: &str) -> Option<Row> {
        self.shared
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
    }

    /// Run `f` on the committed tables with no commit in flight.
    pub(crate) fn quiesced<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let _serial = self.shared.commit_lock.lock();
        f(&self.shared.tables.read())
    }

    /// Number of successful commits since the store was created.
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.shared
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            store: self.clone(),
            writes: BTreeMap::new(),
            observed: BTreeMap::new(),
            closed: false,
        })
    }
}

// ── Memory Transaction ──────────────────────────────────────────────

type RowKey = (String, String);

pub struct MemoryTransaction {
    store: MemoryStore,
    writes: BTreeMap<RowKey, Option<Row>>,
    /// Committed value of each touched row, as of its first read or write.
    observed: BTreeMap<RowKey, Option<Row>>,
    closed: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }

    /// Number of pending row writes.
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    fn observe(&mut self, key: &RowKey) -> Option<Row> {
        let committed = self.store.row(&key.0, &key.1);
        self.observed
            .entry(key.clone())
            .or_insert_with(|| committed.clone());
        committed
    }

    /// First touched row whose committed value moved since it was observed.
    fn conflict(&self, tables: &Tables) -> Option<&RowKey> {
        self.observed.iter().find_map(|(key, seen)| {
            let current = tables.get(&key.0).and_then(|t| t.get(&key.1));
            (current != seen.as_ref()).then_some(key)
        })
    }

    fn change_set(&mut self) -> ChangeSet {
        let writes = std::mem::take(&mut self.writes);
        ChangeSet {
            changes: writes
                .into_iter()
                .map(|((table, key), row)| Change { table, key, row })
                .collect(),
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, table: &str, key: &str) -> Result<Option<Row>, StoreError> {
        self.ensure_open()?;
        let key = (table.to_string(), key.to_string());
        if let Some(pending) = self.writes.get(&key) {
            return Ok(pending.clone());
        }
        Ok(self.observe(&key))
    }

    async fn upsert(&mut self, table: &str, key: &str, row: Row) -> Result<(), StoreError> {
        self.ensure_open()?;
        let key = (table.to_string(), key.to_string());
        if !self.observed.contains_key(&key) {
            self.observe(&key);
        }
        self.writes.insert(key, Some(row));
        Ok(())
    }

    async fn delete(&mut self, table: &str, key: &str) -> Result<bool, StoreError> {
        let existed = self.get(table, key).await?.is_some();
        self.writes.insert((table.to_string(), key.to_string()), None);
        Ok(existed)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.closed = true;

        if self.store.take_injected_failure() {
            warn!(pending = self.writes.len(), "Injected commit failure");
            self.writes.clear();
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }

        let store = self.store.clone();
        let shared = &store.shared;
        let serial = shared.commit_lock.lock();

        if let Some((table, key)) = self.conflict(&shared.tables.read()) {
            debug!(table = %table, key = %key, "Commit rejected, row changed underneath");
            let err = StoreError::Conflict {
                table: table.clone(),
                key: key.clone(),
            };
            self.writes.clear();
            return Err(err);
        }

        let changes = self.change_set();
        if let Some(log) = &shared.log {
            log.record(&changes)?;
        }

        let mut tables = shared.tables.write();
        changes.apply_to(&mut tables);
        shared.commits.fetch_add(1, Ordering::SeqCst);
        let tables = RwLockWriteGuard::downgrade(tables);
        let snapshot = shared
            .log
            .as_ref()
            .and_then(|log| log.snapshot_due())
            .map(|sequence| (sequence, tables.clone()));
        drop(tables);
        drop(serial);
        debug!(changes = changes.len(), "Transaction committed");

        // Writes are already visible; a snapshot failure is only logged.
        if let (Some(log), Some((sequence, tables))) = (&shared.log, snapshot) {
            if let Err(e) = log.snapshot(&tables, sequence) {
                error!(sequence, error = %e, "Snapshot after commit failed");
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
