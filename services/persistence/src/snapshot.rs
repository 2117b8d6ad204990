//! Snapshot System
//!
//! Full store images with integrity and compression.
//!
//! A snapshot is every committed table at one journal sequence. Tables are
//! `BTreeMap`s so the JSON encoding, and therefore the SHA-256 checksum, is
//! deterministic. Files are written to a temp path, fsynced and renamed
//! into place; optional zstd compression is chosen per writer.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::memory::Tables;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("No snapshots found")]
    NoSnapshots,
}

// ── Store State ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub tables: Tables,
}

impl StoreState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Tables) -> Self {
        Self { tables }
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(|t| t.len()).sum()
    }

    /// Deterministic SHA-256 over the JSON encoding of all tables.
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let bytes = serde_json::to_vec(&self.tables)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ── Snapshot ────────────────────────────────────────────────────────

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Sequence of the last journal entry included.
    pub sequence: u64,
    /// Unix nanoseconds.
    pub timestamp: i64,
    pub state: StoreState,
    pub checksum: String,
    pub compressed: bool,
}

impl Snapshot {
    pub fn new(
        sequence: u64,
        timestamp: i64,
        state: StoreState,
        compressed: bool,
    ) -> Result<Self, SnapshotError> {
        let checksum = state.compute_hash()?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            timestamp,
            state,
            checksum,
            compressed,
        })
    }

    pub fn verify_integrity(&self) -> Result<(), SnapshotError> {
        let actual = self.state.compute_hash()?;
        if actual != self.checksum {
            return Err(SnapshotError::IntegrityFailure {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

// ── Snapshot Writer ─────────────────────────────────────────────────

pub struct SnapshotWriter {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Self {
        Self {
            dir: dir.into(),
            compress,
        }
    }

    /// Serialize, optionally compress, and atomically place the snapshot file.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;

        let data = serde_json::to_vec(snapshot)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let (final_data, ext) = if self.compress {
            let compressed = zstd::encode_all(data.as_slice(), 3)
                .map_err(|e| SnapshotError::Compression(e.to_string()))?;
            (compressed, "snap.zst")
        } else {
            (data, "snap")
        };

        let filename = format!("snapshot-{:012}.{}", snapshot.sequence, ext);
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!("{}.tmp", filename));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&final_data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        Ok(path)
    }
}

// ── Snapshot Loader ─────────────────────────────────────────────────

pub struct SnapshotLoader {
    dir: PathBuf,
}

impl SnapshotLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load and verify one snapshot file.
    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let data = fs::read(path)?;

        let is_compressed = path.extension().map(|e| e == "zst").unwrap_or(false);
        let decompressed = if is_compressed {
            zstd::decode_all(data.as_slice())
                .map_err(|e| SnapshotError::Compression(e.to_string()))?
        } else {
            data
        };

        let snapshot: Snapshot = serde_json::from_slice(&decompressed)
            .map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        snapshot.verify_integrity()?;

        Ok(snapshot)
    }

    /// Load the snapshot with the highest sequence.
    pub fn load_latest(&self) -> Result<Snapshot, SnapshotError> {
        let path = self.find_latest()?;
        self.load(&path)
    }

    pub fn find_latest(&self) -> Result<PathBuf, SnapshotError> {
        self.list_snapshots()?
            .into_iter()
            .last()
            .map(|(_, path)| path)
            .ok_or(SnapshotError::NoSnapshots)
    }

    /// All snapshots as `(sequence, path)`, ascending.
    pub fn list_snapshots(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(seq) = Self::parse_sequence(&name) {
                results.push((seq, entry.path()));
            }
        }
        results.sort_by_key(|(seq, _)| *seq);
        Ok(results)
    }

    fn parse_sequence(filename: &str) -> Option<u64> {
        let rest = filename.strip_prefix("snapshot-")?;
        let stem = rest
            .strip_suffix(".snap.zst")
            .or_else(|| rest.strip_suffix(".snap"))?;
        stem.parse::<u64>().ok()
    }
}

// ── Snapshot Policies ───────────────────────────────────────────────

/// Take a snapshot every `interval` commits.
#[derive(Debug, Clone)]
pub struct SnapshotIntervalPolicy {
    pub interval: u64,
    pub last_snapshot_seq: u64,
}

impl SnapshotIntervalPolicy {
    pub fn with_interval(interval: u64) -> Self {
        Self {
            interval,
            last_snapshot_seq: 0,
        }
    }

    /// Never snapshots when the interval is 0.
    pub fn should_snapshot(&self, current_seq: u64) -> bool {
        self.interval > 0 && current_seq >= self.last_snapshot_seq + self.interval
    }

    pub fn record_snapshot(&mut self, seq: u64) {
        self.last_snapshot_seq = seq;
    }
}

/// Keep only the newest `max_snapshots` files.
#[derive(Debug, Clone)]
pub struct SnapshotCleanupPolicy {
    pub max_snapshots: usize,
}

impl SnapshotCleanupPolicy {
    pub fn new(max_snapshots: usize) -> Self {
        Self { max_snapshots }
    }

    pub fn cleanup(&self, dir: &Path) -> Result<Vec<PathBuf>, SnapshotError> {
        let snapshots = SnapshotLoader::new(dir).list_snapshots()?;

        let mut removed = Vec::new();
        if snapshots.len() > self.max_snapshots {
            let to_remove = snapshots.len() - self.max_snapshots;
            for (_, path) in snapshots.into_iter().take(to_remove) {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
