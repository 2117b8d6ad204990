//! Journal Writer
//!
//! Append-only checksummed journal.
//!
//! Used two ways: the durable store appends one entry per committed
//! transaction (`event_type = "commit"`, payload = JSON change set), and
//! stream files use the same framing with `apply`/`undo` entries.
//!
//! # Binary Format (per entry)
//! ```text
//! [total_len: u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [event_type_len: u16][event_type: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]  // CRC32C over sequence+timestamp+event_type+payload
//! ```

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },

    #[error("Journal size limit exceeded: {current} >= {limit}")]
    SizeLimitExceeded { current: u64, limit: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One framed, checksummed journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic, gapless sequence number; doubles as a stream cursor.
    pub sequence: u64,
    /// Unix nanoseconds.
    pub timestamp: i64,
    pub event_type: String,
    pub payload: Vec<u8>,
    /// CRC32C over (sequence ++ timestamp ++ event_type ++ payload)
    pub checksum: u32,
}

const MAX_BODY_LEN: usize = 100_000_000;
const MIN_BODY_LEN: usize = 26;

fn read_array<const N: usize>(body: &[u8], pos: usize) -> Result<[u8; N], JournalError> {
    body.get(pos..pos + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            JournalError::Serialization(format!(
                "need {} bytes at offset {}, body is {} bytes",
                N,
                pos,
                body.len()
            ))
        })
}

impl JournalEntry {
    pub fn new(sequence: u64, timestamp: i64, event_type: String, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, timestamp, &event_type, &payload);
        Self {
            sequence,
            timestamp,
            event_type,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(
        sequence: u64,
        timestamp: i64,
        event_type: &str,
        payload: &[u8],
    ) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + event_type.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(event_type.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        let expected =
            Self::compute_checksum(self.sequence, self.timestamp, &self.event_type, &self.payload);
        self.checksum == expected
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let event_type_bytes = self.event_type.as_bytes();
        let event_type_len = event_type_bytes.len() as u16;
        let payload_len = self.payload.len() as u32;

        // seq + ts + et_len + et + pl_len + pl + crc
        let body_len: u32 = 8 + 8 + 2 + (event_type_len as u32) + 4 + payload_len + 4;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&event_type_len.to_le_bytes());
        buf.extend_from_slice(event_type_bytes);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse one entry from the front of `data`.
    ///
    /// Returns `(entry, bytes_consumed)`. The checksum is not verified here.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let body_len = u32::from_le_bytes(read_array::<4>(data, 0)?) as usize;

        if body_len > MAX_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Implausible body length: {} (likely corruption)",
                body_len
            )));
        }
        if body_len < MIN_BODY_LEN {
            return Err(JournalError::Serialization(format!(
                "Body too small: {} bytes, minimum is {}",
                body_len, MIN_BODY_LEN
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Serialization(format!(
                "Incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        let body = &data[4..total];
        let mut pos = 0;

        let sequence = u64::from_le_bytes(read_array::<8>(body, pos)?);
        pos += 8;
        let timestamp = i64::from_le_bytes(read_array::<8>(body, pos)?);
        pos += 8;

        let event_type_len = u16::from_le_bytes(read_array::<2>(body, pos)?) as usize;
        pos += 2;
        let event_type_bytes = body.get(pos..pos + event_type_len).ok_or_else(|| {
            JournalError::Serialization(format!(
                "event_type_len {} exceeds remaining body",
                event_type_len
            ))
        })?;
        let event_type = String::from_utf8(event_type_bytes.to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        pos += event_type_len;

        let payload_len = u32::from_le_bytes(read_array::<4>(body, pos)?) as usize;
        pos += 4;
        let payload = body
            .get(pos..pos + payload_len)
            .ok_or_else(|| {
                JournalError::Serialization(format!(
                    "payload_len {} exceeds remaining body",
                    payload_len
                ))
            })?
            .to_vec();
        pos += payload_len;

        let checksum = u32::from_le_bytes(read_array::<4>(body, pos)?);

        Ok((
            Self {
                sequence,
                timestamp,
                event_type,
                payload,
                checksum,
            },
            total,
        ))
    }
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    /// Only when a file is rotated or `sync` is called.
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Rotate after this many bytes (default 64 MiB).
    pub max_file_size: u64,
    /// Maximum total journal size in bytes (0 = unlimited).
    pub max_total_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            max_total_size: 0,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryWrite,
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with rotation and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    file_index: u64,
    total_size: u64,
}

impl JournalWriter {
    /// Open the latest journal file for appending, creating the directory if needed.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::find_latest_index(&config.dir);
        let current_file = Self::journal_path(&config.dir, file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;

        let current_file_size = file.metadata()?.len();
        let total_size = Self::compute_total_size(&config.dir)?;

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 0,
            writes_since_flush: 0,
            writes_since_fsync: 0,
            file_index,
            total_size,
        })
    }

    /// Set the next expected sequence number (after recovery).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append an entry. Rejects gaps once a sequence has been established.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if self.next_sequence > 0 && entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        if self.config.max_total_size > 0 && self.total_size >= self.config.max_total_size {
            return Err(JournalError::SizeLimitExceeded {
                current: self.total_size,
                limit: self.config.max_total_size,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;

        let written = bytes.len() as u64;
        self.current_file_size += written;
        self.total_size += written;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;

        Ok(())
    }

    /// Build the next entry (sequence assigned by the writer) and append it.
    pub fn write_event(
        &mut self,
        timestamp: i64,
        event_type: &str,
        payload: Vec<u8>,
    ) -> Result<JournalEntry, JournalError> {
        let sequence = self.next_sequence.max(1);
        let entry = JournalEntry::new(sequence, timestamp, event_type.to_string(), payload);
        self.append(&entry)?;
        Ok(entry)
    }

    /// Force flush + fsync.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Delete journal files whose entries are all covered by a snapshot at `sequence`.
    ///
    /// The file currently being written is never removed.
    pub fn truncate_through(&mut self, sequence: u64) -> Result<Vec<PathBuf>, JournalError> {
        let mut files: Vec<(u64, PathBuf)> = Self::list_files(&self.config.dir)?;
        files.sort_by_key(|(idx, _)| *idx);

        let mut removed = Vec::new();
        for window in files.windows(2) {
            let (idx, path) = &window[0];
            let (_, next_path) = &window[1];
            if *idx >= self.file_index {
                break;
            }
            // A file is fully covered when the next file starts at or before `sequence + 1`.
            let next_first = fs::read(next_path)
                .ok()
                .and_then(|data| JournalEntry::from_bytes(&data).ok())
                .map(|(entry, _)| entry.sequence);
            if matches!(next_first, Some(first) if first <= sequence + 1) {
                let size = fs::metadata(path)?.len();
                fs::remove_file(path)?;
                self.total_size = self.total_size.saturating_sub(size);
                removed.push(path.clone());
            }
        }
        Ok(removed)
    }

    /// Cut a partially written entry off the end of the current file.
    ///
    /// Returns the number of bytes removed. Must run before appending to a
    /// journal that may have been interrupted mid-write.
    pub fn repair_tail(&mut self) -> Result<u64, JournalError> {
        self.writer.flush()?;
        let data = fs::read(&self.current_file)?;
        let mut valid_len = 0usize;
        while valid_len < data.len() {
            match JournalEntry::from_bytes(&data[valid_len..]) {
                Ok((entry, consumed)) if entry.verify_checksum() => valid_len += consumed,
                _ => break,
            }
        }

        let removed = (data.len() - valid_len) as u64;
        if removed > 0 {
            let file = OpenOptions::new().write(true).open(&self.current_file)?;
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
            self.current_file_size = valid_len as u64;
            self.total_size = self.total_size.saturating_sub(removed);
        }
        Ok(removed)
    }

    /// Close the current file and continue in a fresh one.
    pub fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = Self::journal_path(&self.config.dir, self.file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;

        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }

    pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("journal-{:06}.bin", index))
    }

    pub(crate) fn parse_index(name: &str) -> Option<u64> {
        name.strip_prefix("journal-")?
            .strip_suffix(".bin")?
            .parse::<u64>()
            .ok()
    }

    fn list_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, JournalError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(idx) = Self::parse_index(&name) {
                files.push((idx, entry.path()));
            }
        }
        Ok(files)
    }

    fn find_latest_index(dir: &Path) -> u64 {
        Self::list_files(dir)
            .ok()
            .and_then(|files| files.into_iter().map(|(idx, _)| idx).max())
            .unwrap_or(0)
    }

    fn compute_total_size(dir: &Path) -> Result<u64, JournalError> {
        let mut total = 0u64;
        for (_, path) in Self::list_files(dir)? {
            total += fs::metadata(path)?.len();
        }
        Ok(total)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_entry(seq: u64) -> JournalEntry {
        JournalEntry::new(
            seq,
            1_708_123_456_789_000_000 + (seq as i64),
            "commit".to_string(),
            br#"{"changes":[]}"#.to_vec(),
        )
    }

    #[test]
    fn test_checksum_detects_tamper() {
        let mut entry = sample_entry(1);
        assert!(entry.verify_checksum());
        entry.payload = b"{}".to_vec();
        assert!(!entry.verify_checksum());
    }

    #[test]
    fn test_entry_framing_roundtrip() {
        let entry = sample_entry(42);
        let bytes = entry.to_bytes();
        let (decoded, consumed) = JournalEntry::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(entry, decoded);
    }

    #[test]
    fn test_from_bytes_rejects_truncation() {
        let bytes = sample_entry(1).to_bytes();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(JournalEntry::from_bytes(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_from_bytes_rejects_inconsistent_lengths() {
        let mut bytes = sample_entry(1).to_bytes();
        // event_type_len field sits after len(4) + seq(8) + ts(8)
        bytes[20] = 0xFF;
        bytes[21] = 0xFF;
        assert!(JournalEntry::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_sequence_error_on_gap() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        writer.set_next_sequence(1);

        writer.append(&sample_entry(1)).unwrap();
        match writer.append(&sample_entry(5)).unwrap_err() {
            JournalError::SequenceError { expected, got } => {
                assert_eq!(expected, 2);
                assert_eq!(got, 5);
            }
            other => panic!("Unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_write_event_assigns_sequences() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();

        let first = writer.write_event(10, "apply", vec![1]).unwrap();
        let second = writer.write_event(20, "undo", vec![1]).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(writer.next_sequence(), 3);
    }

    #[test]
    fn test_file_rotation_on_size_limit() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);

        for seq in 1..=20 {
            writer.append(&sample_entry(seq)).unwrap();
        }

        let files = JournalWriter::list_files(tmp.path()).unwrap();
        assert!(files.len() > 1, "Expected rotation to create multiple files");
    }

    #[test]
    fn test_journal_size_limit() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_total_size: 200,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);

        let mut hit_limit = false;
        for seq in 1..=1000 {
            match writer.append(&sample_entry(seq)) {
                Ok(_) => {}
                Err(JournalError::SizeLimitExceeded { .. }) => {
                    hit_limit = true;
                    break;
                }
                Err(e) => panic!("Unexpected error: {:?}", e),
            }
        }
        assert!(hit_limit, "Expected size limit to be hit");
    }

    #[test]
    fn test_sync_flushes_to_disk() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            flush_policy: FlushPolicy::EveryN(1000),
            fsync_policy: FsyncPolicy::OnRotation,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);

        writer.append(&sample_entry(1)).unwrap();
        writer.sync().unwrap();

        let size = fs::metadata(writer.current_file_path()).unwrap().len();
        assert!(size > 0);
    }

    #[test]
    fn test_truncate_through_keeps_uncovered_files() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=3 {
            writer.append(&sample_entry(seq)).unwrap();
        }
        writer.rotate().unwrap();
        for seq in 4..=6 {
            writer.append(&sample_entry(seq)).unwrap();
        }
        writer.rotate().unwrap();

        // Snapshot covers 1..=3 only: first file goes, second stays.
        let removed = writer.truncate_through(3).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(JournalWriter::list_files(tmp.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_repair_tail_removes_partial_entry() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        writer.set_next_sequence(1);
        writer.append(&sample_entry(1)).unwrap();
        let good_len = fs::metadata(writer.current_file_path()).unwrap().len();
        drop(writer);

        let path = JournalWriter::journal_path(tmp.path(), 0);
        let partial = sample_entry(2).to_bytes();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..10]).unwrap();
        drop(file);

        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        assert_eq!(writer.repair_tail().unwrap(), 10);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(writer.repair_tail().unwrap(), 0);
    }

    #[test]
    fn test_journal_file_naming() {
        let path = JournalWriter::journal_path(Path::new("/tmp"), 42);
        assert_eq!(path, PathBuf::from("/tmp/journal-000042.bin"));
        assert_eq!(JournalWriter::parse_index("journal-000042.bin"), Some(42));
        assert_eq!(JournalWriter::parse_index("snapshot-1.snap"), None);
    }
}
