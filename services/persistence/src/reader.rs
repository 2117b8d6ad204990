//! Journal Reader
//!
//! Sequential reader with corruption detection.
//!
//! Reads every `journal-*.bin` file of a directory in index order,
//! validating each entry's CRC32C. A partially written entry at the very
//! end of the last file is what a crash mid-append leaves behind; it is
//! recorded in the corruption log and reading stops there. Anything else
//! (bad checksum, garbage in the middle of the journal) is an error.

use crate::journal::{JournalEntry, JournalError, JournalWriter};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checksum mismatch at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch { offset: u64, sequence: u64 },

    #[error("Corruption detected at byte offset {offset}: {detail}")]
    Corruption { offset: u64, detail: String },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Sequence not monotonic: prev={prev}, current={current}")]
    NotMonotonic { prev: u64, current: u64 },
}

// ── Corruption Log ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CorruptionRecord {
    /// Byte offset across all files.
    pub byte_offset: u64,
    pub kind: CorruptionKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorruptionKind {
    ChecksumMismatch,
    TruncatedEntry,
}

// ── Journal Reader ──────────────────────────────────────────────────

pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    global_offset: u64,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`. A missing directory reads as empty.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = Self::discover_files(dir)?;
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            global_offset: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Next checksum-valid entry, or `None` at the end of the journal.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }
            if self.pos >= self.data.len() {
                continue;
            }

            let offset_before = self.global_offset;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    self.pos += consumed;
                    self.global_offset += consumed as u64;

                    if !entry.verify_checksum() {
                        self.corruption_log.push(CorruptionRecord {
                            byte_offset: offset_before,
                            kind: CorruptionKind::ChecksumMismatch,
                            detail: format!(
                                "CRC32C mismatch for seq={}, stored={:#010x}",
                                entry.sequence, entry.checksum
                            ),
                        });
                        return Err(ReaderError::ChecksumMismatch {
                            offset: offset_before,
                            sequence: entry.sequence,
                        });
                    }

                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(err) => {
                    let remaining = self.data.len() - self.pos;
                    let is_last_file = self.current_file_idx + 1 >= self.files.len();
                    self.corruption_log.push(CorruptionRecord {
                        byte_offset: offset_before,
                        kind: CorruptionKind::TruncatedEntry,
                        detail: format!("{} bytes unparseable: {}", remaining, err),
                    });
                    if !is_last_file {
                        return Err(ReaderError::Corruption {
                            offset: offset_before,
                            detail: err.to_string(),
                        });
                    }
                    self.pos = self.data.len();
                    self.global_offset += remaining as u64;
                    return Ok(None);
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read all entries, failing on the first sequence gap.
    pub fn read_all_validated(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let entries = self.read_all()?;
        Self::validate_sequences(&entries)?;
        Ok(entries)
    }

    /// Position the reader before the first entry with `sequence >= target_seq`.
    ///
    /// Returns the number of entries skipped.
    pub fn seek_to_sequence(&mut self, target_seq: u64) -> Result<u64, ReaderError> {
        let mut skipped = 0u64;
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                break;
            }
            if self.pos >= self.data.len() {
                continue;
            }

            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    if entry.sequence >= target_seq {
                        break;
                    }
                    self.pos += consumed;
                    self.global_offset += consumed as u64;
                    self.last_sequence = Some(entry.sequence);
                    skipped += 1;
                }
                // Leave the bad bytes for next_entry to report.
                Err(_) => break,
            }
        }
        Ok(skipped)
    }

    /// Best-effort scan: collect every readable entry, skipping damaged regions.
    ///
    /// Used for diagnostics; recovery itself never skips.
    pub fn recover_entries(&mut self) -> (Vec<JournalEntry>, Vec<CorruptionRecord>) {
        let mut entries = Vec::new();
        loop {
            match self.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(ReaderError::ChecksumMismatch { .. }) => continue,
                Err(ReaderError::Corruption { .. }) => {
                    self.pos = self.data.len();
                }
                Err(_) => break,
            }
        }
        (entries, self.corruption_log.clone())
    }

    pub fn current_offset(&self) -> u64 {
        self.global_offset
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    /// Check that `entries` have strictly increasing, gapless sequences.
    pub fn validate_sequences(entries: &[JournalEntry]) -> Result<(), ReaderError> {
        for window in entries.windows(2) {
            let prev = &window[0];
            let curr = &window[1];

            if curr.sequence <= prev.sequence {
                return Err(ReaderError::NotMonotonic {
                    prev: prev.sequence,
                    current: curr.sequence,
                });
            }
            if curr.sequence != prev.sequence + 1 {
                return Err(ReaderError::SequenceGap {
                    expected: prev.sequence + 1,
                    got: curr.sequence,
                });
            }
        }
        Ok(())
    }

    pub fn find_missing_sequences(
        entries: &[JournalEntry],
        expected_start: u64,
        expected_end: u64,
    ) -> Vec<u64> {
        let present: HashSet<u64> = entries.iter().map(|e| e.sequence).collect();
        (expected_start..=expected_end)
            .filter(|s| !present.contains(s))
            .collect()
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, ReaderError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(idx) = JournalWriter::parse_index(&name) {
                files.push((idx, entry.path()));
            }
        }
        files.sort_by_key(|(idx, _)| *idx);
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data.clear();
        self.pos = 0;
        if let Some(path) = self.files.get(self.current_file_idx) {
            self.data = fs::read(path)?;
        }
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current_file_idx + 1 >= self.files.len() {
            return Ok(false);
        }
        self.current_file_idx += 1;
        self.load_current_file()?;
        Ok(true)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalConfig, JournalWriter};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_test_entries(dir: &Path, count: u64) {
        let mut writer = JournalWriter::open(JournalConfig::new(dir)).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=count {
            let entry = JournalEntry::new(
                seq,
                1_000_000_000 + (seq as i64 * 1_000),
                if seq % 2 == 0 { "undo" } else { "apply" }.to_string(),
                vec![seq as u8; 10],
            );
            writer.append(&entry).unwrap();
        }
        writer.sync().unwrap();
    }

    fn only_file(dir: &Path) -> PathBuf {
        JournalReader::discover_files(dir).unwrap().remove(0)
    }

    #[test]
    fn test_sequential_read() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 50);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(entries[49].sequence, 50);
        assert_eq!(reader.last_sequence(), Some(50));
    }

    #[test]
    fn test_checksum_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 5);

        // Flip a byte inside the first entry's payload.
        let path = only_file(tmp.path());
        let mut data = fs::read(&path).unwrap();
        data[35] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        match reader.read_all() {
            Err(ReaderError::ChecksumMismatch { sequence, .. }) => assert_eq!(sequence, 1),
            other => panic!("Expected checksum mismatch, got {:?}", other.map(|e| e.len())),
        }
        assert_eq!(reader.corruption_log()[0].kind, CorruptionKind::ChecksumMismatch);
    }

    #[test]
    fn test_torn_tail_is_logged_and_dropped() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 5);

        let path = only_file(tmp.path());
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        let partial = JournalEntry::new(6, 0, "apply".into(), vec![1; 32]).to_bytes();
        file.write_all(&partial[..partial.len() / 2]).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(reader.corruption_log().len(), 1);
        assert_eq!(reader.corruption_log()[0].kind, CorruptionKind::TruncatedEntry);
    }

    #[test]
    fn test_damage_before_last_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=10 {
            writer
                .append(&JournalEntry::new(seq, 0, "apply".into(), vec![0; 40]))
                .unwrap();
        }
        writer.sync().unwrap();

        let first = only_file(tmp.path());
        let mut data = fs::read(&first).unwrap();
        data.truncate(data.len() - 3);
        fs::write(&first, &data).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert!(matches!(
            reader.read_all(),
            Err(ReaderError::Corruption { .. })
        ));
    }

    #[test]
    fn test_recover_entries_skips_bad_checksum() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 10);

        let path = only_file(tmp.path());
        let mut data = fs::read(&path).unwrap();
        data[35] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let (entries, corruptions) = reader.recover_entries();
        assert_eq!(entries.len(), 9);
        assert_eq!(corruptions.len(), 1);
    }

    #[test]
    fn test_seek_to_sequence() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 20);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let skipped = reader.seek_to_sequence(11).unwrap();
        assert_eq!(skipped, 10);

        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.sequence, 11);
    }

    #[test]
    fn test_offset_tracking() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 5);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let initial_offset = reader.current_offset();
        reader.next_entry().unwrap();
        assert!(reader.current_offset() > initial_offset);
    }

    #[test]
    fn test_sequence_validation() {
        let gapless: Vec<JournalEntry> = (1..=10)
            .map(|seq| JournalEntry::new(seq, 0, "apply".into(), vec![]))
            .collect();
        assert!(JournalReader::validate_sequences(&gapless).is_ok());

        let gap = vec![
            JournalEntry::new(1, 0, "apply".into(), vec![]),
            JournalEntry::new(2, 0, "apply".into(), vec![]),
            JournalEntry::new(5, 0, "apply".into(), vec![]),
        ];
        match JournalReader::validate_sequences(&gap) {
            Err(ReaderError::SequenceGap { expected, got }) => {
                assert_eq!(expected, 3);
                assert_eq!(got, 5);
            }
            other => panic!("Expected SequenceGap, got: {:?}", other),
        }

        let backwards = vec![
            JournalEntry::new(5, 0, "apply".into(), vec![]),
            JournalEntry::new(3, 0, "apply".into(), vec![]),
        ];
        assert!(matches!(
            JournalReader::validate_sequences(&backwards),
            Err(ReaderError::NotMonotonic { prev: 5, current: 3 })
        ));
    }

    #[test]
    fn test_detect_missing_sequence() {
        let entries = vec![
            JournalEntry::new(1, 100, "apply".into(), vec![]),
            JournalEntry::new(3, 300, "apply".into(), vec![]),
            JournalEntry::new(5, 500, "apply".into(), vec![]),
        ];
        let missing = JournalReader::find_missing_sequences(&entries, 1, 5);
        assert_eq!(missing, vec![2, 4]);
    }

    #[test]
    fn test_empty_or_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert!(reader.read_all().unwrap().is_empty());

        let mut reader = JournalReader::open(&tmp.path().join("absent")).unwrap();
        assert!(reader.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_multi_file_read() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        writer.set_next_sequence(1);
        for seq in 1..=30 {
            writer
                .append(&JournalEntry::new(seq, 1000 * seq as i64, "apply".into(), vec![5; 5]))
                .unwrap();
        }
        writer.sync().unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all_validated().unwrap();
        assert_eq!(entries.len(), 30);
        assert_eq!(entries.last().unwrap().sequence, 30);
    }
}
