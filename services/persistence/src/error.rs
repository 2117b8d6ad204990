//! Store errors
//!
//! `StoreError` is what every relational store operation returns. Only
//! `Unavailable` and `Conflict` are transient; everything else points at a
//! bug or at data that can no longer be trusted.

use thiserror::Error;

use crate::journal::JournalError;
use crate::recovery::RecoveryError;
use crate::snapshot::SnapshotError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write conflict on {table}/{key}: row changed since it was read")]
    Conflict { table: String, key: String },

    #[error("Transaction already finished")]
    TransactionClosed,

    #[error("Row serialization error in {table}/{key}: {detail}")]
    Serialization {
        table: String,
        key: String,
        detail: String,
    },

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
}

impl StoreError {
    /// Whether retrying the same work later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Conflict { .. }
        )
    }

    pub(crate) fn serialization(table: &str, key: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Serialization {
            table: table.to_string(),
            key: key.to_string(),
            detail: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_and_conflict_are_transient() {
        assert!(StoreError::Unavailable("connection reset".into()).is_transient());
        assert!(StoreError::Conflict {
            table: "offer".into(),
            key: "1".into()
        }
        .is_transient());
        assert!(!StoreError::TransactionClosed.is_transient());
        assert!(!StoreError::serialization("offer", "1", "bad").is_transient());
    }
}
