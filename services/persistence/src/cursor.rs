//! Stream cursors
//!
//! One `stream_cursor` row per logical stream, written in the same
//! transaction as the batch it acknowledges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;
use crate::store::{Record, Transaction, TransactionExt};

/// Totally ordered position within one stream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    /// Precedes every entry of every stream.
    pub const GENESIS: Cursor = Cursor(0);

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCursor {
    pub stream_name: String,
    pub cursor: Cursor,
}

impl Record for StreamCursor {
    const TABLE: &'static str = "stream_cursor";

    fn key(&self) -> String {
        self.stream_name.clone()
    }
}

/// Last committed cursor of `stream`, or genesis if it never committed.
pub async fn load_cursor(
    tx: &mut (dyn Transaction + '_),
    stream: &str,
) -> Result<Cursor, StoreError> {
    Ok(tx
        .fetch::<StreamCursor>(stream)
        .await?
        .map(|row| row.cursor)
        .unwrap_or(Cursor::GENESIS))
}

pub async fn save_cursor(
    tx: &mut (dyn Transaction + '_),
    stream: &str,
    cursor: Cursor,
) -> Result<(), StoreError> {
    tx.save(&StreamCursor {
        stream_name: stream.to_string(),
        cursor,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::RelationalStore;

    #[tokio::test]
    async fn test_missing_cursor_is_genesis() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(load_cursor(&mut tx, "venue").await.unwrap(), Cursor::GENESIS);
    }

    #[tokio::test]
    async fn test_cursor_is_per_stream() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        save_cursor(&mut tx, "venue", Cursor(12)).await.unwrap();
        save_cursor(&mut tx, "kandel", Cursor(3)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(load_cursor(&mut tx, "venue").await.unwrap(), Cursor(12));
        assert_eq!(load_cursor(&mut tx, "kandel").await.unwrap(), Cursor(3));
        assert_eq!(store.count(StreamCursor::TABLE), 2);
    }

    #[test]
    fn test_cursor_ordering() {
        assert!(Cursor::GENESIS < Cursor(1));
        assert!(Cursor::GENESIS.is_genesis());
        assert_eq!(Cursor(7).to_string(), "7");
    }
}
