//! Relational store contract
//!
//! The indexer only needs three things from its store: transactions,
//! point lookup by primary key, and upsert by primary key. Rows are JSON
//! documents grouped into named tables; typed access goes through
//! [`Record`] and the [`TransactionExt`] extension.
//!
//! A transaction handle is passed explicitly into every operation. Work is
//! only visible to other transactions after [`Transaction::commit`];
//! dropping a handle without committing discards everything it wrote.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;

pub type Row = Value;

// ── Store / Transaction ─────────────────────────────────────────────

#[async_trait]
pub trait RelationalStore: Send + Sync {
    type Tx: Transaction + 'static;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

#[async_trait]
pub trait Transaction: Send {
    /// Point lookup by primary key.
    async fn get(&mut self, table: &str, key: &str) -> Result<Option<Row>, StoreError>;

    /// Insert or replace the row stored under `key`.
    async fn upsert(&mut self, table: &str, key: &str, row: Row) -> Result<(), StoreError>;

    /// Delete the row stored under `key`; `false` if there was none.
    async fn delete(&mut self, table: &str, key: &str) -> Result<bool, StoreError>;

    /// Make every write of this transaction visible atomically.
    ///
    /// After a commit attempt, successful or not, the handle is finished and
    /// further operations fail with [`StoreError::TransactionClosed`].
    async fn commit(&mut self) -> Result<(), StoreError>;
}

// ── Typed records ───────────────────────────────────────────────────

/// A row type with a fixed table and a primary key derived from its content.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    fn key(&self) -> String;
}

#[async_trait]
pub trait TransactionExt: Transaction {
    async fn fetch<R: Record>(&mut self, key: &str) -> Result<Option<R>, StoreError> {
        match self.get(R::TABLE, key).await? {
            Some(row) => serde_json::from_value(row)
                .map(Some)
                .map_err(|e| StoreError::serialization(R::TABLE, key, e)),
            None => Ok(None),
        }
    }

    async fn save<R: Record>(&mut self, record: &R) -> Result<(), StoreError> {
        let key = record.key();
        let row =
            serde_json::to_value(record).map_err(|e| StoreError::serialization(R::TABLE, &key, e))?;
        self.upsert(R::TABLE, &key, row).await
    }

    async fn remove<R: Record>(&mut self, key: &str) -> Result<bool, StoreError> {
        self.delete(R::TABLE, key).await
    }

    /// Insert `record` unless a row with the same key exists. Returns whether it was inserted.
    async fn ensure<R: Record>(&mut self, record: &R) -> Result<bool, StoreError> {
        let key = record.key();
        if self.get(R::TABLE, &key).await?.is_some() {
            return Ok(false);
        }
        self.save(record).await?;
        Ok(true)
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Token {
        id: String,
        symbol: String,
    }

    impl Record for Token {
        const TABLE: &'static str = "token";

        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn token(symbol: &str) -> Token {
        Token {
            id: "1-0xa".to_string(),
            symbol: symbol.to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save(&token("WETH")).await.unwrap();
        let loaded: Option<Token> = tx.fetch("1-0xa").await.unwrap();
        assert_eq!(loaded, Some(token("WETH")));
    }

    #[tokio::test]
    async fn test_ensure_keeps_existing_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.ensure(&token("WETH")).await.unwrap());
        assert!(!tx.ensure(&token("OTHER")).await.unwrap());
        let loaded: Token = tx.fetch("1-0xa").await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "WETH");
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.save(&token("WETH")).await.unwrap();
        assert!(tx.remove::<Token>("1-0xa").await.unwrap());
        assert!(!tx.remove::<Token>("1-0xa").await.unwrap());
        assert!(tx.fetch::<Token>("1-0xa").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_wrong_shape_is_serialization_error() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.upsert("token", "1-0xa", serde_json::json!({"unexpected": true}))
            .await
            .unwrap();
        let err = tx.fetch::<Token>("1-0xa").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
