//! Venue Store
//!
//! Relational store contract and versioned entities.
//!
//! - `store`: the transaction contract the indexer depends on, plus typed records
//! - `memory`: in-memory transactional tables
//! - `durable`: memory tables behind a write-ahead journal with snapshots
//! - `versioned`: append-only version chains with single-step undo
//! - `cursor`: per-stream committed positions
//! - `journal`, `reader`, `snapshot`, `recovery`: on-disk formats and replay

pub mod cursor;
pub mod durable;
pub mod error;
pub mod journal;
pub mod memory;
pub mod reader;
pub mod recovery;
pub mod snapshot;
pub mod store;
pub mod versioned;

pub use cursor::{load_cursor, save_cursor, Cursor, StreamCursor};
pub use durable::{DurableConfig, DurableStore};
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTransaction};
pub use store::{RelationalStore, Record, Row, Transaction, TransactionExt};
pub use versioned::{
    append_version, delete_latest_version, find_current_version, get_current_version,
    get_entity, Construct, EntityRow, Undone, Version, VersionError, VersionedEntity,
};
