//! Venue Indexer
//!
//! Stream consumers projecting venue events into versioned entities.
//!
//! - `source`: stream subscription (in-memory and journal-backed)
//! - `decoder`: payload → typed event, with a per-stream malformed policy
//! - `dispatcher` / `handlers`: apply or undo one event inside a transaction
//! - `consumer`: batched, cursor-tracked, retrying consumer loop per stream
//! - `entities` / `records`: the tables the handlers write

pub mod config;
pub mod consumer;
pub mod decoder;
pub mod dispatcher;
pub mod entities;
pub mod events;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod records;
pub mod source;

pub use config::{IndexerConfig, StreamConfig};
pub use consumer::{Consumer, ConsumerConfig, ConsumerError, ConsumerReport, ConsumerState, ExitReason};
pub use decoder::{Decoder, MalformedPolicy, StreamSchema};
pub use source::{JournalStreamSource, JournalStreamWriter, MemoryStreamSource, StreamSource};
