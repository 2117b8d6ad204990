//! Shared fixtures: a memory store, a memory stream source and payload
//! builders for one venue with a base/quote market.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;

use venue_indexer::consumer::{Consumer, ConsumerConfig, ConsumerError, ConsumerReport, RetryPolicy};
use venue_indexer::decoder::StreamSchema;
use venue_indexer::source::MemoryStreamSource;
use venue_store::memory::Tables;
use venue_store::versioned::version_chain;
use venue_store::{
    find_current_version, get_entity, EntityRow, MemoryStore, RelationalStore, Record, TransactionExt, Version,
    VersionedEntity,
};
use venue_types::ids::{
    Address, ChainId, MakerBalanceId, OfferId, OfferListId, OfferListKey, VenueId,
};

pub const CHAIN: u64 = 10;

/// Every entry carries the same block time so reruns are comparable.
pub fn block_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub const VENUE_STREAM: &str = "venue";
pub const KANDEL_STREAM: &str = "kandel";
pub const RESTING_STREAM: &str = "resting-order";
pub const TOKEN_STREAM: &str = "token-registry";

pub fn addr(n: u64) -> String {
    format!("0x{:040x}", n)
}

pub fn base() -> String {
    addr(0x1)
}
pub fn quote() -> String {
    addr(0x2)
}
pub fn maker() -> String {
    addr(0x3)
}
pub fn taker() -> String {
    addr(0x4)
}
pub fn owner() -> String {
    addr(0x5)
}
pub fn venue() -> String {
    addr(0xa)
}
pub fn registry() -> String {
    addr(0xb)
}
pub fn kandel() -> String {
    addr(0xc)
}
pub fn router() -> String {
    addr(0xd)
}

pub fn address(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

pub fn ol_key(outbound: &str, inbound: &str) -> Value {
    json!({ "outbound": outbound, "inbound": inbound })
}

pub fn schema_of(stream: &str) -> StreamSchema {
    match stream {
        VENUE_STREAM => StreamSchema::Venue,
        KANDEL_STREAM => StreamSchema::Kandel,
        RESTING_STREAM => StreamSchema::RestingOrder,
        TOKEN_STREAM => StreamSchema::TokenRegistry,
        other => panic!("no schema for stream {}", other),
    }
}

// ── Ids ─────────────────────────────────────────────────────────────

pub fn venue_id() -> VenueId {
    VenueId::new(ChainId(CHAIN), address(&venue()))
}

pub fn offer_list_id(outbound: &str, inbound: &str) -> OfferListId {
    OfferListId::new(
        venue_id(),
        OfferListKey::new(address(outbound), address(inbound)),
    )
}

/// Offer on the base → quote list.
pub fn ask(n: u32) -> OfferId {
    OfferId::new(offer_list_id(&base(), &quote()), n)
}

/// Offer on the quote → base list.
pub fn bid(n: u32) -> OfferId {
    OfferId::new(offer_list_id(&quote(), &base()), n)
}

pub fn balance_id(maker: &str) -> MakerBalanceId {
    MakerBalanceId::new(venue_id(), address(maker))
}

// ── Events ──────────────────────────────────────────────────────────

pub fn token_registered(token: &str, symbol: &str, decimals: u8) -> Value {
    json!({
        "type": "TokenRegistered",
        "token": token,
        "name": format!("{} token", symbol),
        "symbol": symbol,
        "decimals": decimals
    })
}

pub fn offer_list_params(outbound: &str, inbound: &str) -> Value {
    json!({
        "type": "OfferListParamsUpdated",
        "olKey": ol_key(outbound, inbound),
        "active": true,
        "fee": 3,
        "density": "0.5",
        "gasbase": 20000
    })
}

pub fn offer_written(outbound: &str, inbound: &str, id: u32, wants: u128, gives: u128) -> Value {
    offer_written_by(outbound, inbound, id, &maker(), wants, gives)
}

pub fn offer_written_by(
    outbound: &str,
    inbound: &str,
    id: u32,
    maker: &str,
    wants: u128,
    gives: u128,
) -> Value {
    json!({
        "type": "OfferWritten",
        "olKey": ol_key(outbound, inbound),
        "offerId": id,
        "maker": maker,
        "wants": wants.to_string(),
        "gives": gives.to_string(),
        "gasprice": 1,
        "gasreq": 100000
    })
}

pub fn offer_retracted(outbound: &str, inbound: &str, id: u32) -> Value {
    json!({
        "type": "OfferRetracted",
        "olKey": ol_key(outbound, inbound),
        "offerId": id,
        "deprovision": false
    })
}

/// Market order on `outbound → inbound`; each fill is `(offer, taker_wants, taker_gives)`.
pub fn order_completed(outbound: &str, inbound: &str, fills: &[(u32, u128, u128)]) -> Value {
    let got: u128 = fills.iter().map(|f| f.1).sum();
    let gave: u128 = fills.iter().map(|f| f.2).sum();
    let taken: Vec<Value> = fills
        .iter()
        .map(|(id, wants, gives)| {
            json!({
                "offerId": id,
                "takerWants": wants.to_string(),
                "takerGives": gives.to_string()
            })
        })
        .collect();
    json!({
        "type": "OrderCompleted",
        "olKey": ol_key(outbound, inbound),
        "taker": taker(),
        "fillWants": true,
        "takerGot": got.to_string(),
        "takerGave": gave.to_string(),
        "penalty": "0",
        "feePaid": "0",
        "takenOffers": taken
    })
}

pub fn maker_balance(maker: &str, delta: i128) -> Value {
    json!({
        "type": "MakerBalanceUpdated",
        "maker": maker,
        "delta": delta.to_string()
    })
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub store: MemoryStore,
    pub source: MemoryStreamSource,
    next_tx: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            source: MemoryStreamSource::new(),
            next_tx: 1,
        }
    }

    /// Envelope for `event` emitted by `emitter` in a fresh transaction.
    pub fn payload(&mut self, emitter: &str, event: Value) -> Vec<u8> {
        let n = self.next_tx;
        self.next_tx += 1;
        serde_json::to_vec(&json!({
            "chainId": CHAIN,
            "address": emitter,
            "tx": {
                "hash": format!("0x{:064x}", n),
                "from": addr(0xee),
                "blockNumber": 100 + n,
                "blockHash": format!("0x{:064x}", 1_000_000 + n),
                "logIndex": 0
            },
            "event": event
        }))
        .unwrap()
    }

    /// Queue `event` for `stream`; the payload can be queued again as an undo.
    pub fn push(&mut self, stream: &str, emitter: &str, event: Value) -> Vec<u8> {
        let payload = self.payload(emitter, event);
        self.source
            .push_at(stream, payload.clone(), false, block_time());
        payload
    }

    pub fn push_undo(&self, stream: &str, payload: &[u8]) {
        self.source
            .push_at(stream, payload.to_vec(), true, block_time());
    }

    /// Queue a payload that was already pushed once.
    pub fn redeliver(&self, stream: &str, payload: &[u8]) {
        self.source
            .push_at(stream, payload.to_vec(), false, block_time());
    }

    pub fn config(&self, stream: &str) -> ConsumerConfig {
        let mut config = ConsumerConfig::new(stream, schema_of(stream));
        config.batch_size = 4;
        config.high_water_mark = 16;
        config.retry = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        };
        config
    }

    pub async fn run_with(&self, config: ConsumerConfig) -> Result<ConsumerReport, ConsumerError> {
        let consumer = Consumer::new(self.store.clone(), config);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        consumer.run(&self.source, shutdown).await
    }

    /// Consume everything queued on `stream`; panics on a fatal error.
    pub async fn run(&self, stream: &str) -> ConsumerReport {
        self.run_with(self.config(stream))
            .await
            .unwrap_or_else(|e| panic!("stream {} failed: {}", stream, e))
    }

    /// Register both tokens, create the venue and open both offer lists.
    pub async fn setup_market(&mut self) {
        let registry = registry();
        let venue = venue();
        self.push(TOKEN_STREAM, &registry, token_registered(&base(), "BASE", 18));
        self.push(TOKEN_STREAM, &registry, token_registered(&quote(), "QUOTE", 6));
        self.run(TOKEN_STREAM).await;

        self.push(VENUE_STREAM, &venue, json!({ "type": "VenueCreated" }));
        self.push(VENUE_STREAM, &venue, offer_list_params(&base(), &quote()));
        self.push(VENUE_STREAM, &venue, offer_list_params(&quote(), &base()));
        self.run(VENUE_STREAM).await;
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub async fn current<E: VersionedEntity>(&self, id: &E::Id) -> Option<Version<E::Fields>> {
        let mut tx = self.store.begin().await.unwrap();
        find_current_version::<E>(&mut tx, id).await.unwrap()
    }

    pub async fn entity<E: VersionedEntity>(&self, id: &E::Id) -> Option<EntityRow<E::Keys>> {
        let mut tx = self.store.begin().await.unwrap();
        get_entity::<E>(&mut tx, id).await.unwrap()
    }

    pub async fn chain<E: VersionedEntity>(&self, id: &E::Id) -> Vec<Version<E::Fields>> {
        let mut tx = self.store.begin().await.unwrap();
        version_chain::<E>(&mut tx, id).await.unwrap()
    }

    pub async fn record<R: Record>(&self, key: &str) -> Option<R> {
        let mut tx = self.store.begin().await.unwrap();
        tx.fetch::<R>(key).await.unwrap()
    }

    /// Committed tables minus the ensure-only shared rows and cursors.
    pub fn state(&self) -> Tables {
        self.store
            .dump()
            .into_iter()
            .filter(|(name, table)| {
                !table.is_empty()
                    && !matches!(name.as_str(), "transaction" | "account" | "stream_cursor")
            })
            .collect()
    }

    /// Row count per non-empty table, cursors included.
    pub fn counts(&self) -> Vec<(String, usize)> {
        self.store
            .dump()
            .into_iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(name, table)| (name, table.len()))
            .collect()
    }
}
