//! Non-versioned records
//!
//! Rows that are written once (transactions, accounts, orders), overwritten
//! in place (offer-index mappings), or kept only so an undo can find what
//! its forward pass wrote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use venue_store::Record;
use venue_types::ids::{Address, ChainId, OfferSide};
use venue_types::numeric::RawAmount;

use crate::entities::StrategyFields;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub chain: ChainId,
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Record for Token {
    const TABLE: &'static str = "token";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub chain: ChainId,
    pub address: Address,
}

impl Record for Account {
    const TABLE: &'static str = "account";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub chain: ChainId,
    pub hash: String,
    pub from: Address,
    pub block_number: u64,
    pub block_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl Record for TransactionRecord {
    const TABLE: &'static str = "transaction";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ── Trades ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub offer_list: String,
    pub taker: Address,
    pub fill_wants: bool,
    pub taker_got: RawAmount,
    pub taker_gave: RawAmount,
    pub penalty: RawAmount,
    pub fee_paid: RawAmount,
    pub tx_id: String,
    pub timestamp: DateTime<Utc>,
}

impl Record for Order {
    const TABLE: &'static str = "order";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakenOffer {
    pub id: String,
    pub order_id: String,
    pub offer_id: String,
    pub taker_wants: RawAmount,
    pub taker_gives: RawAmount,
    pub failed: bool,
    pub fail_reason: Option<String>,
    pub posthook_fail_reason: Option<String>,
}

impl Record for TakenOffer {
    const TABLE: &'static str = "taken_offer";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ── Strategies ──────────────────────────────────────────────────────

/// Strategy configuration as of one strategy version, keyed by that version's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfiguration {
    pub id: String,
    pub strategy_id: String,
    pub version_number: u64,
    pub config: StrategyFields,
}

impl Record for StrategyConfiguration {
    const TABLE: &'static str = "strategy_configuration";

    fn key(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOfferIndex {
    pub id: String,
    pub strategy_id: String,
    pub side: OfferSide,
    pub index: u32,
    pub offer_id: String,
}

impl Record for StrategyOfferIndex {
    const TABLE: &'static str = "strategy_offer_index";

    fn key(&self) -> String {
        self.id.clone()
    }
}

/// An index row as it was before a populate overwrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexChange {
    pub id: String,
    pub previous: Option<StrategyOfferIndex>,
}

/// Everything a populate/retract wrote, so its undo removes exactly that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyEventRecord {
    pub id: String,
    pub strategy_id: String,
    pub kind: String,
    /// Offers versioned, in write order; may repeat.
    pub offers: Vec<String>,
    pub indexes: Vec<IndexChange>,
}

impl Record for StrategyEventRecord {
    const TABLE: &'static str = "strategy_event";

    fn key(&self) -> String {
        self.id.clone()
    }
}

// ── Resting orders ──────────────────────────────────────────────────

/// Which resting order an offer belongs to. The last entry is current;
/// earlier ones are kept so an undone repost can restore them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestingOrderLink {
    pub offer_id: String,
    pub orders: Vec<String>,
}

impl RestingOrderLink {
    pub fn current(&self) -> Option<&str> {
        self.orders.last().map(String::as_str)
    }
}

impl Record for RestingOrderLink {
    const TABLE: &'static str = "resting_order_link";

    fn key(&self) -> String {
        self.offer_id.clone()
    }
}

// ── Audit ───────────────────────────────────────────────────────────

/// One version appended by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub table: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub id: String,
    pub kind: String,
    pub emitter: Address,
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    /// Versions appended by the event, in order; an entity may repeat.
    pub entities: Vec<EntityRef>,
    /// Records the event inserted that did not exist before.
    pub created: Vec<String>,
}

impl Record for EventLog {
    const TABLE: &'static str = "event_log";

    fn key(&self) -> String {
        self.id.clone()
    }
}
