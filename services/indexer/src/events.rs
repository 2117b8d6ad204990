//! Decoded event definitions
//!
//! A stream payload is a JSON envelope naming the chain, the emitting
//! contract and the transaction/log position, wrapping one event of one of
//! four families. Each family is a closed, `type`-tagged enum; the set of
//! families is closed too, so dispatch over [`DomainEvent`] is exhaustive.

use serde::{Deserialize, Serialize};
use venue_types::ids::{
    Address, ChainId, EventId, OfferListKey, OfferSide, TransactionId, TxHash,
};
use venue_types::numeric::{RawAmount, SignedAmount};

use crate::decoder::StreamSchema;

// ── Envelope ────────────────────────────────────────────────────────

/// Transaction and log position an event was emitted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub hash: TxHash,
    pub from: Address,
    pub block_number: u64,
    pub block_hash: String,
    pub log_index: u32,
}

/// A fully decoded stream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub chain: ChainId,
    /// Emitting contract: venue, strategy, resting-order router or registry.
    pub address: Address,
    pub tx: TxInfo,
    pub event: DomainEvent,
}

impl DecodedEvent {
    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(self.chain, self.tx.hash.clone())
    }

    pub fn event_id(&self) -> EventId {
        EventId::new(self.transaction_id(), self.tx.log_index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Venue(VenueEvent),
    Kandel(KandelEvent),
    RestingOrder(RestingOrderEvent),
    Token(TokenEvent),
}

impl DomainEvent {
    pub fn schema(&self) -> StreamSchema {
        match self {
            DomainEvent::Venue(_) => StreamSchema::Venue,
            DomainEvent::Kandel(_) => StreamSchema::Kandel,
            DomainEvent::RestingOrder(_) => StreamSchema::RestingOrder,
            DomainEvent::Token(_) => StreamSchema::TokenRegistry,
        }
    }

    /// Event type as a string label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::Venue(e) => match e {
                VenueEvent::VenueCreated(_) => "VenueCreated",
                VenueEvent::VenueParamsUpdated(_) => "VenueParamsUpdated",
                VenueEvent::VenueKilled(_) => "VenueKilled",
                VenueEvent::OfferListParamsUpdated(_) => "OfferListParamsUpdated",
                VenueEvent::OfferWritten(_) => "OfferWritten",
                VenueEvent::OfferRetracted(_) => "OfferRetracted",
                VenueEvent::OrderCompleted(_) => "OrderCompleted",
                VenueEvent::MakerBalanceUpdated(_) => "MakerBalanceUpdated",
                VenueEvent::TakerApprovalUpdated(_) => "TakerApprovalUpdated",
            },
            DomainEvent::Kandel(e) => match e {
                KandelEvent::KandelCreated(_) => "KandelCreated",
                KandelEvent::KandelParamsSet(_) => "KandelParamsSet",
                KandelEvent::KandelCredited(_) => "KandelCredited",
                KandelEvent::KandelDebited(_) => "KandelDebited",
                KandelEvent::KandelAdminSet(_) => "KandelAdminSet",
                KandelEvent::KandelRouterSet(_) => "KandelRouterSet",
                KandelEvent::KandelPopulated(_) => "KandelPopulated",
                KandelEvent::KandelRetracted(_) => "KandelRetracted",
            },
            DomainEvent::RestingOrder(e) => match e {
                RestingOrderEvent::RestingOrderPosted(_) => "RestingOrderPosted",
                RestingOrderEvent::RestingOrderExpirySet(_) => "RestingOrderExpirySet",
            },
            DomainEvent::Token(e) => match e {
                TokenEvent::TokenRegistered(_) => "TokenRegistered",
            },
        }
    }
}

// ── Venue core stream ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VenueEvent {
    VenueCreated(VenueCreated),
    VenueParamsUpdated(VenueParamsUpdated),
    VenueKilled(VenueKilled),
    OfferListParamsUpdated(OfferListParamsUpdated),
    OfferWritten(OfferWritten),
    OfferRetracted(OfferRetracted),
    OrderCompleted(OrderCompleted),
    MakerBalanceUpdated(MakerBalanceUpdated),
    TakerApprovalUpdated(TakerApprovalUpdated),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueCreated {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueKilled {}

/// Only the parameters present in the payload change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueParamsUpdated {
    #[serde(default)]
    pub governance: Option<Address>,
    #[serde(default)]
    pub monitor: Option<Address>,
    #[serde(default)]
    pub vault: Option<Address>,
    #[serde(default)]
    pub use_oracle: Option<bool>,
    #[serde(default)]
    pub notify: Option<bool>,
    #[serde(default)]
    pub gasprice: Option<u64>,
    #[serde(default)]
    pub gasmax: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferListParamsUpdated {
    pub ol_key: OfferListKey,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub density: Option<String>,
    #[serde(default)]
    pub gasbase: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferWritten {
    pub ol_key: OfferListKey,
    pub offer_id: u32,
    pub maker: Address,
    pub wants: RawAmount,
    pub gives: RawAmount,
    pub gasprice: u64,
    pub gasreq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRetracted {
    pub ol_key: OfferListKey,
    pub offer_id: u32,
    #[serde(default)]
    pub deprovision: bool,
}

/// One offer consumed by a market order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakenOfferFill {
    pub offer_id: u32,
    /// What the taker received from this offer (outbound token).
    pub taker_wants: RawAmount,
    /// What the taker paid to this offer (inbound token).
    pub taker_gives: RawAmount,
    #[serde(default)]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub posthook_fail_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCompleted {
    pub ol_key: OfferListKey,
    pub taker: Address,
    pub fill_wants: bool,
    pub taker_got: RawAmount,
    pub taker_gave: RawAmount,
    pub penalty: RawAmount,
    pub fee_paid: RawAmount,
    pub taken_offers: Vec<TakenOfferFill>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakerBalanceUpdated {
    pub maker: Address,
    pub delta: SignedAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakerApprovalUpdated {
    pub ol_key: OfferListKey,
    pub owner: Address,
    pub spender: Address,
    pub value: RawAmount,
}

// ── Market-making strategy stream ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KandelEvent {
    KandelCreated(KandelCreated),
    KandelParamsSet(KandelParamsSet),
    KandelCredited(KandelTransfer),
    KandelDebited(KandelTransfer),
    KandelAdminSet(KandelAdminSet),
    KandelRouterSet(KandelRouterSet),
    KandelPopulated(KandelPopulated),
    KandelRetracted(KandelRetracted),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandelCreated {
    pub owner: Address,
    pub venue: Address,
    pub base: Address,
    pub quote: Address,
    /// Defaults to the strategy contract itself.
    #[serde(default)]
    pub reserve: Option<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandelParamsSet {
    #[serde(default)]
    pub gasprice: Option<u64>,
    #[serde(default)]
    pub gasreq: Option<u64>,
    #[serde(default)]
    pub step_size: Option<u64>,
    #[serde(default)]
    pub price_points: Option<u64>,
    #[serde(default)]
    pub base_quote_tick_offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandelTransfer {
    pub token: Address,
    pub amount: RawAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KandelAdminSet {
    pub admin: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KandelRouterSet {
    pub router: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandelOffer {
    pub side: OfferSide,
    pub index: u32,
    pub offer_id: u32,
    pub wants: RawAmount,
    pub gives: RawAmount,
    pub gasprice: u64,
    pub gasreq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KandelPopulated {
    pub offers: Vec<KandelOffer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KandelRetraction {
    pub side: OfferSide,
    pub offer_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KandelRetracted {
    pub offers: Vec<KandelRetraction>,
}

// ── Resting-order strategy stream ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RestingOrderEvent {
    RestingOrderPosted(RestingOrderPosted),
    RestingOrderExpirySet(RestingOrderExpirySet),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestingOrderPosted {
    pub venue: Address,
    pub ol_key: OfferListKey,
    pub owner: Address,
    pub fill_or_kill: bool,
    pub fill_wants: bool,
    pub taker_wants: RawAmount,
    pub taker_gives: RawAmount,
    pub taker_got: RawAmount,
    pub taker_gave: RawAmount,
    pub fee: RawAmount,
    /// Residual offer posted on the opposite book, if any.
    #[serde(default)]
    pub resting_offer_id: Option<u32>,
    #[serde(default)]
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestingOrderExpirySet {
    pub venue: Address,
    pub ol_key: OfferListKey,
    pub offer_id: u32,
    #[serde(default)]
    pub expiry: Option<u64>,
}

// ── Token registry stream ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TokenEvent {
    TokenRegistered(TokenRegistered),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRegistered {
    pub token: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}
