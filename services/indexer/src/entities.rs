//! Versioned entities
//!
//! Each entity kind is a marker type implementing [`VersionedEntity`]:
//! immutable keys live on the entity row, business fields on every version.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use venue_store::VersionedEntity;
use venue_types::ids::{
    Address, ChainId, MakerBalanceId, OfferId, OfferListId, StrategyId, TakerApprovalId,
    TokenBalanceId, VenueId,
};
use venue_types::numeric::{price, price_number, to_number, RawAmount};

// ── Venue ───────────────────────────────────────────────────────────

pub struct Venue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueKeys {
    pub chain: ChainId,
    pub address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueFields {
    pub governance: Option<Address>,
    pub monitor: Option<Address>,
    pub vault: Option<Address>,
    pub use_oracle: bool,
    pub notify: bool,
    pub gasprice: u64,
    pub gasmax: u64,
    pub dead: bool,
}

impl VersionedEntity for Venue {
    const TABLE: &'static str = "venue";
    const VERSION_TABLE: &'static str = "venue_version";
    type Id = VenueId;
    type Keys = VenueKeys;
    type Fields = VenueFields;
}

// ── Offer list ──────────────────────────────────────────────────────

pub struct OfferList;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferListKeys {
    pub venue: String,
    pub outbound: Address,
    pub inbound: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferListFields {
    pub active: bool,
    pub fee: u64,
    pub density: String,
    pub gasbase: u64,
}

impl Default for OfferListFields {
    fn default() -> Self {
        Self {
            active: false,
            fee: 0,
            density: "0".to_string(),
            gasbase: 0,
        }
    }
}

impl VersionedEntity for OfferList {
    const TABLE: &'static str = "offer_list";
    const VERSION_TABLE: &'static str = "offer_list_version";
    type Id = OfferListId;
    type Keys = OfferListKeys;
    type Fields = OfferListFields;
}

// ── Offer ───────────────────────────────────────────────────────────

pub struct Offer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferKeys {
    pub offer_list: String,
    pub offer_number: u32,
    pub maker: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferFields {
    pub wants: RawAmount,
    pub gives: RawAmount,
    pub wants_number: f64,
    pub gives_number: f64,
    pub taker_pays_price: Option<Decimal>,
    pub maker_pays_price: Option<Decimal>,
    pub taker_pays_price_number: Option<f64>,
    pub maker_pays_price_number: Option<f64>,
    pub gasprice: u64,
    pub gasreq: u64,
    pub live: bool,
    pub deleted: bool,
    pub is_filled: bool,
    pub is_failed: bool,
    pub failed_reason: Option<String>,
    pub posthook_fail_reason: Option<String>,
    /// Strategy event that wrote this version, if any.
    pub strategy_event_id: Option<String>,
}

/// Normalized quantities and cross prices of one offer write.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferQuote {
    pub wants: RawAmount,
    pub gives: RawAmount,
    pub wants_number: f64,
    pub gives_number: f64,
    pub taker_pays_price: Option<Decimal>,
    pub maker_pays_price: Option<Decimal>,
}

impl OfferQuote {
    /// `wants` is in the inbound token, `gives` in the outbound token.
    pub fn new(wants: RawAmount, gives: RawAmount, inbound_decimals: u8, outbound_decimals: u8) -> Self {
        let wants_norm = wants.normalized(inbound_decimals);
        let gives_norm = gives.normalized(outbound_decimals);
        Self {
            wants,
            gives,
            wants_number: to_number(&wants_norm),
            gives_number: to_number(&gives_norm),
            taker_pays_price: price(&wants_norm, &gives_norm),
            maker_pays_price: price(&gives_norm, &wants_norm),
        }
    }
}

impl OfferFields {
    /// Fields of a fresh write: quote applied, every terminal flag cleared.
    pub fn written(
        self,
        quote: &OfferQuote,
        gasprice: u64,
        gasreq: u64,
        strategy_event_id: Option<String>,
    ) -> Self {
        Self {
            wants: quote.wants,
            gives: quote.gives,
            wants_number: quote.wants_number,
            gives_number: quote.gives_number,
            taker_pays_price: quote.taker_pays_price,
            maker_pays_price: quote.maker_pays_price,
            taker_pays_price_number: price_number(quote.taker_pays_price),
            maker_pays_price_number: price_number(quote.maker_pays_price),
            gasprice,
            gasreq,
            live: !quote.gives.is_zero(),
            deleted: false,
            is_filled: false,
            is_failed: false,
            failed_reason: None,
            posthook_fail_reason: None,
            strategy_event_id,
        }
    }

    pub fn retracted(self, strategy_event_id: Option<String>) -> Self {
        Self {
            live: false,
            deleted: true,
            strategy_event_id,
            ..self
        }
    }

    /// Consumed by a market order, successfully or not.
    pub fn taken(self, fail_reason: Option<String>, posthook_fail_reason: Option<String>) -> Self {
        Self {
            live: false,
            deleted: true,
            is_filled: fail_reason.is_none(),
            is_failed: fail_reason.is_some(),
            failed_reason: fail_reason,
            posthook_fail_reason,
            ..self
        }
    }
}

impl VersionedEntity for Offer {
    const TABLE: &'static str = "offer";
    const VERSION_TABLE: &'static str = "offer_version";
    type Id = OfferId;
    type Keys = OfferKeys;
    type Fields = OfferFields;
}

// ── Balances and approvals ──────────────────────────────────────────

pub struct MakerBalance;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakerBalanceKeys {
    pub venue: String,
    pub maker: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceFields {
    pub balance: RawAmount,
}

impl VersionedEntity for MakerBalance {
    const TABLE: &'static str = "maker_balance";
    const VERSION_TABLE: &'static str = "maker_balance_version";
    type Id = MakerBalanceId;
    type Keys = MakerBalanceKeys;
    type Fields = BalanceFields;
}

pub struct TakerApproval;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakerApprovalKeys {
    pub offer_list: String,
    pub owner: Address,
    pub spender: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakerApprovalFields {
    pub value: RawAmount,
}

impl VersionedEntity for TakerApproval {
    const TABLE: &'static str = "taker_approval";
    const VERSION_TABLE: &'static str = "taker_approval_version";
    type Id = TakerApprovalId;
    type Keys = TakerApprovalKeys;
    type Fields = TakerApprovalFields;
}

pub struct TokenBalance;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceKeys {
    pub reserve: String,
    pub token: Address,
}

impl VersionedEntity for TokenBalance {
    const TABLE: &'static str = "token_balance";
    const VERSION_TABLE: &'static str = "token_balance_version";
    type Id = TokenBalanceId;
    type Keys = TokenBalanceKeys;
    type Fields = BalanceFields;
}

// ── Market-making strategy ──────────────────────────────────────────

pub struct Strategy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyKeys {
    pub chain: ChainId,
    pub address: Address,
    pub venue: Address,
    pub base: Address,
    pub quote: Address,
    pub reserve: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyFields {
    pub admin: Address,
    pub router: Option<Address>,
    pub gasprice: u64,
    pub gasreq: u64,
    pub step_size: u64,
    pub price_points: u64,
    pub base_quote_tick_offset: i64,
    /// Kind of the event that produced this version.
    pub last_event: String,
}

impl StrategyFields {
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            router: None,
            gasprice: 0,
            gasreq: 0,
            step_size: 0,
            price_points: 0,
            base_quote_tick_offset: 0,
            last_event: String::new(),
        }
    }
}

impl VersionedEntity for Strategy {
    const TABLE: &'static str = "strategy";
    const VERSION_TABLE: &'static str = "strategy_version";
    type Id = StrategyId;
    type Keys = StrategyKeys;
    type Fields = StrategyFields;
}

// ── Resting order ───────────────────────────────────────────────────

pub struct StrategyOrder;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOrderKeys {
    pub offer_list: String,
    pub owner: Address,
    pub resting_offer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyOrderFields {
    pub fill_or_kill: bool,
    pub fill_wants: bool,
    pub taker_wants: RawAmount,
    pub taker_gives: RawAmount,
    pub taker_got: RawAmount,
    pub taker_gave: RawAmount,
    pub fee: RawAmount,
    pub expiry: Option<u64>,
    pub filled: bool,
    pub cancelled: bool,
}

impl StrategyOrderFields {
    /// A want-denominated order is filled once it got what it wanted net
    /// of fees; a give-denominated one once it gave everything.
    pub fn is_filled(&self) -> bool {
        if self.fill_wants {
            self.taker_got
                .checked_add(self.fee)
                .map(|got| got == self.taker_wants)
                .unwrap_or(false)
        } else {
            self.taker_gave == self.taker_gives
        }
    }
}

impl VersionedEntity for StrategyOrder {
    const TABLE: &'static str = "strategy_order";
    const VERSION_TABLE: &'static str = "strategy_order_version";
    /// Rendered [`venue_types::ids::StrategyOrderId`]; links and event logs store it as a string.
    type Id = String;
    type Keys = StrategyOrderKeys;
    type Fields = StrategyOrderFields;
}
