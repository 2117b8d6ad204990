//! Deterministic identifiers for indexed entities
//!
//! Every identifier is composed of its parent identifiers plus a
//! discriminator and renders to a stable, human-inspectable string that is
//! used as the primary key in the relational store. Components are joined
//! with `-`; addresses and hashes are lower-cased on construction, so two
//! identifiers are equal exactly when their rendered strings are equal.
//!
//! Identifiers are pure values: constructing one never performs I/O and an
//! identifier never changes once built.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::IdError;

const ADDRESS_HEX_LEN: usize = 40;
const HASH_HEX_LEN: usize = 64;

fn normalize_hex(raw: &str, expected_len: usize) -> Option<String> {
    let lower = raw.trim().to_ascii_lowercase();
    let digits = lower.strip_prefix("0x")?;
    if digits.len() != expected_len || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(lower)
}

// ── Primitive components ────────────────────────────────────────────

/// A 20-byte account or contract address, stored as `0x`-prefixed lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        normalize_hex(raw, ADDRESS_HEX_LEN)
            .map(Self)
            .ok_or_else(|| IdError::InvalidAddress(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Address {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 32-byte transaction hash, stored as `0x`-prefixed lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        normalize_hex(raw, HASH_HEX_LEN)
            .map(Self)
            .ok_or_else(|| IdError::InvalidHash(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TxHash {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxHash> for String {
    fn from(hash: TxHash) -> Self {
        hash.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Chain-scoped identifiers ────────────────────────────────────────

/// A venue contract instance on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VenueId {
    pub chain: ChainId,
    pub address: Address,
}

impl VenueId {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self { chain, address }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.address)
    }
}

/// An ERC-20 token on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenId {
    pub chain: ChainId,
    pub address: Address,
}

impl TokenId {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self { chain, address }
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.address)
    }
}

/// Any externally visible account (maker, taker, owner, reserve).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId {
    pub chain: ChainId,
    pub address: Address,
}

impl AccountId {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self { chain, address }
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.address)
    }
}

/// An on-chain transaction; provenance for every version row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId {
    pub chain: ChainId,
    pub hash: TxHash,
}

impl TransactionId {
    pub fn new(chain: ChainId, hash: TxHash) -> Self {
        Self { chain, hash }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.hash)
    }
}

/// One decoded log within a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    pub tx: TransactionId,
    pub log_index: u32,
}

impl EventId {
    pub fn new(tx: TransactionId, log_index: u32) -> Self {
        Self { tx, log_index }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.tx, self.log_index)
    }
}

// ── Offer book identifiers ──────────────────────────────────────────

/// Directed trading pair: offers give `outbound` and want `inbound`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OfferListKey {
    pub outbound: Address,
    pub inbound: Address,
}

impl OfferListKey {
    pub fn new(outbound: Address, inbound: Address) -> Self {
        Self { outbound, inbound }
    }

    /// The same pair seen from the other side of the book.
    pub fn flipped(&self) -> Self {
        Self {
            outbound: self.inbound.clone(),
            inbound: self.outbound.clone(),
        }
    }
}

impl fmt::Display for OfferListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.outbound, self.inbound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferListId {
    pub venue: VenueId,
    pub key: OfferListKey,
}

impl OfferListId {
    pub fn new(venue: VenueId, key: OfferListKey) -> Self {
        Self { venue, key }
    }

    pub fn outbound_token(&self) -> TokenId {
        TokenId::new(self.venue.chain, self.key.outbound.clone())
    }

    pub fn inbound_token(&self) -> TokenId {
        TokenId::new(self.venue.chain, self.key.inbound.clone())
    }
}

impl fmt::Display for OfferListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.venue, self.key)
    }
}

/// A resting offer, numbered within its offer list by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferId {
    pub offer_list: OfferListId,
    pub number: u32,
}

impl OfferId {
    pub fn new(offer_list: OfferListId, number: u32) -> Self {
        Self { offer_list, number }
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.offer_list, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MakerBalanceId {
    pub venue: VenueId,
    pub maker: Address,
}

impl MakerBalanceId {
    pub fn new(venue: VenueId, maker: Address) -> Self {
        Self { venue, maker }
    }
}

impl fmt::Display for MakerBalanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.venue, self.maker)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TakerApprovalId {
    pub offer_list: OfferListId,
    pub owner: Address,
    pub spender: Address,
}

impl TakerApprovalId {
    pub fn new(offer_list: OfferListId, owner: Address, spender: Address) -> Self {
        Self {
            offer_list,
            owner,
            spender,
        }
    }
}

impl fmt::Display for TakerApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.offer_list, self.owner, self.spender)
    }
}

/// A market order settled against the book.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderId {
    pub offer_list: OfferListId,
    pub event: EventId,
}

impl OrderId {
    pub fn new(offer_list: OfferListId, event: EventId) -> Self {
        Self { offer_list, event }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.offer_list, self.event)
    }
}

/// One offer consumed by an order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TakenOfferId {
    pub order: OrderId,
    pub offer_number: u32,
}

impl TakenOfferId {
    pub fn new(order: OrderId, offer_number: u32) -> Self {
        Self {
            order,
            offer_number,
        }
    }
}

impl fmt::Display for TakenOfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.order, self.offer_number)
    }
}

// ── Strategy identifiers ────────────────────────────────────────────

/// A market-making strategy contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrategyId {
    pub chain: ChainId,
    pub address: Address,
}

impl StrategyId {
    pub fn new(chain: ChainId, address: Address) -> Self {
        Self { chain, address }
    }

    /// The strategy contract seen as an account (it holds reserves, makes offers).
    pub fn as_account(&self) -> AccountId {
        AccountId::new(self.chain, self.address.clone())
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain, self.address)
    }
}

/// One event emitted by a strategy; tags the offers that event wrote.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrategyEventId {
    pub strategy: StrategyId,
    pub event: EventId,
}

impl StrategyEventId {
    pub fn new(strategy: StrategyId, event: EventId) -> Self {
        Self { strategy, event }
    }
}

impl fmt::Display for StrategyEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.strategy, self.event)
    }
}

/// Side of the book a strategy offer rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferSide {
    Bid,
    Ask,
}

impl OfferSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferSide::Bid => "bid",
            OfferSide::Ask => "ask",
        }
    }
}

impl fmt::Display for OfferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy-local offer slot (`side`, `index`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrategyOfferIndexId {
    pub strategy: StrategyId,
    pub side: OfferSide,
    pub index: u32,
}

impl StrategyOfferIndexId {
    pub fn new(strategy: StrategyId, side: OfferSide, index: u32) -> Self {
        Self {
            strategy,
            side,
            index,
        }
    }
}

impl fmt::Display for StrategyOfferIndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.strategy, self.side, self.index)
    }
}

/// A resting order placed through the resting-order strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StrategyOrderId {
    pub offer_list: OfferListId,
    pub event: EventId,
}

impl StrategyOrderId {
    pub fn new(offer_list: OfferListId, event: EventId) -> Self {
        Self { offer_list, event }
    }
}

impl fmt::Display for StrategyOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.offer_list, self.event)
    }
}

/// Balance of one token held in a reserve account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenBalanceId {
    pub reserve: AccountId,
    pub token: Address,
}

impl TokenBalanceId {
    pub fn new(reserve: AccountId, token: Address) -> Self {
        Self { reserve, token }
    }
}

impl fmt::Display for TokenBalanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.reserve, self.token)
    }
}

// ── Version identifiers ─────────────────────────────────────────────

/// Key of one version row: `<entity>-<versionNumber>`.
///
/// Versions are addressed by key rather than by reference, so a version
/// chain is a backward-linked list of rows in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionId {
    pub entity: String,
    pub number: u64,
}

impl VersionId {
    pub fn new(entity: impl fmt::Display, number: u64) -> Self {
        Self {
            entity: entity.to_string(),
            number,
        }
    }

    /// The version this one was derived from; `None` for version 0.
    pub fn previous(&self) -> Option<Self> {
        self.number.checked_sub(1).map(|number| Self {
            entity: self.entity.clone(),
            number,
        })
    }

    pub fn next(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            number: self.number + 1,
        }
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity, self.number)
    }
}
