//! Payload decoder
//!
//! Turns raw stream bytes into a [`DecodedEvent`] for the stream's
//! configured [`StreamSchema`]. Three outcomes matter to the consumer:
//!
//! - malformed payloads and events of another family than the stream's
//!   schema are handled per [`MalformedPolicy`] (fail the batch or skip the
//!   record with a warning);
//! - an event `type` nobody knows is always fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::warn;
use venue_types::ids::{Address, ChainId};

use crate::events::{
    DecodedEvent, DomainEvent, KandelEvent, RestingOrderEvent, TokenEvent, TokenRegistered, TxInfo,
    VenueEvent,
};

/// Largest token precision accepted from the registry.
pub const MAX_TOKEN_DECIMALS: u8 = 36;

// ── Schemas and policy ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamSchema {
    Venue,
    Kandel,
    RestingOrder,
    TokenRegistry,
}

impl StreamSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSchema::Venue => "venue",
            StreamSchema::Kandel => "kandel",
            StreamSchema::RestingOrder => "resting-order",
            StreamSchema::TokenRegistry => "token-registry",
        }
    }

    /// Registry records are skipped when malformed or foreign; every other stream fails.
    pub fn default_policy(&self) -> MalformedPolicy {
        match self {
            StreamSchema::TokenRegistry => MalformedPolicy::Skip,
            _ => MalformedPolicy::Fail,
        }
    }
}

impl fmt::Display for StreamSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Abort the batch.
    Fail,
    /// Log, count and move past the record.
    Skip,
}

/// Event type tags and the family each belongs to.
const EVENT_TYPES: &[(&str, StreamSchema)] = &[
    ("VenueCreated", StreamSchema::Venue),
    ("VenueParamsUpdated", StreamSchema::Venue),
    ("VenueKilled", StreamSchema::Venue),
    ("OfferListParamsUpdated", StreamSchema::Venue),
    ("OfferWritten", StreamSchema::Venue),
    ("OfferRetracted", StreamSchema::Venue),
    ("OrderCompleted", StreamSchema::Venue),
    ("MakerBalanceUpdated", StreamSchema::Venue),
    ("TakerApprovalUpdated", StreamSchema::Venue),
    ("KandelCreated", StreamSchema::Kandel),
    ("KandelParamsSet", StreamSchema::Kandel),
    ("KandelCredited", StreamSchema::Kandel),
    ("KandelDebited", StreamSchema::Kandel),
    ("KandelAdminSet", StreamSchema::Kandel),
    ("KandelRouterSet", StreamSchema::Kandel),
    ("KandelPopulated", StreamSchema::Kandel),
    ("KandelRetracted", StreamSchema::Kandel),
    ("RestingOrderPosted", StreamSchema::RestingOrder),
    ("RestingOrderExpirySet", StreamSchema::RestingOrder),
    ("TokenRegistered", StreamSchema::TokenRegistry),
];

pub fn family_of(event_type: &str) -> Option<StreamSchema> {
    EVENT_TYPES
        .iter()
        .find(|(name, _)| *name == event_type)
        .map(|(_, schema)| *schema)
}

// ── Errors / outcomes ───────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Malformed {schema} payload: {detail}")]
    Malformed { schema: StreamSchema, detail: String },

    #[error("Event {event_type} belongs to the {found} schema, stream is {expected}")]
    SchemaMismatch {
        expected: StreamSchema,
        found: StreamSchema,
        event_type: String,
    },

    #[error("Unknown event type {event_type} on {schema} stream")]
    UnknownEvent {
        schema: StreamSchema,
        event_type: String,
    },
}

impl DecodeError {
    fn malformed(schema: StreamSchema, detail: impl fmt::Display) -> Self {
        DecodeError::Malformed {
            schema,
            detail: detail.to_string(),
        }
    }

    /// Whether a [`MalformedPolicy`] may turn this error into a skip.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            DecodeError::Malformed { .. } | DecodeError::SchemaMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(DecodedEvent),
    Skipped { reason: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    chain_id: u64,
    address: Address,
    tx: TxInfo,
    event: Value,
}

// ── Decoding ────────────────────────────────────────────────────────

/// Strict decode of one payload against `schema`.
pub fn decode(schema: StreamSchema, payload: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let envelope: RawEnvelope =
        serde_json::from_slice(payload).map_err(|e| DecodeError::malformed(schema, e))?;

    let event_type = envelope
        .event
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DecodeError::malformed(schema, "event has no string `type` field"))?
        .to_string();

    let found = family_of(&event_type).ok_or_else(|| DecodeError::UnknownEvent {
        schema,
        event_type: event_type.clone(),
    })?;
    if found != schema {
        return Err(DecodeError::SchemaMismatch {
            expected: schema,
            found,
            event_type,
        });
    }

    let event = match schema {
        StreamSchema::Venue => DomainEvent::Venue(parse::<VenueEvent>(schema, envelope.event)?),
        StreamSchema::Kandel => DomainEvent::Kandel(parse::<KandelEvent>(schema, envelope.event)?),
        StreamSchema::RestingOrder => {
            DomainEvent::RestingOrder(parse::<RestingOrderEvent>(schema, envelope.event)?)
        }
        StreamSchema::TokenRegistry => {
            let event = parse::<TokenEvent>(schema, envelope.event)?;
            match &event {
                TokenEvent::TokenRegistered(token) => validate_token(token)
                    .map_err(|detail| DecodeError::malformed(schema, detail))?,
            }
            DomainEvent::Token(event)
        }
    };

    Ok(DecodedEvent {
        chain: ChainId(envelope.chain_id),
        address: envelope.address,
        tx: envelope.tx,
        event,
    })
}

fn parse<T: serde::de::DeserializeOwned>(
    schema: StreamSchema,
    event: Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(event).map_err(|e| DecodeError::malformed(schema, e))
}

fn validate_token(token: &TokenRegistered) -> Result<(), String> {
    for (field, value) in [("name", &token.name), ("symbol", &token.symbol)] {
        if value.is_empty() {
            return Err(format!("token {} has an empty {}", token.token, field));
        }
        if value.contains('\0') {
            return Err(format!("token {} {} contains NUL bytes", token.token, field));
        }
    }
    if token.decimals > MAX_TOKEN_DECIMALS {
        return Err(format!(
            "token {} has {} decimals (max {})",
            token.token, token.decimals, MAX_TOKEN_DECIMALS
        ));
    }
    Ok(())
}

/// Decoder bound to one stream: schema plus malformed-record policy.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    schema: StreamSchema,
    policy: MalformedPolicy,
}

impl Decoder {
    pub fn new(schema: StreamSchema, policy: MalformedPolicy) -> Self {
        Self { schema, policy }
    }

    pub fn with_default_policy(schema: StreamSchema) -> Self {
        Self::new(schema, schema.default_policy())
    }

    pub fn schema(&self) -> StreamSchema {
        self.schema
    }

    pub fn policy(&self) -> MalformedPolicy {
        self.policy
    }

    pub fn decode(&self, payload: &[u8]) -> Result<Decoded, DecodeError> {
        match decode(self.schema, payload) {
            Ok(event) => Ok(Decoded::Event(event)),
            Err(err) if err.is_skippable() && self.policy == MalformedPolicy::Skip => {
                warn!(schema = %self.schema, error = %err, "Skipping undecodable record");
                Ok(Decoded::Skipped {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}
