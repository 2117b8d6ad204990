//! Handler context
//!
//! Carries the batch transaction and the envelope of the event being
//! applied, and records which versions the forward pass appends so the
//! `event_log` row (and later the undo) knows exactly what was touched.

use chrono::{DateTime, Utc};
use venue_store::{
    append_version, delete_latest_version, find_current_version, get_entity, Construct,
    EntityRow, Transaction, TransactionExt, Undone, Version, VersionedEntity,
};
use venue_types::ids::{AccountId, Address, ChainId, EventId, TransactionId, VenueId};

use crate::events::{DecodedEvent, TxInfo};
use crate::handlers::HandlerError;
use crate::records::{Account, EntityRef, EventLog, TransactionRecord};

pub struct HandlerContext<'a> {
    pub tx: &'a mut dyn Transaction,
    pub chain: ChainId,
    /// Contract that emitted the event.
    pub emitter: Address,
    pub transaction_id: TransactionId,
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub undo: bool,
    /// On undo, the log row written when the event was applied.
    pub logged: Option<EventLog>,
    touched: Vec<EntityRef>,
    created: Vec<String>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        tx: &'a mut dyn Transaction,
        event: &DecodedEvent,
        timestamp: DateTime<Utc>,
        undo: bool,
    ) -> Self {
        Self {
            tx,
            chain: event.chain,
            emitter: event.address.clone(),
            transaction_id: event.transaction_id(),
            event_id: event.event_id(),
            timestamp,
            undo,
            logged: None,
            touched: Vec::new(),
            created: Vec::new(),
        }
    }

    /// The emitter seen as a venue.
    pub fn venue_id(&self) -> VenueId {
        VenueId::new(self.chain, self.emitter.clone())
    }

    pub fn touched(&self) -> &[EntityRef] {
        &self.touched
    }

    // ── Versioned entities ──────────────────────────────────────────

    /// Append a version and remember it for the event log.
    pub async fn append<E, U>(
        &mut self,
        id: &E::Id,
        update: U,
        construct: Option<Construct<E>>,
    ) -> Result<Version<E::Fields>, HandlerError>
    where
        E: VersionedEntity,
        U: FnOnce(E::Fields) -> E::Fields + Send,
    {
        let version =
            append_version::<E, U>(&mut *self.tx, id, &self.transaction_id, update, construct)
                .await?;
        self.touched.push(EntityRef {
            table: E::TABLE.to_string(),
            id: version.entity_id.clone(),
        });
        Ok(version)
    }

    pub async fn undo_latest<E: VersionedEntity>(
        &mut self,
        id: &E::Id,
    ) -> Result<Undone, HandlerError> {
        Ok(delete_latest_version::<E>(&mut *self.tx, id).await?)
    }

    pub async fn current<E: VersionedEntity>(
        &mut self,
        id: &E::Id,
    ) -> Result<Option<Version<E::Fields>>, HandlerError> {
        Ok(find_current_version::<E>(&mut *self.tx, id).await?)
    }

    /// Current version of an entity the event refers to; absence is structural.
    pub async fn require<E: VersionedEntity>(
        &mut self,
        id: &E::Id,
        kind: &'static str,
    ) -> Result<Version<E::Fields>, HandlerError> {
        self.current::<E>(id)
            .await?
            .ok_or_else(|| HandlerError::missing(kind, id))
    }

    pub async fn require_entity<E: VersionedEntity>(
        &mut self,
        id: &E::Id,
        kind: &'static str,
    ) -> Result<EntityRow<E::Keys>, HandlerError> {
        get_entity::<E>(&mut *self.tx, id)
            .await?
            .ok_or_else(|| HandlerError::missing(kind, id))
    }

    /// Ids of `E` entities the forward pass versioned, newest first.
    pub fn logged_ids<E: VersionedEntity>(&self) -> Vec<String> {
        self.logged
            .iter()
            .flat_map(|log| log.entities.iter().rev())
            .filter(|entity| entity.table == E::TABLE)
            .map(|entity| entity.id.clone())
            .collect()
    }

    // ── Records ─────────────────────────────────────────────────────

    /// Mark a record as inserted by this event.
    pub fn created(&mut self, key: impl Into<String>) {
        self.created.push(key.into());
    }

    /// On undo: whether the forward pass inserted `key`.
    pub fn was_created(&self, key: &str) -> bool {
        self.logged
            .as_ref()
            .map(|log| log.created.iter().any(|k| k == key))
            .unwrap_or(false)
    }

    pub async fn ensure_account(&mut self, address: &Address) -> Result<(), HandlerError> {
        let id = AccountId::new(self.chain, address.clone());
        self.tx
            .ensure(&Account {
                id: id.to_string(),
                chain: self.chain,
                address: address.clone(),
            })
            .await?;
        Ok(())
    }

    pub async fn ensure_transaction(&mut self, info: &TxInfo) -> Result<(), HandlerError> {
        self.tx
            .ensure(&TransactionRecord {
                id: self.transaction_id.to_string(),
                chain: self.chain,
                hash: info.hash.to_string(),
                from: info.from.clone(),
                block_number: info.block_number,
                block_hash: info.block_hash.clone(),
                timestamp: self.timestamp,
            })
            .await?;
        Ok(())
    }

    /// Build the event-log row for what the forward pass did.
    pub fn log_entry(&self, kind: &str) -> EventLog {
        EventLog {
            id: self.event_id.to_string(),
            kind: kind.to_string(),
            emitter: self.emitter.clone(),
            transaction_id: self.transaction_id.to_string(),
            timestamp: self.timestamp,
            entities: self.touched.clone(),
            created: self.created.clone(),
        }
    }
}
