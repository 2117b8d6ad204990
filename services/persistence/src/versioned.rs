//! Versioned entity store
//!
//! Append-only version chains with undo.
//!
//! An entity is stored as two kinds of rows:
//!
//! ```text
//! <TABLE>          { id, keys, currentVersionId }
//! <VERSION_TABLE>  { id, entityId, txId, versionNumber, prevVersionId, fields }
//! ```
//!
//! Version rows are addressed by `<entityId>-<versionNumber>` and link back
//! to their predecessor by key, so the store itself is the arena holding the
//! chain. This module is the only code that writes either table; everything
//! else goes through [`append_version`] and [`delete_latest_version`].
//!
//! Invariants maintained here:
//! - an entity row exists only while it has at least one version;
//! - `currentVersionId` names the version with the highest number;
//! - version numbers of one entity are `0..=N` without gaps;
//! - undo removes exactly the current version and nothing else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};
use thiserror::Error;
use tracing::trace;

use venue_types::ids::{TransactionId, VersionId};

use crate::error::StoreError;
use crate::store::Transaction;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Entity {entity} does not exist and no construction data was given")]
    MissingConstructionArgs { entity: String },

    #[error("Current version {version} of entity {entity} not found")]
    CurrentVersionNotFound { entity: String, version: String },

    #[error("Entity {entity} not found")]
    EntityNotFound { entity: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl VersionError {
    pub fn is_transient(&self) -> bool {
        match self {
            VersionError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

// ── Entity definition ───────────────────────────────────────────────

/// A kind of versioned entity.
///
/// `Keys` are written once, on the entity row, when the entity is created.
/// `Fields` are the mutable business fields copied into every version row.
pub trait VersionedEntity: Send + Sync + 'static {
    const TABLE: &'static str;
    const VERSION_TABLE: &'static str;

    type Id: Display + Send + Sync;
    type Keys: Serialize + DeserializeOwned + Clone + Debug + Send + Sync;
    type Fields: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync;
}

/// Data needed to create an entity on its first version.
pub struct Construct<E: VersionedEntity> {
    pub keys: E::Keys,
    pub fields: E::Fields,
}

impl<E: VersionedEntity> Construct<E> {
    pub fn new(keys: E::Keys, fields: E::Fields) -> Self {
        Self { keys, fields }
    }
}

impl<E: VersionedEntity> Debug for Construct<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Construct")
            .field("keys", &self.keys)
            .field("fields", &self.fields)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRow<K> {
    pub id: String,
    pub keys: K,
    pub current_version_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version<F> {
    pub id: String,
    pub entity_id: String,
    pub tx_id: String,
    pub version_number: u64,
    pub prev_version_id: Option<String>,
    pub fields: F,
}

/// What [`delete_latest_version`] removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undone {
    /// A version was removed; the entity now points at `current`.
    Version { removed: String, current: String },
    /// Version 0 was removed together with the entity.
    Entity { id: String },
}

// ── Row access ──────────────────────────────────────────────────────

async fn load_row<T: DeserializeOwned>(
    tx: &mut (dyn Transaction + '_),
    table: &str,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match tx.get(table, key).await? {
        Some(row) => serde_json::from_value(row)
            .map(Some)
            .map_err(|e| StoreError::serialization(table, key, e)),
        None => Ok(None),
    }
}

async fn store_row<T: Serialize + Sync>(
    tx: &mut (dyn Transaction + '_),
    table: &str,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let row = serde_json::to_value(value).map_err(|e| StoreError::serialization(table, key, e))?;
    tx.upsert(table, key, row).await
}

/// Load the entity row, if the entity exists.
pub async fn get_entity<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
) -> Result<Option<EntityRow<E::Keys>>, VersionError> {
    Ok(load_row(tx, E::TABLE, &id.to_string()).await?)
}

/// Load a version row by its key.
pub async fn get_version<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    version_id: &str,
) -> Result<Option<Version<E::Fields>>, VersionError> {
    Ok(load_row(tx, E::VERSION_TABLE, version_id).await?)
}

async fn resolve_current<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    entity: &EntityRow<E::Keys>,
) -> Result<Version<E::Fields>, VersionError> {
    get_version::<E>(tx, &entity.current_version_id)
        .await?
        .ok_or_else(|| VersionError::CurrentVersionNotFound {
            entity: entity.id.clone(),
            version: entity.current_version_id.clone(),
        })
}

/// Current version of an existing entity.
pub async fn get_current_version<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
) -> Result<Version<E::Fields>, VersionError> {
    let entity = get_entity::<E>(tx, id)
        .await?
        .ok_or_else(|| VersionError::EntityNotFound {
            entity: id.to_string(),
        })?;
    resolve_current::<E>(tx, &entity).await
}

/// Current version, or `None` if the entity does not exist.
///
/// A dangling pointer is still an error.
pub async fn find_current_version<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
) -> Result<Option<Version<E::Fields>>, VersionError> {
    match get_entity::<E>(tx, id).await? {
        Some(entity) => resolve_current::<E>(tx, &entity).await.map(Some),
        None => Ok(None),
    }
}

// ── Append / Undo ───────────────────────────────────────────────────

/// Append a new version to `id`, creating the entity if it does not exist.
///
/// For a new entity `construct` is required: version 0 starts from
/// `construct.fields` and `update` is applied to it. For an existing entity
/// the next version starts from a copy of the current fields. `construct`
/// is ignored when the entity already exists.
pub async fn append_version<E, U>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
    tx_id: &TransactionId,
    update: U,
    construct: Option<Construct<E>>,
) -> Result<Version<E::Fields>, VersionError>
where
    E: VersionedEntity,
    U: FnOnce(E::Fields) -> E::Fields + Send,
{
    let entity_key = id.to_string();

    let (entity, version) = match get_entity::<E>(tx, id).await? {
        None => {
            let construct = construct.ok_or_else(|| VersionError::MissingConstructionArgs {
                entity: entity_key.clone(),
            })?;
            let version_id = VersionId::new(&entity_key, 0).to_string();
            let entity = EntityRow {
                id: entity_key.clone(),
                keys: construct.keys,
                current_version_id: version_id.clone(),
            };
            let version = Version {
                id: version_id,
                entity_id: entity_key.clone(),
                tx_id: tx_id.to_string(),
                version_number: 0,
                prev_version_id: None,
                fields: update(construct.fields),
            };
            (entity, version)
        }
        Some(mut entity) => {
            let current = resolve_current::<E>(tx, &entity).await?;
            let number = current.version_number + 1;
            let version_id = VersionId::new(&entity_key, number).to_string();
            entity.current_version_id = version_id.clone();
            let version = Version {
                id: version_id,
                entity_id: entity_key.clone(),
                tx_id: tx_id.to_string(),
                version_number: number,
                prev_version_id: Some(current.id),
                fields: update(current.fields),
            };
            (entity, version)
        }
    };

    store_row(tx, E::VERSION_TABLE, &version.id, &version).await?;
    store_row(tx, E::TABLE, &entity_key, &entity).await?;
    trace!(
        entity = %entity_key,
        version = version.version_number,
        table = E::TABLE,
        "Appended version"
    );
    Ok(version)
}

/// Remove the current version of `id`; removes the entity with version 0.
pub async fn delete_latest_version<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
) -> Result<Undone, VersionError> {
    let entity_key = id.to_string();
    let mut entity = get_entity::<E>(tx, id)
        .await?
        .ok_or_else(|| VersionError::EntityNotFound {
            entity: entity_key.clone(),
        })?;
    let current = resolve_current::<E>(tx, &entity).await?;

    tx.delete(E::VERSION_TABLE, &current.id).await?;
    let undone = match current.prev_version_id {
        None => {
            tx.delete(E::TABLE, &entity_key).await?;
            Undone::Entity { id: entity_key }
        }
        Some(prev) => {
            entity.current_version_id = prev.clone();
            store_row(tx, E::TABLE, &entity_key, &entity).await?;
            Undone::Version {
                removed: current.id,
                current: prev,
            }
        }
    };
    trace!(table = E::TABLE, undone = ?undone, "Deleted latest version");
    Ok(undone)
}

/// Walk the chain from the current version back to version 0.
///
/// Returns versions newest first. Fails if a link is missing or the chain
/// does not step down by exactly one.
pub async fn version_chain<E: VersionedEntity>(
    tx: &mut (dyn Transaction + '_),
    id: &E::Id,
) -> Result<Vec<Version<E::Fields>>, VersionError> {
    let mut chain = Vec::new();
    let mut next = Some(get_current_version::<E>(tx, id).await?);
    while let Some(version) = next {
        next = match &version.prev_version_id {
            Some(prev) => {
                let prev_version = get_version::<E>(tx, prev).await?.ok_or_else(|| {
                    VersionError::CurrentVersionNotFound {
                        entity: version.entity_id.clone(),
                        version: prev.clone(),
                    }
                })?;
                if prev_version.version_number + 1 != version.version_number {
                    return Err(VersionError::CurrentVersionNotFound {
                        entity: version.entity_id.clone(),
                        version: prev.clone(),
                    });
                }
                Some(prev_version)
            }
            None => None,
        };
        chain.push(version);
    }
    Ok(chain)
}

// ── Tests ───────────────────────────────────────────────────────────
