//! Domain handlers
//!
//! One module per event family. Every handler has a forward path and an
//! undo path; the undo removes exactly one version from every entity the
//! forward path versioned and deletes the records it created. Shared
//! `transaction`/`account` rows are ensured on the way forward and never
//! undone.

pub mod context;
pub mod kandel;
pub mod offer;
pub mod resting_order;
pub mod token;
pub mod venue;

use std::fmt::Display;
use thiserror::Error;
use venue_store::{StoreError, VersionError};
use venue_types::errors::AmountError;

pub use context::HandlerContext;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Version chain error: {0}")]
    Version(#[from] VersionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Amount error: {0}")]
    Amount(#[from] AmountError),

    /// A referenced entity or record does not exist (yet).
    #[error("Missing {kind} {id}")]
    MissingReference { kind: &'static str, id: String },
}

impl HandlerError {
    pub fn missing(kind: &'static str, id: impl Display) -> Self {
        HandlerError::MissingReference {
            kind,
            id: id.to_string(),
        }
    }

    /// Only store unavailability is worth retrying; everything else would
    /// fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            HandlerError::Version(e) => e.is_transient(),
            HandlerError::Store(e) => e.is_transient(),
            HandlerError::Amount(_) | HandlerError::MissingReference { .. } => false,
        }
    }
}
