//! Types library for the venue event indexer
//!
//! Pure value types shared by the store and the indexer: deterministic
//! entity identifiers and the numeric helpers used to normalize on-chain
//! amounts. Nothing in this crate performs I/O.
//!
//! # Modules
//! - `ids`: Composite identifiers rendered to stable primary-key strings
//! - `numeric`: Raw amounts, exact decimal shifting, prices
//! - `errors`: Error taxonomy

pub mod errors;
pub mod ids;
pub mod numeric;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
}
