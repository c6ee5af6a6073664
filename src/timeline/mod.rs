//! Temporal reconciliation: sample-date discovery and the merge of every
//! extraction shape into one date-grouped result.

mod dates;
mod reconcile;
mod summary;
mod types;

pub use dates::*;
pub use reconcile::*;
pub use summary::*;
pub use types::*;

use thiserror::Error;

use crate::pipeline::structuring::ProviderError;

#[derive(Error, Debug)]
pub enum DateExtractionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Unusable date response: {0}")]
    InvalidResponse(String),

    #[error("Date response is not a JSON array")]
    NotAnArray,

    #[error("No model providers configured")]
    NoProviders,
}
