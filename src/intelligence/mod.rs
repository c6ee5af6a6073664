pub mod reference;

pub use reference::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceDataError {
    #[error("Failed to read reference ranges from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Invalid reference range file {path}: {reason}")]
    Parse { path: String, reason: String },
}
