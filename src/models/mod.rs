pub mod enums;
pub mod lab;
pub mod profile;

pub use enums::*;
pub use lab::*;
pub use profile::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
