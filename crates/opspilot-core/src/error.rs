//! Error types for OpsPilot.
//!
//! Backend failures are `ExecutionResult` values and never reach this enum.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed capability catalog. Fatal at startup.
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Model error: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, Error>;
