//! Error types for the Antrian gateway

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AntrianError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
