//! Error types for the modelling bus

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Not valid JSON: {0}")]
    NotJson(String),

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
