//! Error types shared across ShiftClock crates.

use thiserror::Error;

use crate::gate::GateError;
use crate::record::UserId;
use crate::session::SessionError;

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum ShiftError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("State file is corrupt: {0}")]
    CorruptState(String),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("No time record for user {0}")]
    UnknownUser(UserId),

    #[error("Quantity must be positive (got {0})")]
    InvalidQuantity(i64),

    #[error("User {0} has no confirmed credits to withdraw")]
    NoCredits(UserId),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Gate(#[from] GateError),
}

pub type Result<T> = std::result::Result<T, ShiftError>;
