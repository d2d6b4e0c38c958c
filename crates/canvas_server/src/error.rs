//! Error types for the canvas server.
//!
//! Each layer owns its own enum; the placement path converts store failures
//! into [`PlacementError`] and the server surfaces startup and network
//! failures through [`ServerError`].

use crate::types::ValidationError;
use std::io::Error as IoError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the ledger and placement store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Balance would drop below zero")]
    InsufficientBalance,

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Transaction deadline exceeded")]
    Timeout,

    #[error("Journal I/O failed for {0}: {1}")]
    Journal(PathBuf, IoError),

    #[error("Failed to serialize journal entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt journal entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Balance out of range")]
    Overflow,

    #[error("Journal {0} could not be repaired after a failed write")]
    Poisoned(PathBuf),

    #[error("Transaction ended without an outcome")]
    Aborted,
}

/// Outcome of a rejected `place_pixel` request.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("Identity is not resolved")]
    Unauthenticated,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Pixel already has that color")]
    NoOp,

    #[error("Not enough balance")]
    InsufficientBalance,

    #[error("Persistence failure: {0}")]
    Persistence(StoreError),
}

impl PlacementError {
    /// The human-readable reason sent back in a failure acknowledgment.
    ///
    /// Persistence details stay in the server log.
    pub fn client_message(&self) -> &'static str {
        match self {
            PlacementError::Unauthenticated => "Not signed in",
            PlacementError::Validation(ValidationError::InvalidColor(_)) => "Invalid color",
            PlacementError::Validation(ValidationError::CoordinateOutOfRange { .. }) => {
                "Invalid coordinate"
            }
            PlacementError::NoOp => "Pixel already has that color",
            PlacementError::InsufficientBalance => "Not enough balance",
            PlacementError::Persistence(_) => "Failed to place pixel",
        }
    }

    /// Whether the requester gets a failure ack. Unauthenticated requests and
    /// out-of-range coordinates are dropped without one.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(
            self,
            PlacementError::Unauthenticated
                | PlacementError::Validation(ValidationError::CoordinateOutOfRange { .. })
        )
    }
}

impl From<StoreError> for PlacementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance => PlacementError::InsufficientBalance,
            other => PlacementError::Persistence(other),
        }
    }
}

/// Failures talking to the session provider.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Session request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session endpoint returned status {0}")]
    Status(u16),
}

/// Top-level server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type PlacementResult<T> = Result<T, PlacementError>;
