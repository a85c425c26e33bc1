// Error taxonomy for the traffic write path.

use thiserror::Error;

/// Failures surfaced by `TrafficRepo` operations.
#[derive(Debug, Error)]
pub enum TrafficError {
    /// Rejected before any storage access; retrying will not help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The substrate could not complete the operation. The transaction was rolled back.
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    /// A sample would have been applied partially. Indicates a bug; rolled back.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl TrafficError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, TrafficError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, TrafficError>;
