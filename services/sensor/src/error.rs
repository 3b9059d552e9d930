use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the sensor operations
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Could not understand time format: {0:?}")]
    InvalidTimestamp(String),

    #[error("Batch contains no measurements")]
    EmptyBatch,

    #[error("Store rejected a write: {0}")]
    StoreWriteFailed(String),

    #[error("Store query failed: {0}")]
    StoreQueryFailed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl SensorError {
    /// Map a store error raised while writing points
    pub fn from_write(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SensorError::StoreUnavailable(msg),
            other => SensorError::StoreWriteFailed(other.to_string()),
        }
    }

    /// Map a store error raised while reading a series
    pub fn from_query(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => SensorError::StoreUnavailable(msg),
            other => SensorError::StoreQueryFailed(other.to_string()),
        }
    }

    /// True when the caller sent something we cannot accept
    pub fn is_client_error(&self) -> bool {
        matches!(self, SensorError::InvalidTimestamp(_) | SensorError::EmptyBatch)
    }
}

pub type Result<T> = std::result::Result<T, SensorError>;
