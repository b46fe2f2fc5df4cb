//! API error taxonomy.
//!
//! Component errors (`KvError`, `StoreError`, `ValidationError`, ...) stay
//! local to their modules. The ingestion pipeline and the retrieval servers
//! are the only places that classify them into [`ApiError`].

use thiserror::Error;

/// Result type for RPC-shaped operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced to callers of `store_chunks`, `get_chunks` and `get_blob`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Malformed or out-of-range request. Retrying the same input fails again.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key, blob or quorum absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uninitialized dependency, storage failure or serialization failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Shard or signature check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Transient transport failure. Callers may fail over or retry.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    /// Short machine-readable code, used as a log field.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::NotFound(_) => "not_found",
            ApiError::Internal(_) => "internal",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Unavailable(_) => "unavailable",
        }
    }

    /// Only transport failures are worth retrying against the same peer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Unavailable(_))
    }
}
