//! Chunk request shapes.

use crate::error::{ApiError, ApiResult};
use crate::protocol::{BlobKey, OperatorId};

/// One chunk request. `end` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRequest {
    ByIndex { blob_key: BlobKey, indices: Vec<u32> },
    ByRange { blob_key: BlobKey, start: u32, end: u32 },
}

impl ChunkRequest {
    pub fn blob_key(&self) -> &BlobKey {
        match self {
            ChunkRequest::ByIndex { blob_key, .. } | ChunkRequest::ByRange { blob_key, .. } => {
                blob_key
            }
        }
    }

    /// Number of chunks this request resolves to.
    pub fn len(&self) -> usize {
        match self {
            ChunkRequest::ByIndex { indices, .. } => indices.len(),
            ChunkRequest::ByRange { start, end, .. } => end.saturating_sub(*start) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject shapes that can never be served.
    pub fn check(&self) -> ApiResult<()> {
        match self {
            ChunkRequest::ByIndex { .. } => Ok(()),
            ChunkRequest::ByRange {
                blob_key,
                start,
                end,
            } => {
                if start > end {
                    return Err(ApiError::InvalidArgument(format!(
                        "invalid range [{}, {}) for blob {}",
                        start, end, blob_key
                    )));
                }
                Ok(())
            }
        }
    }

    /// Indices this request asks for, in request order.
    pub fn resolve_indices(&self) -> Vec<u32> {
        match self {
            ChunkRequest::ByIndex { indices, .. } => indices.clone(),
            ChunkRequest::ByRange { start, end, .. } => (*start..*end).collect(),
        }
    }
}

/// Relay `get_chunks` call.
///
/// `operator_id` and `operator_signature` are either both present
/// (authenticated) or both absent (anonymous).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetChunksRequest {
    pub chunk_requests: Vec<ChunkRequest>,
    pub operator_id: Option<OperatorId>,
    pub operator_signature: Option<Vec<u8>>,
}

impl GetChunksRequest {
    pub fn anonymous(chunk_requests: Vec<ChunkRequest>) -> Self {
        Self {
            chunk_requests,
            operator_id: None,
            operator_signature: None,
        }
    }
}

/// Flattened chunks: every chunk of the first request, then every chunk of
/// the second, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChunksReply {
    pub data: Vec<Vec<u8>>,
}
