//! Relay retrieval protocol.
//!
//! Relays hold whole blobs and their encoded chunks. Validator nodes fetch
//! their assigned chunk ranges from relays, authenticating each request with
//! their attestation key.

pub mod auth;
pub mod request;
pub mod server;
pub mod store;

pub use auth::{
    hash_get_chunks_request, sign_get_chunks_request, AuthError, OperatorKeyResolver,
    RequestAuthenticator, Requester, StaticOperatorKeys,
};
pub use request::{ChunkRequest, GetChunksReply, GetChunksRequest};
pub use server::{
    RelayConfig, RelayServer, DEFAULT_MAX_CHUNKS_PER_REQUEST, DEFAULT_MAX_CHUNK_REQUESTS,
};
pub use store::{RelayStore, RelayStoreError};

use crate::error::ApiResult;
use crate::protocol::BlobKey;
use async_trait::async_trait;

/// Client view of one relay.
///
/// [`RelayServer`] implements this directly for in-process use. Transport
/// implementations map connection failures to `ApiError::Unavailable`.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn get_chunks(&self, request: GetChunksRequest) -> ApiResult<GetChunksReply>;

    async fn get_blob(&self, blob_key: &BlobKey) -> ApiResult<Vec<u8>>;
}
