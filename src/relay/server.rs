//! Relay retrieval server.
//!
//! Serves blobs and chunks to validator nodes. Every request is
//! all-or-nothing: N requested chunks produce exactly N chunks in request
//! order, or an error and no data.
//!
//! ## Shard Authorization
//!
//! A relay serves a blob only if the blob's certificate lists at least one
//! relay key in the relay's shard set. An empty shard set serves every blob.

use crate::error::{ApiError, ApiResult};
use crate::protocol::{BlobCertificate, BlobKey, RelayKey};
use crate::relay::auth::{AuthError, RequestAuthenticator};
use crate::relay::request::{GetChunksReply, GetChunksRequest};
use crate::relay::store::{RelayStore, RelayStoreError};
use crate::relay::RelayClient;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Default cap on chunk requests per call.
pub const DEFAULT_MAX_CHUNK_REQUESTS: usize = 1024;

/// Default cap on chunks implied by all requests of one call.
pub const DEFAULT_MAX_CHUNKS_PER_REQUEST: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Shards this relay serves. Empty serves every shard.
    pub shards: Vec<RelayKey>,
    pub max_chunk_requests: usize,
    /// Checked before authentication, so hashing stays bounded too.
    pub max_chunks_per_request: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            max_chunk_requests: DEFAULT_MAX_CHUNK_REQUESTS,
            max_chunks_per_request: DEFAULT_MAX_CHUNKS_PER_REQUEST,
        }
    }
}

pub struct RelayServer {
    store: RelayStore,
    authenticator: RequestAuthenticator,
    shards: HashSet<RelayKey>,
    max_chunk_requests: usize,
    max_chunks_per_request: u64,
}

impl RelayServer {
    pub fn new(
        config: RelayConfig,
        store: RelayStore,
        authenticator: RequestAuthenticator,
    ) -> Self {
        Self {
            store,
            authenticator,
            shards: config.shards.into_iter().collect(),
            max_chunk_requests: config.max_chunk_requests,
            max_chunks_per_request: config.max_chunks_per_request,
        }
    }

    pub fn store(&self) -> &RelayStore {
        &self.store
    }

    /// Serve chunks for a batch of requests.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: empty or oversized request list, too many implied
    ///   chunks, inverted range, out-of-range chunk index, half-supplied
    ///   credentials
    /// - `Unauthorized`: bad signature, unsigned request when authentication
    ///   is required, or a blob outside this relay's shards
    /// - `NotFound`: unknown blob
    /// - `Internal`: storage failure
    pub async fn get_chunks(&self, request: GetChunksRequest) -> ApiResult<GetChunksReply> {
        if request.chunk_requests.is_empty() {
            return Err(ApiError::InvalidArgument(
                "no chunk requests provided".to_string(),
            ));
        }
        if request.chunk_requests.len() > self.max_chunk_requests {
            return Err(ApiError::InvalidArgument(format!(
                "too many chunk requests: {} > {}",
                request.chunk_requests.len(),
                self.max_chunk_requests
            )));
        }
        for chunk_request in &request.chunk_requests {
            chunk_request.check()?;
        }
        let total: u64 = request
            .chunk_requests
            .iter()
            .map(|r| r.len() as u64)
            .fold(0, u64::saturating_add);
        if total > self.max_chunks_per_request {
            return Err(ApiError::InvalidArgument(format!(
                "too many chunks requested: {} > {}",
                total, self.max_chunks_per_request
            )));
        }

        let requester = self.authenticator.authenticate(&request).map_err(|e| {
            warn!(error = %e, "Rejected relay chunk request");
            match e {
                AuthError::IncompleteCredentials => ApiError::InvalidArgument(e.to_string()),
                other => ApiError::Unauthorized(other.to_string()),
            }
        })?;

        let mut frames_by_blob: HashMap<BlobKey, Vec<Vec<u8>>> = HashMap::new();
        for chunk_request in &request.chunk_requests {
            let blob_key = chunk_request.blob_key();
            if frames_by_blob.contains_key(blob_key) {
                continue;
            }
            self.authorized_certificate(blob_key).await?;
            let frames = self
                .store
                .frames(blob_key)
                .await
                .map_err(|e| store_error(e, blob_key))?;
            frames_by_blob.insert(*blob_key, frames);
        }

        let mut data = Vec::new();
        for chunk_request in &request.chunk_requests {
            let blob_key = chunk_request.blob_key();
            let frames = frames_by_blob.get(blob_key).ok_or_else(|| {
                ApiError::Internal(format!("frames for blob {} not loaded", blob_key))
            })?;
            for index in chunk_request.resolve_indices() {
                let frame = frames.get(index as usize).ok_or_else(|| {
                    ApiError::InvalidArgument(format!(
                        "chunk index {} out of range for blob {} ({} chunks)",
                        index,
                        blob_key,
                        frames.len()
                    ))
                })?;
                data.push(frame.clone());
            }
        }

        debug!(
            requester = ?requester,
            requests = request.chunk_requests.len(),
            chunks = data.len(),
            "Served relay chunk request"
        );
        Ok(GetChunksReply { data })
    }

    /// Serve a whole blob. Same shard rule as [`get_chunks`](Self::get_chunks).
    pub async fn get_blob(&self, blob_key: &BlobKey) -> ApiResult<Vec<u8>> {
        self.authorized_certificate(blob_key).await?;
        let blob = self
            .store
            .blob(blob_key)
            .await
            .map_err(|e| store_error(e, blob_key))?;
        debug!(blob_key = %blob_key, bytes = blob.len(), "Served blob");
        Ok(blob)
    }

    async fn authorized_certificate(&self, blob_key: &BlobKey) -> ApiResult<BlobCertificate> {
        let certificate = self
            .store
            .certificate(blob_key)
            .await
            .map_err(|e| store_error(e, blob_key))?;
        if !self.serves(&certificate.relay_keys) {
            warn!(
                blob_key = %blob_key,
                relay_keys = ?certificate.relay_keys,
                "Blob outside relay shards"
            );
            return Err(ApiError::Unauthorized(format!(
                "blob {} is not in this relay's shards",
                blob_key
            )));
        }
        Ok(certificate)
    }

    fn serves(&self, relay_keys: &[RelayKey]) -> bool {
        self.shards.is_empty() || relay_keys.iter().any(|k| self.shards.contains(k))
    }
}

fn store_error(err: RelayStoreError, blob_key: &BlobKey) -> ApiError {
    match err {
        RelayStoreError::NotFound(_) => ApiError::NotFound(format!("blob {}", blob_key)),
        other => ApiError::Internal(format!("relay storage: {}", other)),
    }
}

#[async_trait]
impl RelayClient for RelayServer {
    async fn get_chunks(&self, request: GetChunksRequest) -> ApiResult<GetChunksReply> {
        RelayServer::get_chunks(self, request).await
    }

    async fn get_blob(&self, blob_key: &BlobKey) -> ApiResult<Vec<u8>> {
        RelayServer::get_blob(self, blob_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeyPair;
    use crate::kvstore::MemoryStore;
    use crate::protocol::{BlobCommitment, BlobHeader, PaymentMetadata};
    use crate::relay::auth::{sign_get_chunks_request, StaticOperatorKeys};
    use crate::relay::request::ChunkRequest;
    use std::sync::Arc;

    fn certificate(salt: u32, relay_keys: Vec<RelayKey>) -> BlobCertificate {
        BlobCertificate {
            blob_header: BlobHeader {
                version: 0,
                quorum_numbers: vec![0],
                commitment: BlobCommitment {
                    data_commitment: [1u8; 32],
                    length: 4,
                },
                payment: PaymentMetadata {
                    account_id: "acct".to_string(),
                    salt,
                },
            },
            relay_keys,
        }
    }

    fn frames(n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i; 3]).collect()
    }

    fn server(shards: Vec<RelayKey>, keys: StaticOperatorKeys, required: bool) -> RelayServer {
        RelayServer::new(
            RelayConfig {
                shards,
                ..RelayConfig::default()
            },
            RelayStore::new(Arc::new(MemoryStore::new())),
            RequestAuthenticator::new(Box::new(keys), required),
        )
    }

    #[tokio::test]
    async fn test_by_index_preserves_order() {
        let relay = server(vec![], StaticOperatorKeys::new(), false);
        let cert = certificate(1, vec![0]);
        let key = relay.store().put_blob(&cert, b"blob", &frames(6)).await.unwrap();

        let reply = relay
            .get_chunks(GetChunksRequest::anonymous(vec![ChunkRequest::ByIndex {
                blob_key: key,
                indices: vec![4, 1, 3],
            }]))
            .await
            .unwrap();

        assert_eq!(reply.data, vec![vec![4; 3], vec![1; 3], vec![3; 3]]);
    }

    #[tokio::test]
    async fn test_out_of_range_index_fails_whole_request() {
        let relay = server(vec![], StaticOperatorKeys::new(), false);
        let key = relay
            .store()
            .put_blob(&certificate(1, vec![0]), b"blob", &frames(6))
            .await
            .unwrap();

        let result = relay
            .get_chunks(GetChunksRequest::anonymous(vec![ChunkRequest::ByIndex {
                blob_key: key,
                indices: vec![0, 5, 999_999],
            }]))
            .await;

        assert!(matches!(result, Err(ApiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_shard_gating() {
        let relay = server(vec![0, 2, 4], StaticOperatorKeys::new(), false);
        let outside = relay
            .store()
            .put_blob(&certificate(1, vec![1, 3]), b"a", &frames(2))
            .await
            .unwrap();
        let inside = relay
            .store()
            .put_blob(&certificate(2, vec![2]), b"b", &frames(2))
            .await
            .unwrap();

        assert!(matches!(
            relay.get_blob(&outside).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert_eq!(relay.get_blob(&inside).await.unwrap(), b"b".to_vec());

        let result = relay
            .get_chunks(GetChunksRequest::anonymous(vec![ChunkRequest::ByRange {
                blob_key: outside,
                start: 0,
                end: 1,
            }]))
            .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_request_limits() {
        let relay = server(vec![], StaticOperatorKeys::new(), false);

        let empty = relay.get_chunks(GetChunksRequest::anonymous(vec![])).await;
        assert!(matches!(empty, Err(ApiError::InvalidArgument(_))));

        let many = vec![
            ChunkRequest::ByIndex {
                blob_key: BlobKey::new([0u8; 32]),
                indices: vec![0],
            };
            DEFAULT_MAX_CHUNK_REQUESTS + 1
        ];
        let result = relay.get_chunks(GetChunksRequest::anonymous(many)).await;
        assert!(matches!(result, Err(ApiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_implied_chunk_cap() {
        let relay = RelayServer::new(
            RelayConfig {
                max_chunks_per_request: 4,
                ..RelayConfig::default()
            },
            RelayStore::new(Arc::new(MemoryStore::new())),
            RequestAuthenticator::new(Box::new(StaticOperatorKeys::new()), false),
        );
        let key = relay
            .store()
            .put_blob(&certificate(1, vec![0]), b"blob", &frames(6))
            .await
            .unwrap();
        let range = |start, end| ChunkRequest::ByRange {
            blob_key: key,
            start,
            end,
        };

        let at_cap = relay
            .get_chunks(GetChunksRequest::anonymous(vec![range(0, 2), range(4, 6)]))
            .await
            .unwrap();
        assert_eq!(at_cap.data.len(), 4);

        let over = relay
            .get_chunks(GetChunksRequest::anonymous(vec![range(0, 3), range(3, 5)]))
            .await;
        assert!(matches!(over, Err(ApiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_authentication_required() {
        let keypair = NodeKeyPair::from_seed(&[6u8; 32]).unwrap();
        let mut keys = StaticOperatorKeys::new();
        keys.insert(keypair.operator_id(), keypair.public_key().to_vec());
        let relay = server(vec![], keys, true);
        let key = relay
            .store()
            .put_blob(&certificate(1, vec![0]), b"blob", &frames(4))
            .await
            .unwrap();
        let requests = vec![ChunkRequest::ByRange {
            blob_key: key,
            start: 1,
            end: 3,
        }];

        let unsigned = relay
            .get_chunks(GetChunksRequest::anonymous(requests.clone()))
            .await;
        assert!(matches!(unsigned, Err(ApiError::Unauthorized(_))));

        let signed = sign_get_chunks_request(&keypair, keypair.operator_id(), requests);
        let reply = relay.get_chunks(signed).await.unwrap();
        assert_eq!(reply.data, vec![vec![1; 3], vec![2; 3]]);
    }

    #[tokio::test]
    async fn test_unknown_blob_not_found() {
        let relay = server(vec![], StaticOperatorKeys::new(), false);
        let result = relay.get_blob(&BlobKey::new([7u8; 32])).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
