//! Bundle download.
//!
//! For every certificate the node fetches, per claimed quorum, its assigned
//! chunk range `[start_index, start_index + num_chunks)` from a relay listed
//! in the certificate. The chunks of one quorum are concatenated into that
//! quorum's bundle.
//!
//! Requests are signed with the node key, so the relay sees the node as an
//! authenticated operator. A relay failing with a retryable error is skipped
//! in favor of the next relay key; any other error fails the download.

use crate::crypto::NodeKeyPair;
use crate::error::ApiError;
use crate::node::store::BlobBundles;
use crate::protocol::{
    Batch, BlobCertificate, BlobKey, OperatorId, OperatorState, QuorumId, RelayKey,
};
use crate::relay::{sign_get_chunks_request, ChunkRequest, RelayClient};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no reachable relay for blob {0}")]
    NoRelay(BlobKey),

    #[error("relay {relay_key} rejected request for blob {blob_key}: {source}")]
    Relay {
        relay_key: RelayKey,
        blob_key: BlobKey,
        #[source]
        source: ApiError,
    },

    #[error("every relay for blob {blob_key} failed, last error: {last}")]
    AllRelaysFailed { blob_key: BlobKey, last: ApiError },

    #[error("relay returned {actual} chunks for blob {blob_key}, expected {expected}")]
    ShortReply {
        blob_key: BlobKey,
        expected: usize,
        actual: usize,
    },
}

/// Fetches the bundles this operator is responsible for.
#[async_trait]
pub trait BundleDownloader: Send + Sync {
    async fn download(
        &self,
        batch: &Batch,
        state: &OperatorState,
    ) -> Result<Vec<BlobBundles>, DownloadError>;
}

/// Downloads bundles from relays.
pub struct RelayBundleDownloader {
    relays: HashMap<RelayKey, Arc<dyn RelayClient>>,
    default_relay: Option<Arc<dyn RelayClient>>,
    keypair: Arc<NodeKeyPair>,
    operator_id: OperatorId,
}

impl RelayBundleDownloader {
    pub fn new(keypair: Arc<NodeKeyPair>, operator_id: OperatorId) -> Self {
        Self {
            relays: HashMap::new(),
            default_relay: None,
            keypair,
            operator_id,
        }
    }

    pub fn with_relay(mut self, relay_key: RelayKey, client: Arc<dyn RelayClient>) -> Self {
        self.relays.insert(relay_key, client);
        self
    }

    /// Relay used once when none of a certificate's relay keys is known.
    pub fn with_default_relay(mut self, client: Arc<dyn RelayClient>) -> Self {
        self.default_relay = Some(client);
        self
    }

    async fn download_blob(
        &self,
        cert: &BlobCertificate,
        state: &OperatorState,
    ) -> Result<BlobBundles, DownloadError> {
        let blob_key = cert.blob_key();

        // Only quorums this operator holds are fetched; the validator
        // rejects certificates claiming quorums outside the assignment.
        let plan: Vec<(QuorumId, ChunkRequest)> = cert
            .quorum_numbers()
            .iter()
            .filter_map(|q| {
                state.assignment(*q).map(|a| {
                    (
                        *q,
                        ChunkRequest::ByRange {
                            blob_key,
                            start: a.start_index,
                            end: a.end_index(),
                        },
                    )
                })
            })
            .collect();

        let mut blob = BlobBundles::new(blob_key);
        if plan.is_empty() {
            return Ok(blob);
        }

        let requests: Vec<ChunkRequest> = plan.iter().map(|(_, r)| r.clone()).collect();
        let expected: usize = requests.iter().map(|r| r.len()).sum();
        let data = self.fetch(cert, &blob_key, requests).await?;
        if data.len() != expected {
            return Err(DownloadError::ShortReply {
                blob_key,
                expected,
                actual: data.len(),
            });
        }

        let mut chunks = data.into_iter();
        for (quorum, request) in plan {
            let bundle: Vec<u8> = chunks.by_ref().take(request.len()).flatten().collect();
            blob.bundles.insert(quorum, bundle);
        }
        Ok(blob)
    }

    async fn fetch(
        &self,
        cert: &BlobCertificate,
        blob_key: &BlobKey,
        requests: Vec<ChunkRequest>,
    ) -> Result<Vec<Vec<u8>>, DownloadError> {
        let mut candidates: Vec<(RelayKey, &Arc<dyn RelayClient>)> = cert
            .relay_keys
            .iter()
            .filter_map(|k| self.relays.get(k).map(|c| (*k, c)))
            .collect();
        if candidates.is_empty() {
            if let (Some(client), Some(relay_key)) =
                (&self.default_relay, cert.relay_keys.first())
            {
                candidates.push((*relay_key, client));
            }
        }

        let mut last_error = None;
        for (relay_key, client) in candidates {
            let request =
                sign_get_chunks_request(&self.keypair, self.operator_id, requests.clone());
            match client.get_chunks(request).await {
                Ok(reply) => {
                    debug!(
                        relay_key,
                        blob_key = %blob_key,
                        chunks = reply.data.len(),
                        "Fetched chunks"
                    );
                    return Ok(reply.data);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        relay_key,
                        blob_key = %blob_key,
                        error = %e,
                        "Relay unavailable, trying next"
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    return Err(DownloadError::Relay {
                        relay_key,
                        blob_key: *blob_key,
                        source: e,
                    })
                }
            }
        }
        match last_error {
            Some(last) => Err(DownloadError::AllRelaysFailed {
                blob_key: *blob_key,
                last,
            }),
            None => Err(DownloadError::NoRelay(*blob_key)),
        }
    }
}

#[async_trait]
impl BundleDownloader for RelayBundleDownloader {
    async fn download(
        &self,
        batch: &Batch,
        state: &OperatorState,
    ) -> Result<Vec<BlobBundles>, DownloadError> {
        // Blobs download concurrently; results keep certificate order.
        try_join_all(
            batch
                .blob_certificates
                .iter()
                .map(|cert| self.download_blob(cert, state)),
        )
        .await
    }
}
