//! Node dispersal and retrieval server.
//!
//! ## Ingestion Pipeline
//!
//! ```text
//! Received ─► Downloading ─┬─► Storing ────┐
//!                          └─► Validating ─┴─► Committed ─► Attested
//!                                          └─► RolledBack ─► Rejected
//! ```
//!
//! Once bundles are downloaded, storing, validating and reconciling run on a
//! spawned ingestion task that the request awaits. Storage gets a task of its
//! own inside it. The ingestion task always waits for the storage result,
//! whatever validation decided, so a rollback delete is strictly ordered
//! after the write it undoes. Dropping the request does not stop the
//! ingestion task, so a rejected batch is rolled back either way.
//!
//! Caller deadlines bound the download and validation phases. An issued
//! storage commit is never cut short.

use crate::crypto::NodeKeyPair;
use crate::error::{ApiError, ApiResult};
use crate::node::attestation::Attestation;
use crate::node::downloader::BundleDownloader;
use crate::node::info::NodeInfo;
use crate::node::store::{BlobBundles, ChunkStore, StoreError, StoredBatch};
use crate::node::validator::{BatchValidator, ValidationError};
use crate::protocol::{
    Batch, BlobKey, ChainState, ChainStateError, OperatorId, OperatorState, QuorumId,
    MAX_QUORUM_ID,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Default bound on operator-state lookup plus bundle download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on batch validation.
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Stages of one `store_chunks` call, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Received,
    Downloading,
    Storing,
    Validating,
    Committed,
    RolledBack,
    Attested,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub enable_v2: bool,
    pub operator_id: OperatorId,
    pub disable_node_info_resources: bool,
    pub download_timeout: Duration,
    pub validation_timeout: Duration,
}

impl NodeSettings {
    pub fn new(operator_id: OperatorId) -> Self {
        Self {
            enable_v2: true,
            operator_id,
            disable_node_info_resources: false,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            validation_timeout: DEFAULT_VALIDATION_TIMEOUT,
        }
    }
}

/// Per-call context carrying the caller's deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// No caller deadline; only the configured phase timeouts apply.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// The earlier of the caller deadline and `now + limit`.
    fn deadline_for(&self, limit: Duration) -> Instant {
        let own = Instant::now() + limit;
        match self.deadline {
            Some(deadline) => deadline.min(own),
            None => own,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChunksReply {
    pub signature: Vec<u8>,
}

/// Node-local chunk reply. Holds the stored bundle as a single element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunksReply {
    pub chunks: Vec<Vec<u8>>,
}

/// Disperser-facing API.
#[async_trait]
pub trait DispersalService: Send + Sync {
    async fn store_chunks(
        &self,
        ctx: &RequestContext,
        batch: Batch,
    ) -> ApiResult<StoreChunksReply>;

    async fn node_info(&self) -> NodeInfo;
}

/// Retriever-facing API.
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn get_chunks(&self, blob_key: &[u8], quorum_id: u32) -> ApiResult<ChunksReply>;
}

pub struct NodeServer {
    settings: NodeSettings,
    store: Option<ChunkStore>,
    keypair: Option<Arc<NodeKeyPair>>,
    chain: Arc<dyn ChainState>,
    downloader: Arc<dyn BundleDownloader>,
    validator: BatchValidator,
}

impl NodeServer {
    /// Create a server with no store and no key. Both must be attached with
    /// [`with_store`](Self::with_store) and [`with_keypair`](Self::with_keypair)
    /// before `store_chunks` can succeed.
    pub fn new(
        settings: NodeSettings,
        chain: Arc<dyn ChainState>,
        downloader: Arc<dyn BundleDownloader>,
        validator: BatchValidator,
    ) -> Self {
        Self {
            settings,
            store: None,
            keypair: None,
            chain,
            downloader,
            validator,
        }
    }

    pub fn with_store(mut self, store: ChunkStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_keypair(mut self, keypair: Arc<NodeKeyPair>) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    /// Ingest a batch and return the node's attestation signature.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: v2 disabled, or the batch has no certificates
    /// - `Internal`: store or key missing, download, storage or validation failure
    /// - `Unavailable`: operator state temporarily unreachable
    pub async fn store_chunks(
        &self,
        ctx: &RequestContext,
        batch: Batch,
    ) -> ApiResult<StoreChunksReply> {
        let started = Instant::now();

        if !self.settings.enable_v2 {
            return Err(ApiError::InvalidArgument("v2 API is disabled".to_string()));
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ApiError::Internal("v2 store not initialized".to_string()))?;
        let keypair = self
            .keypair
            .as_ref()
            .ok_or_else(|| ApiError::Internal("missing key pair".to_string()))?;
        if batch.is_empty() {
            warn!(
                stage = ?IngestionStage::Rejected,
                "StoreChunks request has no blob certificates"
            );
            return Err(ApiError::InvalidArgument(
                "no blob certificates in the batch".to_string(),
            ));
        }

        let batch_header_hash = hex::encode(batch.header.hash());
        let reference_block_number = batch.header.reference_block_number;
        info!(
            batch_header_hash = %batch_header_hash,
            num_blobs = batch.len(),
            reference_block_number,
            "New StoreChunks request"
        );

        // Downloading
        debug!(batch_header_hash = %batch_header_hash, stage = ?IngestionStage::Downloading);
        let download_deadline = ctx.deadline_for(self.settings.download_timeout);
        let state = match timeout_at(
            download_deadline,
            self.chain
                .operator_state(reference_block_number, &self.settings.operator_id),
        )
        .await
        {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => return Err(reject(&batch_header_hash, chain_error(e))),
            Err(_) => {
                return Err(reject(
                    &batch_header_hash,
                    ApiError::Unavailable("timed out fetching operator state".to_string()),
                ))
            }
        };
        let bundles = match timeout_at(download_deadline, self.downloader.download(&batch, &state))
            .await
        {
            Ok(Ok(bundles)) => bundles,
            Ok(Err(e)) => {
                return Err(reject(
                    &batch_header_hash,
                    ApiError::Internal(format!("failed to download batch: {}", e)),
                ))
            }
            Err(_) => {
                return Err(reject(
                    &batch_header_hash,
                    ApiError::Internal("failed to download batch: timed out".to_string()),
                ))
            }
        };

        // Storing ∥ Validating
        let ingestion = Ingestion {
            store: store.clone(),
            validator: self.validator.clone(),
            batch: Arc::new(batch),
            bundles: Arc::new(bundles),
            state,
            batch_header_hash: batch_header_hash.clone(),
        };
        let validation_deadline = ctx.deadline_for(self.settings.validation_timeout);
        let validation_timeout = self.settings.validation_timeout;
        let batch = Arc::clone(&ingestion.batch);
        let written = tokio::spawn(ingestion.run(validation_deadline, validation_timeout))
            .await
            .map_err(|e| {
                reject(
                    &batch_header_hash,
                    ApiError::Internal(format!("ingestion task failed: {}", e)),
                )
            })?
            .map_err(|e| reject(&batch_header_hash, e))?;
        debug!(batch_header_hash = %batch_header_hash, stage = ?IngestionStage::Committed);

        let attestation = Attestation::sign(&batch.header, keypair, self.settings.operator_id);
        info!(
            batch_header_hash = %batch_header_hash,
            stage = ?IngestionStage::Attested,
            keys = written.keys.len(),
            bytes = written.total_bytes,
            latency_ms = started.elapsed().as_millis() as u64,
            "StoreChunks complete"
        );

        Ok(StoreChunksReply {
            signature: attestation.signature,
        })
    }

    /// Serve the bundle stored for `(blob_key, quorum_id)`.
    ///
    /// No cross-operator authentication: any caller may read.
    pub async fn get_chunks(&self, blob_key: &[u8], quorum_id: u32) -> ApiResult<ChunksReply> {
        let started = Instant::now();

        if !self.settings.enable_v2 {
            return Err(ApiError::InvalidArgument("v2 API is disabled".to_string()));
        }
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| ApiError::Internal("v2 store not initialized".to_string()))?;

        let blob_key = BlobKey::from_slice(blob_key)
            .map_err(|e| ApiError::InvalidArgument(format!("invalid blob key: {}", e)))?;
        let quorum = QuorumId::try_from(quorum_id)
            .ok()
            .filter(|q| *q <= MAX_QUORUM_ID)
            .ok_or_else(|| ApiError::InvalidArgument("invalid quorum ID".to_string()))?;

        let bundle = store.get_chunks(&blob_key, quorum).await.map_err(|e| match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(format!("failed to get chunks: {}", other)),
        })?;

        debug!(
            blob_key = %blob_key,
            quorum,
            bytes = bundle.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Served GetChunks"
        );
        Ok(ChunksReply {
            chunks: vec![bundle],
        })
    }

    pub fn node_info(&self) -> NodeInfo {
        if self.settings.disable_node_info_resources {
            NodeInfo::version_only()
        } else {
            NodeInfo::collect()
        }
    }
}

/// Store, validate and reconcile one downloaded batch.
///
/// Runs as its own task, so a caller that goes away mid-validation still
/// gets its writes rolled back.
struct Ingestion {
    store: ChunkStore,
    validator: BatchValidator,
    batch: Arc<Batch>,
    bundles: Arc<Vec<BlobBundles>>,
    state: OperatorState,
    batch_header_hash: String,
}

impl Ingestion {
    async fn run(
        self,
        validation_deadline: Instant,
        validation_timeout: Duration,
    ) -> ApiResult<StoredBatch> {
        let batch_header_hash = &self.batch_header_hash;

        let store_task = {
            let store = self.store.clone();
            let batch = Arc::clone(&self.batch);
            let bundles = Arc::clone(&self.bundles);
            tokio::spawn(async move { store.store_batch(&batch, &bundles).await })
        };
        debug!(batch_header_hash = %batch_header_hash, stage = ?IngestionStage::Storing);
        debug!(batch_header_hash = %batch_header_hash, stage = ?IngestionStage::Validating);

        let validation = match timeout_at(
            validation_deadline,
            self.validator.validate(&self.batch, &self.bundles, &self.state),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ValidationError::TimedOut(validation_timeout.as_millis() as u64)),
        };

        let stored = store_task.await;

        if let Err(validation_error) = validation {
            if let Ok(Ok(written)) = &stored {
                if !written.keys.is_empty() {
                    if let Err(delete_error) = self.store.delete_keys(&written.keys).await {
                        error!(
                            batch_header_hash = %batch_header_hash,
                            error = %delete_error,
                            keys = written.keys.len(),
                            "Failed to delete keys"
                        );
                    }
                }
            }
            debug!(batch_header_hash = %batch_header_hash, stage = ?IngestionStage::RolledBack);
            return Err(ApiError::Internal(format!(
                "failed to validate batch: {}",
                validation_error
            )));
        }

        match stored {
            Ok(Ok(written)) => Ok(written),
            Ok(Err(e)) => Err(ApiError::Internal(format!("failed to store batch: {}", e))),
            Err(e) => Err(ApiError::Internal(format!(
                "failed to store batch: storage task ended: {}",
                e
            ))),
        }
    }
}

fn reject(batch_header_hash: &str, err: ApiError) -> ApiError {
    warn!(
        batch_header_hash = %batch_header_hash,
        stage = ?IngestionStage::Rejected,
        code = err.code(),
        error = %err,
        "StoreChunks rejected"
    );
    err
}

fn chain_error(err: ChainStateError) -> ApiError {
    match err {
        ChainStateError::Unavailable(msg) => {
            ApiError::Unavailable(format!("operator state unavailable: {}", msg))
        }
        other => ApiError::Internal(format!("failed to get operator state: {}", other)),
    }
}

#[async_trait]
impl DispersalService for NodeServer {
    async fn store_chunks(
        &self,
        ctx: &RequestContext,
        batch: Batch,
    ) -> ApiResult<StoreChunksReply> {
        NodeServer::store_chunks(self, ctx, batch).await
    }

    async fn node_info(&self) -> NodeInfo {
        NodeServer::node_info(self)
    }
}

#[async_trait]
impl RetrievalService for NodeServer {
    async fn get_chunks(&self, blob_key: &[u8], quorum_id: u32) -> ApiResult<ChunksReply> {
        NodeServer::get_chunks(self, blob_key, quorum_id).await
    }
}
