//! Validator node: chunk ingestion, attestation and node-local retrieval.

pub mod attestation;
pub mod client;
pub mod downloader;
pub mod info;
pub mod server;
pub mod store;
pub mod validator;

pub use attestation::{Attestation, AttestationError};
pub use client::{Connector, NodeClient, NodeClientConfig};
pub use downloader::{BundleDownloader, DownloadError, RelayBundleDownloader};
pub use info::NodeInfo;
pub use server::{
    ChunksReply, DispersalService, IngestionStage, NodeServer, NodeSettings, RequestContext,
    RetrievalService, StoreChunksReply,
};
pub use store::{
    BlobBundles, ChunkStore, Inventory, QuorumUsage, StorageKey, StoreError, StoredBatch,
};
pub use validator::{BatchValidator, BundleVerifier, LengthVerifier, ValidationError};
