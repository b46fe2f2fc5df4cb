//! Chunk store: (blob key, quorum) → raw bundle, on top of [`KvStore`].
//!
//! ## Key Layout
//!
//! ```text
//! "chunks/" ‖ blob_key (32 bytes) ‖ quorum_id (1 byte)
//! ```
//!
//! Keys of one blob are adjacent, so `iter_prefix("chunks/" ‖ blob_key)`
//! enumerates every quorum stored for it.

use crate::kvstore::{Batch, KeyCodec, KvError, KvStore, Table};
use crate::protocol::{self, BlobKey, QuorumId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const CHUNKS_TABLE: &str = "chunks";

const STORAGE_KEY_LEN: usize = 32 + 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no chunks for blob {blob_key} quorum {quorum}")]
    NotFound { blob_key: BlobKey, quorum: QuorumId },

    #[error("corrupt storage key: {0}")]
    CorruptKey(String),

    #[error(transparent)]
    Kv(#[from] KvError),
}

/// Physical location of one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey {
    blob_key: BlobKey,
    quorum: QuorumId,
}

impl StorageKey {
    pub fn new(blob_key: BlobKey, quorum: QuorumId) -> Self {
        Self { blob_key, quorum }
    }

    pub fn blob_key(&self) -> &BlobKey {
        &self.blob_key
    }

    pub fn quorum(&self) -> QuorumId {
        self.quorum
    }

    fn local_bytes(&self) -> [u8; STORAGE_KEY_LEN] {
        let mut out = [0u8; STORAGE_KEY_LEN];
        out[..32].copy_from_slice(self.blob_key.as_bytes());
        out[32] = self.quorum;
        out
    }

    fn parse_local(local: &[u8]) -> Result<Self, StoreError> {
        if local.len() != STORAGE_KEY_LEN {
            return Err(StoreError::CorruptKey(format!(
                "expected {} bytes, got {}",
                STORAGE_KEY_LEN,
                local.len()
            )));
        }
        let blob_key = BlobKey::from_slice(&local[..32])
            .map_err(|e| StoreError::CorruptKey(e.to_string()))?;
        Ok(Self::new(blob_key, local[32]))
    }
}

impl KeyCodec for StorageKey {
    fn encode_key(&self) -> Vec<u8> {
        Table::new(CHUNKS_TABLE).key(&self.local_bytes())
    }
}

/// Bundles downloaded for one blob, keyed by quorum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobBundles {
    pub blob_key: BlobKey,
    pub bundles: BTreeMap<QuorumId, Vec<u8>>,
}

impl BlobBundles {
    pub fn new(blob_key: BlobKey) -> Self {
        Self {
            blob_key,
            bundles: BTreeMap::new(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bundles.values().map(|b| b.len() as u64).sum()
    }
}

/// Result of a committed [`ChunkStore::store_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredBatch {
    pub keys: Vec<StorageKey>,
    pub total_bytes: u64,
}

/// Per-quorum usage reported by [`ChunkStore::inventory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuorumUsage {
    pub bundles: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub blobs: u64,
    pub by_quorum: BTreeMap<QuorumId, QuorumUsage>,
}

impl Inventory {
    pub fn total_bytes(&self) -> u64 {
        self.by_quorum.values().map(|u| u.bytes).sum()
    }
}

/// Typed chunk storage. Cheap to clone; clones share the underlying store.
#[derive(Clone)]
pub struct ChunkStore {
    kv: Arc<dyn KvStore>,
    table: Table,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("table", &self.table.name())
            .finish()
    }
}

impl ChunkStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            table: Table::new(CHUNKS_TABLE),
        }
    }

    /// Stage every supplied bundle of every certificate and commit them in
    /// one atomic batch.
    ///
    /// Bundles for blobs that are not in the batch are ignored. On error
    /// nothing was written.
    ///
    /// # Returns
    ///
    /// Every key written and the total payload bytes.
    pub async fn store_batch(
        &self,
        batch: &protocol::Batch,
        bundles: &[BlobBundles],
    ) -> Result<StoredBatch, StoreError> {
        let by_blob: BTreeMap<BlobKey, &BlobBundles> =
            bundles.iter().map(|b| (b.blob_key, b)).collect();

        let mut write: Batch<'_, StorageKey> = Batch::new(self.kv.as_ref());
        let mut stored = StoredBatch::default();

        for cert in &batch.blob_certificates {
            let blob_key = cert.blob_key();
            let Some(blob) = by_blob.get(&blob_key) else {
                continue;
            };
            for (quorum, bundle) in &blob.bundles {
                let key = StorageKey::new(blob_key, *quorum);
                write.put(&key, bundle.clone());
                stored.keys.push(key);
                stored.total_bytes += bundle.len() as u64;
            }
        }

        let ops = write.size();
        write.apply().await?;

        debug!(
            keys = ops,
            bytes = stored.total_bytes,
            "Stored batch bundles"
        );
        Ok(stored)
    }

    /// Read the bundle stored for `(blob_key, quorum)`.
    pub async fn get_chunks(
        &self,
        blob_key: &BlobKey,
        quorum: QuorumId,
    ) -> Result<Vec<u8>, StoreError> {
        let key = StorageKey::new(*blob_key, quorum);
        match self.kv.get(&key.encode_key()).await {
            Ok(bundle) => Ok(bundle),
            Err(KvError::NotFound) => Err(StoreError::NotFound {
                blob_key: *blob_key,
                quorum,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a key set previously returned by [`store_batch`](Self::store_batch).
    ///
    /// Idempotent: absent keys are skipped silently.
    pub async fn delete_keys(&self, keys: &[StorageKey]) -> Result<(), StoreError> {
        let mut delete: Batch<'_, StorageKey> = Batch::new(self.kv.as_ref());
        for key in keys {
            delete.delete(key);
        }
        delete.apply().await?;
        Ok(())
    }

    /// Keys stored for one blob, in quorum order.
    pub async fn keys_for_blob(&self, blob_key: &BlobKey) -> Result<Vec<StorageKey>, StoreError> {
        let prefix = self.table.key(blob_key.as_bytes());
        let mut keys = Vec::new();
        for (raw, _) in self.kv.iter_prefix(&prefix).await? {
            keys.push(self.parse_key(&raw)?);
        }
        Ok(keys)
    }

    /// Bundle counts and bytes per quorum across the whole table.
    pub async fn inventory(&self) -> Result<Inventory, StoreError> {
        let mut inventory = Inventory::default();
        let mut last_blob: Option<BlobKey> = None;

        for (raw, value) in self.kv.iter_prefix(self.table.prefix()).await? {
            let key = self.parse_key(&raw)?;
            // Keys are ordered, so all quorums of a blob are contiguous.
            if last_blob != Some(key.blob_key) {
                inventory.blobs += 1;
                last_blob = Some(key.blob_key);
            }
            let usage = inventory.by_quorum.entry(key.quorum).or_default();
            usage.bundles += 1;
            usage.bytes += value.len() as u64;
        }
        Ok(inventory)
    }

    fn parse_key(&self, raw: &[u8]) -> Result<StorageKey, StoreError> {
        let local = self
            .table
            .strip(raw)
            .ok_or_else(|| StoreError::CorruptKey(hex::encode(raw)))?;
        StorageKey::parse_local(local)
    }
}
