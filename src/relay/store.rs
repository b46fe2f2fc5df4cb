//! Relay-side storage: blob certificates, blob payloads and chunk frames.
//!
//! | Table          | Key      | Value                         |
//! |----------------|----------|-------------------------------|
//! | `relay-cert`   | blob key | CBOR `BlobCertificate`        |
//! | `relay-blob`   | blob key | raw blob bytes                |
//! | `relay-frames` | blob key | length-prefixed chunk frames  |

use crate::kvstore::{KvError, KvStore, Table, WriteOp};
use crate::protocol::{BlobCertificate, BlobKey};
use crate::serialization::{decode_frames, encode_frames, from_cbor, to_cbor, SerializationError};
use std::sync::Arc;
use thiserror::Error;

const CERT_TABLE: &str = "relay-cert";
const BLOB_TABLE: &str = "relay-blob";
const FRAMES_TABLE: &str = "relay-frames";

#[derive(Debug, Error)]
pub enum RelayStoreError {
    #[error("blob {0} not found")]
    NotFound(BlobKey),

    #[error("certificate does not match blob key {0}")]
    KeyMismatch(BlobKey),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

#[derive(Clone)]
pub struct RelayStore {
    kv: Arc<dyn KvStore>,
    certs: Table,
    blobs: Table,
    frames: Table,
}

impl RelayStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            certs: Table::new(CERT_TABLE),
            blobs: Table::new(BLOB_TABLE),
            frames: Table::new(FRAMES_TABLE),
        }
    }

    /// Store a blob with its certificate and encoded chunks in one batch.
    pub async fn put_blob(
        &self,
        certificate: &BlobCertificate,
        blob: &[u8],
        chunks: &[Vec<u8>],
    ) -> Result<BlobKey, RelayStoreError> {
        let blob_key = certificate.blob_key();
        let id = blob_key.as_bytes();
        let ops = vec![
            WriteOp::Put {
                key: self.certs.key(id),
                value: to_cbor(certificate)?,
            },
            WriteOp::Put {
                key: self.blobs.key(id),
                value: blob.to_vec(),
            },
            WriteOp::Put {
                key: self.frames.key(id),
                value: encode_frames(chunks)?,
            },
        ];
        self.kv.apply(ops).await?;
        Ok(blob_key)
    }

    pub async fn certificate(
        &self,
        blob_key: &BlobKey,
    ) -> Result<BlobCertificate, RelayStoreError> {
        let bytes = self.read(&self.certs, blob_key).await?;
        let certificate: BlobCertificate = from_cbor(&bytes)?;
        if certificate.blob_key() != *blob_key {
            return Err(RelayStoreError::KeyMismatch(*blob_key));
        }
        Ok(certificate)
    }

    pub async fn blob(&self, blob_key: &BlobKey) -> Result<Vec<u8>, RelayStoreError> {
        self.read(&self.blobs, blob_key).await
    }

    pub async fn frames(&self, blob_key: &BlobKey) -> Result<Vec<Vec<u8>>, RelayStoreError> {
        let bytes = self.read(&self.frames, blob_key).await?;
        Ok(decode_frames(&bytes)?)
    }

    async fn read(&self, table: &Table, blob_key: &BlobKey) -> Result<Vec<u8>, RelayStoreError> {
        match self.kv.get(&table.key(blob_key.as_bytes())).await {
            Ok(bytes) => Ok(bytes),
            Err(KvError::NotFound) => Err(RelayStoreError::NotFound(*blob_key)),
            Err(e) => Err(e.into()),
        }
    }
}
