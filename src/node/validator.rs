//! Batch validation.
//!
//! Validation runs after download and before attestation, and covers every
//! blob in the batch. A single invalid blob fails the whole batch.
//!
//! ## Checks
//!
//! Batch level:
//! - the operator state was fetched for the batch's reference block
//! - no blob key appears twice
//! - no bundles arrived for blobs outside the batch
//!
//! Per certificate:
//! - at least one quorum, each `<= MAX_QUORUM_ID`
//! - the operator is assigned to every claimed quorum
//! - a bundle exists for every claimed quorum, and none for other quorums
//! - each bundle passes the [`BundleVerifier`]

use crate::node::store::BlobBundles;
use crate::protocol::{
    Assignment, Batch, BlobHeader, BlobKey, BlobVersionRegistry, EncodingError, OperatorState,
    QuorumId, MAX_QUORUM_ID,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("operator state is for block {actual}, batch references block {expected}")]
    ReferenceBlockMismatch { expected: u64, actual: u64 },

    #[error("duplicate blob {0} in batch")]
    DuplicateBlob(BlobKey),

    #[error("blob {0} claims no quorums")]
    NoQuorums(BlobKey),

    #[error("blob {blob_key} claims invalid quorum {quorum}")]
    InvalidQuorum { blob_key: BlobKey, quorum: QuorumId },

    #[error("operator is not assigned to quorum {quorum} of blob {blob_key}")]
    NotAssigned { blob_key: BlobKey, quorum: QuorumId },

    #[error("missing bundle for blob {blob_key} quorum {quorum}")]
    MissingBundle { blob_key: BlobKey, quorum: QuorumId },

    #[error("unexpected bundle for blob {blob_key} quorum {quorum}")]
    UnexpectedBundle { blob_key: BlobKey, quorum: QuorumId },

    #[error("bundles supplied for blob {0} which is not in the batch")]
    UnknownBlob(BlobKey),

    #[error("bundle for blob {blob_key} quorum {quorum} is {actual} bytes, expected {expected}")]
    BundleLength {
        blob_key: BlobKey,
        quorum: QuorumId,
        expected: u64,
        actual: u64,
    },

    #[error("bundle for blob {blob_key} quorum {quorum} failed verification: {reason}")]
    InvalidBundle {
        blob_key: BlobKey,
        quorum: QuorumId,
        reason: String,
    },

    #[error("validation timed out after {0}ms")]
    TimedOut(u64),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Checks a bundle against the blob's commitment.
///
/// The erasure-coding proof system is external; implementations plug in here.
#[async_trait]
pub trait BundleVerifier: Send + Sync {
    async fn verify_bundle(
        &self,
        blob_key: &BlobKey,
        header: &BlobHeader,
        quorum: QuorumId,
        assignment: &Assignment,
        bundle: &[u8],
    ) -> Result<(), ValidationError>;
}

/// Verifies that a bundle has exactly `num_chunks × chunk_size` bytes for
/// the blob version's encoding parameters.
#[derive(Debug, Clone, Default)]
pub struct LengthVerifier {
    registry: BlobVersionRegistry,
}

impl LengthVerifier {
    pub fn new(registry: BlobVersionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BundleVerifier for LengthVerifier {
    async fn verify_bundle(
        &self,
        blob_key: &BlobKey,
        header: &BlobHeader,
        quorum: QuorumId,
        assignment: &Assignment,
        bundle: &[u8],
    ) -> Result<(), ValidationError> {
        let params = self.registry.get(header.version)?;
        let chunk_size = params.chunk_size_bytes(header.commitment.length)?;
        let expected = u64::from(assignment.num_chunks) * chunk_size;
        let actual = bundle.len() as u64;
        if actual != expected {
            return Err(ValidationError::BundleLength {
                blob_key: *blob_key,
                quorum,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

/// Validates downloaded bundles against a batch and the operator's assignment.
#[derive(Clone)]
pub struct BatchValidator {
    verifier: Arc<dyn BundleVerifier>,
}

impl std::fmt::Debug for BatchValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchValidator").finish_non_exhaustive()
    }
}

impl BatchValidator {
    pub fn new(verifier: Arc<dyn BundleVerifier>) -> Self {
        Self { verifier }
    }

    /// Validate every blob of `batch`.
    ///
    /// # Arguments
    ///
    /// * `batch` - The batch being ingested
    /// * `bundles` - Downloaded bundles, one entry per blob
    /// * `state` - Operator state at `batch.header.reference_block_number`
    ///
    /// # Errors
    ///
    /// The first failing check, in certificate order.
    pub async fn validate(
        &self,
        batch: &Batch,
        bundles: &[BlobBundles],
        state: &OperatorState,
    ) -> Result<(), ValidationError> {
        let reference_block = batch.header.reference_block_number;
        if state.block_number != reference_block {
            return Err(ValidationError::ReferenceBlockMismatch {
                expected: reference_block,
                actual: state.block_number,
            });
        }

        let mut by_blob: BTreeMap<BlobKey, &BlobBundles> = BTreeMap::new();
        for blob in bundles {
            if by_blob.insert(blob.blob_key, blob).is_some() {
                return Err(ValidationError::DuplicateBlob(blob.blob_key));
            }
        }

        let mut seen = BTreeSet::new();
        for cert in &batch.blob_certificates {
            let blob_key = cert.blob_key();
            if !seen.insert(blob_key) {
                return Err(ValidationError::DuplicateBlob(blob_key));
            }

            let empty = BlobBundles::new(blob_key);
            let blob = by_blob.get(&blob_key).copied().unwrap_or(&empty);
            self.validate_blob(&blob_key, &cert.blob_header, blob, state)
                .await?;
        }

        if let Some(stray) = by_blob.keys().find(|k| !seen.contains(*k)) {
            return Err(ValidationError::UnknownBlob(*stray));
        }

        debug!(
            num_blobs = batch.blob_certificates.len(),
            reference_block_number = reference_block,
            "Batch validated"
        );
        Ok(())
    }

    async fn validate_blob(
        &self,
        blob_key: &BlobKey,
        header: &BlobHeader,
        blob: &BlobBundles,
        state: &OperatorState,
    ) -> Result<(), ValidationError> {
        if header.quorum_numbers.is_empty() {
            return Err(ValidationError::NoQuorums(*blob_key));
        }

        for &quorum in &header.quorum_numbers {
            if quorum > MAX_QUORUM_ID {
                return Err(ValidationError::InvalidQuorum {
                    blob_key: *blob_key,
                    quorum,
                });
            }
            let assignment =
                state
                    .assignment(quorum)
                    .ok_or(ValidationError::NotAssigned {
                        blob_key: *blob_key,
                        quorum,
                    })?;
            let bundle = blob
                .bundles
                .get(&quorum)
                .ok_or(ValidationError::MissingBundle {
                    blob_key: *blob_key,
                    quorum,
                })?;
            self.verifier
                .verify_bundle(blob_key, header, quorum, assignment, bundle)
                .await?;
        }

        if let Some(&quorum) = blob
            .bundles
            .keys()
            .find(|q| !header.quorum_numbers.contains(q))
        {
            return Err(ValidationError::UnexpectedBundle {
                blob_key: *blob_key,
                quorum,
            });
        }
        Ok(())
    }
}
