//! Relay request authentication.
//!
//! ## Request Hash
//!
//! ```text
//! keccak256(
//!     operator_id
//!     ‖ for each request:
//!         ByIndex: 'i' ‖ blob_key ‖ index₀ ‖ index₁ ‖ ...
//!         ByRange: 'r' ‖ blob_key ‖ start ‖ start+1 ‖ ... ‖ end-1
//! )
//! ```
//!
//! Every index is a 4-byte big-endian integer. A range is hashed as its
//! expanded index list, so the discriminator byte is what separates
//! `ByIndex{[2,3]}` from `ByRange{2..4}`. Relays and nodes must agree on
//! this layout byte-for-byte.

use crate::crypto::hashing::{KeccakWriter, HASH_LEN};
use crate::crypto::keyring::{verify_signature, NodeKeyPair};
use crate::protocol::OperatorId;
use crate::relay::request::{ChunkRequest, GetChunksRequest};
use std::collections::HashMap;
use thiserror::Error;

const BY_INDEX_TAG: u8 = b'i';
const BY_RANGE_TAG: u8 = b'r';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("operator id and signature must be supplied together")]
    IncompleteCredentials,

    #[error("request is not signed")]
    MissingCredentials,

    #[error("unknown operator {0}")]
    UnknownOperator(OperatorId),

    #[error("signature verification failed for operator {0}")]
    InvalidSignature(OperatorId),
}

/// Hash of a relay `get_chunks` request, signed by the requesting operator.
pub fn hash_get_chunks_request(
    operator_id: &OperatorId,
    requests: &[ChunkRequest],
) -> [u8; HASH_LEN] {
    let mut writer = KeccakWriter::new();
    writer.update(operator_id.as_bytes());
    for request in requests {
        match request {
            ChunkRequest::ByIndex { blob_key, indices } => {
                writer.update_u8(BY_INDEX_TAG).update(blob_key.as_bytes());
                for index in indices {
                    writer.update_u32(*index);
                }
            }
            ChunkRequest::ByRange {
                blob_key,
                start,
                end,
            } => {
                writer.update_u8(BY_RANGE_TAG).update(blob_key.as_bytes());
                for index in *start..*end {
                    writer.update_u32(index);
                }
            }
        }
    }
    writer.finalize()
}

/// Build a signed request on behalf of `operator_id`.
pub fn sign_get_chunks_request(
    keypair: &NodeKeyPair,
    operator_id: OperatorId,
    chunk_requests: Vec<ChunkRequest>,
) -> GetChunksRequest {
    let hash = hash_get_chunks_request(&operator_id, &chunk_requests);
    GetChunksRequest {
        chunk_requests,
        operator_id: Some(operator_id),
        operator_signature: Some(keypair.sign_message(&hash)),
    }
}

/// Maps operator ids to their registered public keys.
pub trait OperatorKeyResolver: Send + Sync {
    fn public_key(&self, operator_id: &OperatorId) -> Option<Vec<u8>>;
}

/// Operator keys from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticOperatorKeys {
    keys: HashMap<OperatorId, Vec<u8>>,
}

impl StaticOperatorKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, operator_id: OperatorId, public_key: Vec<u8>) {
        self.keys.insert(operator_id, public_key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl OperatorKeyResolver for StaticOperatorKeys {
    fn public_key(&self, operator_id: &OperatorId) -> Option<Vec<u8>> {
        self.keys.get(operator_id).cloned()
    }
}

/// Outcome of a successful authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    Anonymous,
    Operator(OperatorId),
}

/// Checks request signatures against registered operator keys.
pub struct RequestAuthenticator {
    resolver: Box<dyn OperatorKeyResolver>,
    require_authentication: bool,
}

impl RequestAuthenticator {
    pub fn new(resolver: Box<dyn OperatorKeyResolver>, require_authentication: bool) -> Self {
        Self {
            resolver,
            require_authentication,
        }
    }

    pub fn requires_authentication(&self) -> bool {
        self.require_authentication
    }

    /// Authenticate `request`.
    ///
    /// Signed requests are always verified, even when anonymous requests
    /// are allowed.
    pub fn authenticate(&self, request: &GetChunksRequest) -> Result<Requester, AuthError> {
        match (&request.operator_id, &request.operator_signature) {
            (None, None) if self.require_authentication => Err(AuthError::MissingCredentials),
            (None, None) => Ok(Requester::Anonymous),
            (Some(operator_id), Some(signature)) => {
                let public_key = self
                    .resolver
                    .public_key(operator_id)
                    .ok_or(AuthError::UnknownOperator(*operator_id))?;
                let hash = hash_get_chunks_request(operator_id, &request.chunk_requests);
                if !verify_signature(&public_key, &hash, signature) {
                    return Err(AuthError::InvalidSignature(*operator_id));
                }
                Ok(Requester::Operator(*operator_id))
            }
            _ => Err(AuthError::IncompleteCredentials),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;
    use crate::protocol::BlobKey;

    fn blob_key() -> BlobKey {
        BlobKey::new([0x11; 32])
    }

    fn authenticator(keypair: &NodeKeyPair, required: bool) -> RequestAuthenticator {
        let mut keys = StaticOperatorKeys::new();
        keys.insert(keypair.operator_id(), keypair.public_key().to_vec());
        RequestAuthenticator::new(Box::new(keys), required)
    }

    #[test]
    fn test_hash_byte_layout() {
        let operator = OperatorId::new([0x22; 32]);
        let requests = vec![
            ChunkRequest::ByIndex {
                blob_key: blob_key(),
                indices: vec![1, 258],
            },
            ChunkRequest::ByRange {
                blob_key: blob_key(),
                start: 5,
                end: 7,
            },
        ];

        let mut expected = vec![0x22; 32];
        expected.push(b'i');
        expected.extend_from_slice(&[0x11; 32]);
        expected.extend_from_slice(&[0, 0, 0, 1]);
        expected.extend_from_slice(&[0, 0, 1, 2]);
        expected.push(b'r');
        expected.extend_from_slice(&[0x11; 32]);
        expected.extend_from_slice(&[0, 0, 0, 5]);
        expected.extend_from_slice(&[0, 0, 0, 6]);

        assert_eq!(
            hash_get_chunks_request(&operator, &requests),
            keccak256(&expected)
        );
    }

    #[test]
    fn test_discriminator_separates_shapes() {
        let operator = OperatorId::new([0x22; 32]);
        let by_index = vec![ChunkRequest::ByIndex {
            blob_key: blob_key(),
            indices: vec![2, 3],
        }];
        let by_range = vec![ChunkRequest::ByRange {
            blob_key: blob_key(),
            start: 2,
            end: 4,
        }];
        assert_ne!(
            hash_get_chunks_request(&operator, &by_index),
            hash_get_chunks_request(&operator, &by_range)
        );
    }

    #[test]
    fn test_signed_request_verifies() {
        let keypair = NodeKeyPair::from_seed(&[4u8; 32]).unwrap();
        let request = sign_get_chunks_request(
            &keypair,
            keypair.operator_id(),
            vec![ChunkRequest::ByRange {
                blob_key: blob_key(),
                start: 0,
                end: 3,
            }],
        );

        let auth = authenticator(&keypair, true);
        assert_eq!(
            auth.authenticate(&request),
            Ok(Requester::Operator(keypair.operator_id()))
        );
    }

    #[test]
    fn test_tampered_request_rejected() {
        let keypair = NodeKeyPair::from_seed(&[4u8; 32]).unwrap();
        let mut request = sign_get_chunks_request(
            &keypair,
            keypair.operator_id(),
            vec![ChunkRequest::ByIndex {
                blob_key: blob_key(),
                indices: vec![1],
            }],
        );
        request.chunk_requests = vec![ChunkRequest::ByIndex {
            blob_key: blob_key(),
            indices: vec![2],
        }];

        let auth = authenticator(&keypair, false);
        assert_eq!(
            auth.authenticate(&request),
            Err(AuthError::InvalidSignature(keypair.operator_id()))
        );
    }

    #[test]
    fn test_anonymous_requests_follow_policy() {
        let keypair = NodeKeyPair::from_seed(&[4u8; 32]).unwrap();
        let request = GetChunksRequest::anonymous(vec![]);

        assert_eq!(
            authenticator(&keypair, false).authenticate(&request),
            Ok(Requester::Anonymous)
        );
        assert_eq!(
            authenticator(&keypair, true).authenticate(&request),
            Err(AuthError::MissingCredentials)
        );
    }

    #[test]
    fn test_half_credentials_and_unknown_operator() {
        let keypair = NodeKeyPair::from_seed(&[4u8; 32]).unwrap();
        let auth = authenticator(&keypair, false);

        let mut request = GetChunksRequest::anonymous(vec![]);
        request.operator_id = Some(keypair.operator_id());
        assert_eq!(
            auth.authenticate(&request),
            Err(AuthError::IncompleteCredentials)
        );

        let stranger = NodeKeyPair::from_seed(&[5u8; 32]).unwrap();
        let request = sign_get_chunks_request(&stranger, stranger.operator_id(), vec![]);
        assert_eq!(
            auth.authenticate(&request),
            Err(AuthError::UnknownOperator(stranger.operator_id()))
        );
    }
}
