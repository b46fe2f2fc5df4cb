//! Protocol data model: blobs, batches, encoding parameters and operator state.

pub mod state;
pub mod types;

pub use state::{
    Assignment, ChainState, ChainStateError, OperatorId, OperatorState, StaticChainState,
};
pub use types::{
    Batch, BatchHeader, BlobCertificate, BlobCommitment, BlobHeader, BlobKey,
    BlobVersionParameters, BlobVersionRegistry, EncodingError, KeyParseError, PaymentMetadata,
    QuorumId, RelayKey, BYTES_PER_SYMBOL, DEFAULT_BLOB_VERSION, MAX_QUORUM_ID,
};
