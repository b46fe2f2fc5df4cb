//! Tessera - data-availability validator node
//!
//! A node receives batches of blob certificates from a disperser, downloads
//! its assigned chunks from relays, stores and validates them concurrently,
//! and returns a signed attestation over the batch header.
//!
//! Key properties:
//! - A batch is committed entirely or not at all
//! - An attestation is issued only for committed, validated data
//! - Relays answer chunk requests all-or-nothing, in request order
//!
//! Modules:
//! - [`kvstore`]: ordered key-value store with atomic batches
//! - [`node`]: chunk store, validator, ingestion pipeline, node client
//! - [`relay`]: chunk retrieval protocol, request authentication, sharding
//! - [`protocol`]: blob, batch and operator state types

pub mod crypto;
pub mod error;
pub mod kvstore;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod serialization;

pub use error::{ApiError, ApiResult};
