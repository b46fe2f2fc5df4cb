//! Disperser-side client for a node's dispersal API.
//!
//! The connection is opened lazily on the first `store_chunks` call and
//! reused afterwards. `close` may be called any number of times.

use crate::error::{ApiError, ApiResult};
use crate::node::attestation::Attestation;
use crate::node::server::{DispersalService, RequestContext};
use crate::protocol::{Batch, OperatorId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeClientConfig {
    pub hostname: String,
    pub port: String,
    pub operator_id: OperatorId,
    /// Node public key. When set, returned attestations are verified.
    pub public_key: Option<Vec<u8>>,
}

impl NodeClientConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Opens a connection to a node's dispersal API.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn DispersalService>, String>;
}

#[derive(Default)]
struct Connection {
    service: Option<Arc<dyn DispersalService>>,
    closed: bool,
}

pub struct NodeClient {
    config: NodeClientConfig,
    connector: Arc<dyn Connector>,
    connection: Mutex<Connection>,
}

impl NodeClient {
    pub fn new(config: NodeClientConfig, connector: Arc<dyn Connector>) -> ApiResult<Self> {
        if config.hostname.is_empty() || config.port.is_empty() {
            return Err(ApiError::InvalidArgument(format!(
                "invalid node client config: {:?}",
                config.address()
            )));
        }
        Ok(Self {
            config,
            connector,
            connection: Mutex::new(Connection::default()),
        })
    }

    /// Send `batch` to the node and return its attestation.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument`: the batch has no certificates (no connection is made)
    /// - `Unavailable`: the connection could not be opened
    /// - `Internal`: the client is closed, or a malformed or invalid signature
    /// - any error returned by the node
    pub async fn store_chunks(
        &self,
        ctx: &RequestContext,
        batch: Batch,
    ) -> ApiResult<Attestation> {
        if batch.is_empty() {
            return Err(ApiError::InvalidArgument(
                "no blob certificates in the batch".to_string(),
            ));
        }

        let service = self.service().await?;
        let header = batch.header.clone();
        let reply = service.store_chunks(ctx, batch).await?;

        let attestation =
            Attestation::from_signature(&header, self.config.operator_id, reply.signature)
                .map_err(|e| ApiError::Internal(format!("failed to decode signature: {}", e)))?;
        if let Some(public_key) = &self.config.public_key {
            attestation
                .verify(public_key)
                .map_err(|e| ApiError::Internal(format!("invalid attestation: {}", e)))?;
        }
        Ok(attestation)
    }

    /// Drop the connection. Safe to call repeatedly.
    pub async fn close(&self) -> ApiResult<()> {
        let mut connection = self.connection.lock().await;
        if connection.service.take().is_some() {
            debug!(address = %self.config.address(), "Closed node connection");
        }
        connection.closed = true;
        Ok(())
    }

    async fn service(&self) -> ApiResult<Arc<dyn DispersalService>> {
        let mut connection = self.connection.lock().await;
        if connection.closed {
            return Err(ApiError::Internal("node client is closed".to_string()));
        }
        if let Some(service) = &connection.service {
            return Ok(Arc::clone(service));
        }

        let address = self.config.address();
        let service = self
            .connector
            .connect(&address)
            .await
            .map_err(|e| {
                ApiError::Unavailable(format!("failed to connect to {}: {}", address, e))
            })?;
        debug!(address = %address, "Connected to node");
        connection.service = Some(Arc::clone(&service));
        Ok(service)
    }
}
