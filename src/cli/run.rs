use super::config::{
    default_config_path, default_data_dir, default_passphrase_path, StorageBackend, TesseraConfig,
};
use super::passphrase::{determine_passphrase_source, read_passphrase};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera::crypto::NodeKeyring;
use tessera::kvstore::{KvStore, MemoryStore, SqliteStore};
use tessera::node::{BatchValidator, ChunkStore, LengthVerifier, NodeServer, RelayBundleDownloader};
use tessera::protocol::StaticChainState;
use tessera::relay::{RelayServer, RelayStore, RequestAuthenticator};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run the node service
///
/// ## Configuration Loading
///
/// 1. `--config` flag if provided
/// 2. `config.toml` in the data directory
///
/// If the config file doesn't exist, a default one is generated.
///
/// ## Key Loading
///
/// 1. `--passphrase-file` flag if provided
/// 2. `TESSERA_KEY_PASSPHRASE` environment variable
/// 3. `passphrase.txt` in the data directory
/// 4. Interactive prompt (stdin)
pub async fn execute(
    config_path: Option<String>,
    data_dir: Option<String>,
    passphrase_file: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, data_dir) = resolve_paths(config_path, data_dir);
    let config = load_or_create(&config_path, &data_dir)?;
    init_logging(&config)?;

    info!(config = %config_path.display(), data_dir = %data_dir.display(), "Starting node");

    let source = determine_passphrase_source(passphrase_file, &default_passphrase_path(&data_dir));
    let mnemonic = read_passphrase(source, None)?;

    serve(&config, &data_dir, &mnemonic, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
        }
    })
    .await
}

/// A wired node and the store it owns.
pub struct Node {
    pub server: Arc<NodeServer>,
    pub relay: Option<Arc<RelayServer>>,
    kv: Arc<dyn KvStore>,
}

impl Node {
    pub async fn shutdown(self) -> Result<(), Box<dyn std::error::Error>> {
        self.kv.shutdown().await?;
        info!("Store closed");
        Ok(())
    }
}

/// Build the node, run until `shutdown` resolves, then close the store.
pub async fn serve<F>(
    config: &TesseraConfig,
    data_dir: &Path,
    mnemonic: &str,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()>,
{
    let node = build(config, data_dir, mnemonic).await?;
    info!(
        enable_v2 = node.server.settings().enable_v2,
        operator_id = %node.server.settings().operator_id,
        relay = node.relay.is_some(),
        "Node ready"
    );

    shutdown.await;
    info!("Shutting down");
    node.shutdown().await
}

/// Wire key, store, chain view, relay and server from `config`.
pub async fn build(
    config: &TesseraConfig,
    data_dir: &Path,
    mnemonic: &str,
) -> Result<Node, Box<dyn std::error::Error>> {
    let keyring = NodeKeyring::from_mnemonic(mnemonic)?;
    let keypair = Arc::new(keyring.attestation_keypair()?);
    let operator_id = config.operator_id(keypair.operator_id())?;

    let kv = open_store(config, data_dir).await?;
    let chain = Arc::new(StaticChainState::new(operator_id, config.assignments()?));

    let mut downloader = RelayBundleDownloader::new(Arc::clone(&keypair), operator_id);
    let relay = if config.relay.enabled {
        let mut keys = config.operator_keys()?;
        keys.insert(operator_id, keypair.public_key().to_vec());
        let authenticator =
            RequestAuthenticator::new(Box::new(keys), config.relay.require_authentication);
        let relay = Arc::new(RelayServer::new(
            config.relay_config(),
            RelayStore::new(Arc::clone(&kv)),
            authenticator,
        ));
        for shard in &config.relay.shards {
            downloader = downloader.with_relay(*shard, relay.clone());
        }
        if config.relay.shards.is_empty() {
            downloader = downloader.with_default_relay(relay.clone());
        }
        Some(relay)
    } else {
        warn!("No relay configured; store_chunks downloads will fail");
        None
    };

    let validator = BatchValidator::new(Arc::new(LengthVerifier::new(config.blob_versions())));
    let server = NodeServer::new(
        config.node_settings(operator_id),
        chain,
        Arc::new(downloader),
        validator,
    )
    .with_store(ChunkStore::new(Arc::clone(&kv)))
    .with_keypair(keypair);

    Ok(Node {
        server: Arc::new(server),
        relay,
        kv,
    })
}

/// Open the configured key-value backend.
pub async fn open_store(
    config: &TesseraConfig,
    data_dir: &Path,
) -> Result<Arc<dyn KvStore>, Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            let path = config.store_path(data_dir);
            let store = SqliteStore::open(&path)
                .await
                .map_err(|e| format!("Failed to open store '{}': {}", path.display(), e))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("Using in-memory store; chunks are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Resolve `(config_path, data_dir)` from flags and defaults.
pub fn resolve_paths(config_path: Option<String>, data_dir: Option<String>) -> (PathBuf, PathBuf) {
    let data_dir = data_dir.map(PathBuf::from).unwrap_or_else(default_data_dir);
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_config_path(&data_dir));
    (config_path, data_dir)
}

/// Load the config, writing a default one first if it is missing.
pub fn load_or_create(
    config_path: &Path,
    data_dir: &Path,
) -> Result<TesseraConfig, Box<dyn std::error::Error>> {
    if !config_path.exists() {
        println!("No config file found. Creating {}", config_path.display());
        TesseraConfig::create_default(config_path, data_dir)?;
    }
    TesseraConfig::load(config_path)
}

/// Install the global subscriber. Repeated calls keep the first one.
fn init_logging(config: &TesseraConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .map_err(|e| format!("Invalid log level '{}': {}", config.logging.level, e))?;

    let installed = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open log file '{}': {}", path.display(), e))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    if installed.is_err() {
        warn!("Logging already initialized");
    }
    Ok(())
}
