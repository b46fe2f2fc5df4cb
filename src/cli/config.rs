//! Node configuration file handling
//!
//! Configuration files are TOML and live in the node data directory next to
//! the key file and the chunk database. Every section is optional; a missing
//! section takes its defaults.
//!
//! Chain-derived values (operator assignments and blob version parameters)
//! are read from `[chain]` until a chain reader is wired in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera::node::NodeSettings;
use tessera::protocol::{
    Assignment, BlobVersionParameters, BlobVersionRegistry, OperatorId, QuorumId, RelayKey,
};
use tessera::relay::{
    RelayConfig, StaticOperatorKeys, DEFAULT_MAX_CHUNKS_PER_REQUEST, DEFAULT_MAX_CHUNK_REQUESTS,
};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TesseraConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub relay: RelaySection,

    #[serde(default)]
    pub chain: ChainConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Serve the v2 dispersal and retrieval API
    #[serde(default = "default_true")]
    pub enable_v2: bool,

    /// Hex operator id. Derived from the node key when unset.
    pub operator_id: Option<String>,

    /// Report only the version from node-info
    #[serde(default)]
    pub disable_node_info_resources: bool,

    #[serde(default = "default_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub validation_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enable_v2: true,
            operator_id: None,
            disable_node_info_resources: false,
            download_timeout_secs: DEFAULT_TIMEOUT_SECS,
            validation_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file. Defaults to `kv.db` in the data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    /// Run an in-process relay over the node's store
    #[serde(default)]
    pub enabled: bool,

    /// Relay keys served. Empty serves every shard.
    #[serde(default)]
    pub shards: Vec<RelayKey>,

    #[serde(default)]
    pub require_authentication: bool,

    #[serde(default = "default_max_chunk_requests")]
    pub max_chunk_requests: usize,

    /// Cap on chunks implied by one call's requests
    #[serde(default = "default_max_chunks_per_request")]
    pub max_chunks_per_request: u64,

    /// Operators allowed to sign chunk requests
    #[serde(default)]
    pub operators: Vec<OperatorKeyEntry>,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            enabled: false,
            shards: Vec::new(),
            require_authentication: false,
            max_chunk_requests: DEFAULT_MAX_CHUNK_REQUESTS,
            max_chunks_per_request: DEFAULT_MAX_CHUNKS_PER_REQUEST,
            operators: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorKeyEntry {
    /// Hex operator id
    pub id: String,
    /// Hex Ed25519 public key
    pub public_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default)]
    pub quorums: Vec<QuorumAssignment>,

    #[serde(default)]
    pub blob_versions: Vec<BlobVersionEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumAssignment {
    pub id: QuorumId,
    pub start_index: u32,
    pub num_chunks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobVersionEntry {
    pub version: u16,
    pub coding_rate: u32,
    pub num_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_chunk_requests() -> usize {
    DEFAULT_MAX_CHUNK_REQUESTS
}

fn default_max_chunks_per_request() -> u64 {
    DEFAULT_MAX_CHUNKS_PER_REQUEST
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl TesseraConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: TesseraConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(data_dir: &Path) -> String {
        format!(
            r#"# Tessera Node Configuration

[node]
# Serve the v2 dispersal and retrieval API
enable_v2 = true

# Operator id (hex). Derived from the node key when unset.
# operator_id = "..."

# Report only the version from node-info
disable_node_info_resources = false

# Phase deadlines for store_chunks, in seconds
download_timeout_secs = 30
validation_timeout_secs = 30

[storage]
# Key-value backend: "sqlite" or "memory"
backend = "sqlite"
path = "{store_path}"

[relay]
# Run an in-process relay over the node's store
enabled = false

# Relay keys this relay serves (empty serves every shard)
shards = []

# Reject unsigned chunk requests
require_authentication = false
max_chunk_requests = 1024
max_chunks_per_request = 1048576

# Operators allowed to sign chunk requests
# [[relay.operators]]
# id = "..."
# public_key = "..."

# Quorum assignments for this operator
[[chain.quorums]]
id = 0
start_index = 0
num_chunks = 8192

# Blob version parameters (version 0 defaults to coding_rate 8, num_chunks 8192)
# [[chain.blob_versions]]
# version = 0
# coding_rate = 8
# num_chunks = 8192

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/tessera/node.log"
"#,
            store_path = default_store_path(data_dir).display()
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(
        config_path: &Path,
        data_dir: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(data_dir);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }

    /// The configured operator id, or `fallback` when unset.
    pub fn operator_id(
        &self,
        fallback: OperatorId,
    ) -> Result<OperatorId, Box<dyn std::error::Error>> {
        match &self.node.operator_id {
            Some(hex_id) => OperatorId::from_hex(hex_id)
                .map_err(|e| format!("Invalid node.operator_id '{}': {}", hex_id, e).into()),
            None => Ok(fallback),
        }
    }

    pub fn node_settings(&self, operator_id: OperatorId) -> NodeSettings {
        NodeSettings {
            enable_v2: self.node.enable_v2,
            operator_id,
            disable_node_info_resources: self.node.disable_node_info_resources,
            download_timeout: Duration::from_secs(self.node.download_timeout_secs),
            validation_timeout: Duration::from_secs(self.node.validation_timeout_secs),
        }
    }

    /// Quorum assignments keyed by quorum id. Duplicate ids are rejected.
    pub fn assignments(
        &self,
    ) -> Result<BTreeMap<QuorumId, Assignment>, Box<dyn std::error::Error>> {
        let mut assignments = BTreeMap::new();
        for quorum in &self.chain.quorums {
            let assignment = Assignment {
                start_index: quorum.start_index,
                num_chunks: quorum.num_chunks,
            };
            if assignments.insert(quorum.id, assignment).is_some() {
                return Err(format!("Duplicate assignment for quorum {}", quorum.id).into());
            }
        }
        Ok(assignments)
    }

    /// Blob version parameters, falling back to the built-in registry.
    pub fn blob_versions(&self) -> BlobVersionRegistry {
        if self.chain.blob_versions.is_empty() {
            return BlobVersionRegistry::default();
        }
        let versions = self
            .chain
            .blob_versions
            .iter()
            .map(|v| {
                (
                    v.version,
                    BlobVersionParameters {
                        coding_rate: v.coding_rate,
                        num_chunks: v.num_chunks,
                    },
                )
            })
            .collect();
        BlobVersionRegistry::new(versions)
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            shards: self.relay.shards.clone(),
            max_chunk_requests: self.relay.max_chunk_requests,
            max_chunks_per_request: self.relay.max_chunks_per_request,
        }
    }

    /// Operator keys accepted by the relay.
    pub fn operator_keys(&self) -> Result<StaticOperatorKeys, Box<dyn std::error::Error>> {
        let mut keys = StaticOperatorKeys::new();
        for entry in &self.relay.operators {
            let id = OperatorId::from_hex(&entry.id)
                .map_err(|e| format!("Invalid relay operator id '{}': {}", entry.id, e))?;
            let public_key = hex::decode(&entry.public_key)
                .map_err(|e| format!("Invalid public key for operator {}: {}", entry.id, e))?;
            keys.insert(id, public_key);
        }
        Ok(keys)
    }

    /// Database path, defaulting into `data_dir`.
    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| default_store_path(data_dir))
    }
}

/// Default node data directory (`~/.local/share/tessera` on Linux)
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tessera")
}

pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn default_passphrase_path(data_dir: &Path) -> PathBuf {
    data_dir.join("passphrase.txt")
}

pub fn default_store_path(data_dir: &Path) -> PathBuf {
    data_dir.join("kv.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TesseraConfig::default();

        assert!(config.node.enable_v2);
        assert_eq!(config.node.download_timeout_secs, 30);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(!config.relay.enabled);
        assert_eq!(config.relay.max_chunk_requests, 1024);
        assert_eq!(config.relay.max_chunks_per_request, 1 << 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generate_default_toml_parses() {
        let data_dir = PathBuf::from("/data/tessera");
        let contents = TesseraConfig::generate_default_toml(&data_dir);

        let config: TesseraConfig = toml::from_str(&contents).unwrap();

        assert_eq!(config.storage.path, Some(data_dir.join("kv.db")));
        assert_eq!(config.chain.quorums.len(), 1);
        assert_eq!(config.chain.quorums[0].num_chunks, 8192);
        assert!(config.relay.shards.is_empty());
    }

    #[test]
    fn test_create_default_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        TesseraConfig::create_default(&config_path, temp_dir.path()).unwrap();
        let config = TesseraConfig::load(&config_path).unwrap();

        assert_eq!(config.store_path(temp_dir.path()), temp_dir.path().join("kv.db"));
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config = TesseraConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.relay.enabled = true;
        config.relay.shards = vec![0, 2];
        config.chain.quorums.push(QuorumAssignment {
            id: 1,
            start_index: 4,
            num_chunks: 2,
        });
        config.save(&config_path).unwrap();

        let loaded = TesseraConfig::load(&config_path).unwrap();
        assert_eq!(loaded.storage.backend, StorageBackend::Memory);
        assert_eq!(loaded.relay.shards, vec![0, 2]);
        assert_eq!(loaded.chain.quorums, config.chain.quorums);
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = TesseraConfig::load(&config_path).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert!(config.node.enable_v2, "Missing sections take defaults");
        assert_eq!(config.node.validation_timeout_secs, 30);
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[storage]\nbackend = \"rocks\"\n").unwrap();

        let err = TesseraConfig::load(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_duplicate_quorum_rejected() {
        let mut config = TesseraConfig::default();
        let q = QuorumAssignment {
            id: 0,
            start_index: 0,
            num_chunks: 1,
        };
        config.chain.quorums = vec![q, q];
        assert!(config.assignments().is_err());
    }

    #[test]
    fn test_operator_id_override() {
        let fallback = OperatorId::new([1u8; 32]);
        let mut config = TesseraConfig::default();
        assert_eq!(config.operator_id(fallback).unwrap(), fallback);

        config.node.operator_id = Some(hex::encode([2u8; 32]));
        assert_eq!(config.operator_id(fallback).unwrap(), OperatorId::new([2u8; 32]));

        config.node.operator_id = Some("zz".to_string());
        assert!(config.operator_id(fallback).is_err());
    }

    #[test]
    fn test_blob_versions_fallback() {
        let mut config = TesseraConfig::default();
        assert_eq!(config.blob_versions(), BlobVersionRegistry::default());

        config.chain.blob_versions.push(BlobVersionEntry {
            version: 3,
            coding_rate: 2,
            num_chunks: 4,
        });
        let registry = config.blob_versions();
        assert!(registry.get(0).is_err());
        assert_eq!(registry.get(3).unwrap().num_chunks, 4);
    }

    #[test]
    fn test_operator_keys_from_config() {
        let mut config = TesseraConfig::default();
        config.relay.operators.push(OperatorKeyEntry {
            id: hex::encode([7u8; 32]),
            public_key: hex::encode([1u8; 32]),
        });
        assert_eq!(config.operator_keys().unwrap().len(), 1);

        config.relay.operators[0].public_key = "not-hex".to_string();
        assert!(config.operator_keys().is_err());
    }
}
