//! Node host information.

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Crate version reported to peers.
pub const SEMVER: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub semver: String,
    pub os: String,
    pub arch: String,
    pub num_cpu: u32,
    pub mem_bytes: u64,
}

impl NodeInfo {
    /// Version only, for nodes that hide their resources.
    pub fn version_only() -> Self {
        Self {
            semver: SEMVER.to_string(),
            os: String::new(),
            arch: String::new(),
            num_cpu: 0,
            mem_bytes: 0,
        }
    }

    /// Version plus host resources. Memory is 0 if it cannot be read.
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_memory();

        let num_cpu = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);

        Self {
            semver: SEMVER.to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            num_cpu,
            mem_bytes: system.total_memory(),
        }
    }
}
