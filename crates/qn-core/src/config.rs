use serde::{Deserialize, Serialize};

/// Top-level client configuration (loaded from quillnotes.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QnConfig {
    pub sync: SyncConfig,
    pub crypto: CryptoConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Auto-sync timer interval in seconds
    pub interval_secs: u64,
    /// Soft latency threshold before a high-latency event is emitted, in seconds
    pub high_latency_secs: u64,
    /// Hard timeout for one server round trip, in seconds
    pub request_timeout_secs: u64,
    /// Maximum dirty payloads per upload batch
    pub batch_limit: usize,
    /// Ask the server to compute an integrity hash on each response
    pub compute_integrity: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            high_latency_secs: 10,
            request_timeout_secs: 60,
            batch_limit: 150,
            compute_integrity: true,
        }
    }
}

/// Key derivation cost overrides, used by tests and constrained devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations)
    pub argon2_time_cost: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Namespace prefix for all on-disk keys; lets multiple accounts share
    /// one host store
    pub namespace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: "default".into(),
        }
    }
}
