//! Configuration for the indexer

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Micro-STX per STX
const USTX_PER_STX: u64 = 1_000_000;

/// Indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Pipeline configuration
    pub pipeline: PipelineConfig,

    /// Protocol parameters
    pub protocol: ProtocolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/indexer"),
            service_name: "token-indexer".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            pipeline: PipelineConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync every commit
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Stream pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decoded transactions buffered ahead of the writer
    pub prefetch_depth: usize,

    /// Indexer actor mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefetch_depth: 256,
            mailbox_capacity: 1024,
        }
    }
}

/// Protocol parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Minimum STX payment per operation, in STX
    #[serde(with = "rust_decimal::serde::str")]
    pub min_payment: Decimal,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            min_payment: Decimal::new(1, 6), // 0.000001 STX
        }
    }
}

impl ProtocolConfig {
    /// Minimum payment in micro-STX
    ///
    /// Fails if the amount is negative or finer than one micro-STX.
    pub fn min_payment_ustx(&self) -> crate::Result<u64> {
        let min_payment = self.min_payment.normalize();
        if min_payment.is_sign_negative() {
            return Err(crate::Error::Config(format!(
                "min_payment must not be negative: {}",
                self.min_payment
            )));
        }
        if min_payment.scale() > 6 {
            return Err(crate::Error::Config(format!(
                "min_payment has sub-micro-STX precision: {}",
                self.min_payment
            )));
        }

        (min_payment * Decimal::from(USTX_PER_STX))
            .to_u64()
            .ok_or_else(|| {
                crate::Error::Config(format!("min_payment out of range: {}", self.min_payment))
            })
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("TOKEN_INDEXER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(min_payment) = std::env::var("TOKEN_INDEXER_MIN_PAYMENT") {
            config.protocol.min_payment = min_payment.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid TOKEN_INDEXER_MIN_PAYMENT: {}", e))
            })?;
        }

        if let Ok(depth) = std::env::var("TOKEN_INDEXER_PREFETCH") {
            config.pipeline.prefetch_depth = depth.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid TOKEN_INDEXER_PREFETCH: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail deep inside the pipeline
    pub fn validate(&self) -> crate::Result<()> {
        if self.pipeline.prefetch_depth == 0 || self.pipeline.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "pipeline buffers must be non-empty".to_string(),
            ));
        }
        self.protocol.min_payment_ustx()?;
        Ok(())
    }
}
