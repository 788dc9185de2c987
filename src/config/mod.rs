//! Node configuration file.
//!
//! JSON, every field optional:
//!
//! ```json
//! {
//!   "data_dir": "headerforge_data",
//!   "chain": "bitcoin",
//!   "checkpoint": { "height": 2016, "hash": "<display hex>" },
//!   "log_filter": "headerforge=debug"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::params::{self, ChainId, MIN_CHECKPOINT_HEIGHT};
use crate::core::types::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_chain")]
    pub chain: ChainId,
    /// Replaces the chain's built-in default checkpoint
    #[serde(default)]
    pub checkpoint: Option<CheckpointOverride>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointOverride {
    pub height: Height,
    /// Block hash in display (byte-reversed) hex
    pub hash: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("headerforge_data")
}

fn default_chain() -> ChainId {
    ChainId::Bitcoin
}

fn default_log_filter() -> String {
    "headerforge=info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chain: default_chain(),
            checkpoint: None,
            log_filter: default_log_filter(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Database directory for the configured chain
    pub fn chain_dir(&self) -> PathBuf {
        self.data_dir.join(self.chain.name())
    }

    /// The checkpoint `init` should upgrade to
    pub fn default_checkpoint(&self) -> Result<CheckpointData, ConfigError> {
        let Some(over) = &self.checkpoint else {
            return Ok(params::default_checkpoint(self.chain));
        };
        if over.height < MIN_CHECKPOINT_HEIGHT {
            return Err(ConfigError::Checkpoint(format!(
                "height {} is below minimum {}",
                over.height, MIN_CHECKPOINT_HEIGHT
            )));
        }
        let hash = parse_display_hash(&over.hash).map_err(ConfigError::Checkpoint)?;
        Ok(CheckpointData { height: over.height, hash, parent_hash: NULL_HASH, filter_header: NULL_HASH })
    }
}

/// Parse a hash written in display order (most significant byte first)
pub fn parse_display_hash(text: &str) -> Result<Hash256, String> {
    let bytes = hex::decode(text.trim()).map_err(|e| format!("bad hex '{}': {}", text, e))?;
    let mut hash: Hash256 = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
    hash.reverse();
    Ok(hash)
}

/// Display-order hex of a hash
pub fn display_hash(hash: &Hash256) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    hex::encode(reversed)
}
