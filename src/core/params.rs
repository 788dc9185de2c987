//! HeaderForge Chain Parameters
//! Genesis headers and default checkpoints for every supported chain.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::core::block::BlockHeader;
use crate::core::types::*;

/// Minimum height at which a checkpoint may be placed.
/// Genesis and its direct child can never be banned.
pub const MIN_CHECKPOINT_HEIGHT: Height = 2;

/// Number of best-chain hashes returned by `recent_hashes`
pub const RECENT_HASHES: usize = 100;

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Bitcoin,
    Testnet3,
    Regtest,
    /// Synthetic chain for tests: regtest difficulty, distinct genesis
    UnitTest,
}

impl ChainId {
    pub const ALL: [ChainId; 4] = [ChainId::Bitcoin, ChainId::Testnet3, ChainId::Regtest, ChainId::UnitTest];

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Bitcoin => "bitcoin",
            ChainId::Testnet3 => "testnet3",
            ChainId::Regtest => "regtest",
            ChainId::UnitTest => "unittest",
        }
    }

    /// Stable one-byte tag stored in the database.
    pub fn tag(&self) -> u8 {
        match self {
            ChainId::Bitcoin => 1,
            ChainId::Testnet3 => 2,
            ChainId::Regtest => 3,
            ChainId::UnitTest => 0xff,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainId::ALL
            .iter()
            .find(|chain| chain.name() == s.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| format!("unknown chain '{}'", s))
    }
}

/// Merkle root of the shared Bitcoin-family genesis coinbase
const GENESIS_MERKLE_ROOT: Hash256 = [
    0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76, 0x8f, 0x61,
    0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa, 0x4b, 0x1e, 0x5e, 0x4a,
];

const BITCOIN_GENESIS: BlockHeader = BlockHeader {
    version: 1,
    prev_hash: NULL_HASH,
    merkle_root: GENESIS_MERKLE_ROOT,
    timestamp: 1231006505,
    bits: 0x1d00ffff,
    nonce: 2083236893,
};

const TESTNET3_GENESIS: BlockHeader = BlockHeader {
    version: 1,
    prev_hash: NULL_HASH,
    merkle_root: GENESIS_MERKLE_ROOT,
    timestamp: 1296688602,
    bits: 0x1d00ffff,
    nonce: 414098458,
};

const REGTEST_GENESIS: BlockHeader = BlockHeader {
    version: 1,
    prev_hash: NULL_HASH,
    merkle_root: GENESIS_MERKLE_ROOT,
    timestamp: 1296688602,
    bits: 0x207fffff,
    nonce: 2,
};

const UNITTEST_GENESIS: BlockHeader = BlockHeader {
    version: 1,
    prev_hash: NULL_HASH,
    merkle_root: NULL_HASH,
    timestamp: 1_600_000_000,
    bits: 0x207fffff,
    nonce: 0,
};

/// Genesis header fields for a chain
pub fn genesis_header(chain: ChainId) -> BlockHeader {
    match chain {
        ChainId::Bitcoin => BITCOIN_GENESIS,
        ChainId::Testnet3 => TESTNET3_GENESIS,
        ChainId::Regtest => REGTEST_GENESIS,
        ChainId::UnitTest => UNITTEST_GENESIS,
    }
}

/// Genesis hashes, computed once per process and never mutated.
static GENESIS_HASHES: Lazy<HashMap<ChainId, Hash256>> = Lazy::new(|| {
    ChainId::ALL
        .iter()
        .map(|chain| (*chain, genesis_header(*chain).hash()))
        .collect()
});

pub fn genesis_hash(chain: ChainId) -> Hash256 {
    GENESIS_HASHES
        .get(&chain)
        .copied()
        .unwrap_or_else(|| genesis_header(chain).hash())
}

/// Checkpoint shipped with the binary for a chain.
///
/// Chains without a pinned block report the genesis position, which is below
/// `MIN_CHECKPOINT_HEIGHT` and therefore never applied.
pub fn default_checkpoint(chain: ChainId) -> CheckpointData {
    CheckpointData {
        height: 0,
        hash: genesis_hash(chain),
        parent_hash: NULL_HASH,
        filter_header: NULL_HASH,
    }
}
