use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// A 32-byte hash used throughout the system
pub type Hash256 = [u8; 32];

/// Null hash (all zeros) used for genesis block's prev_hash and blank positions
pub const NULL_HASH: Hash256 = [0u8; 32];

/// Block height. Genesis is 0, -1 is the blank sentinel.
pub type Height = i64;

/// Height used by blank positions and disconnected headers
pub const BLANK_HEIGHT: Height = -1;

/// First 16 hex chars of a hash, for log lines.
pub fn short_hex(hash: &Hash256) -> String {
    hex::encode(&hash[..8])
}

// ─── Position ────────────────────────────────────────────────────────

/// A (height, hash) pointer into a chain.
///
/// Positions only order meaningfully within a single chain, so no `Ord` is
/// provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub height: Height,
    pub hash: Hash256,
}

impl Position {
    pub const fn new(height: Height, hash: Hash256) -> Self {
        Self { height, hash }
    }

    pub const fn blank() -> Self {
        Self { height: BLANK_HEIGHT, hash: NULL_HASH }
    }

    pub fn is_blank(&self) -> bool {
        self.height == BLANK_HEIGHT && self.hash == NULL_HASH
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::blank()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, short_hex(&self.hash))
    }
}

// ─── Cumulative Work ─────────────────────────────────────────────────

/// Arbitrary precision proof-of-work accumulator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Work(BigUint);

impl Work {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Self(value)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for Work {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl Add<&Work> for &Work {
    type Output = Work;

    fn add(self, rhs: &Work) -> Work {
        Work(&self.0 + &rhs.0)
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Checkpoints ─────────────────────────────────────────────────────

/// A checkpoint as shipped in the per-chain parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointData {
    pub height: Height,
    pub hash: Hash256,
    pub parent_hash: Hash256,
    pub filter_header: Hash256,
}

impl CheckpointData {
    pub const fn position(&self) -> Position {
        Position::new(self.height, self.hash)
    }
}
