//! Hashing primitives for HeaderForge.
//!
//! Every identifier in the header chain (block hash, txid, merkle node) is a
//! double SHA-256 digest, matching the standard 80-byte header family.

use sha2::{Digest, Sha256};

use crate::core::types::{Hash256, NULL_HASH};

/// Double SHA-256 of an arbitrary byte string.
pub fn double_sha256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Hash two merkle nodes into their parent.
pub fn merkle_parent(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(left);
    combined[32..].copy_from_slice(right);
    double_sha256(&combined)
}

/// Compute the merkle root of a set of transaction ids.
///
/// Odd levels duplicate their last node. An empty set has the null root.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return NULL_HASH;
    }

    let mut level: Vec<Hash256> = txids.to_vec();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }
        level = level
            .chunks(2)
            .map(|pair| merkle_parent(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}
