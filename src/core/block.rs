//! Binary block codec.
//!
//! Header layout (80 bytes, little-endian integers):
//!
//! | offset | size | field       |
//! |--------|------|-------------|
//! | 0      | 4    | version     |
//! | 4      | 32   | prev_hash   |
//! | 36     | 32   | merkle_root |
//! | 68     | 4    | timestamp   |
//! | 72     | 4    | bits        |
//! | 76     | 4    | nonce       |
//!
//! A block is the header followed by a CompactSize transaction count and
//! each transaction as CompactSize length + raw bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::*;
use crate::crypto;

/// Serialized size of a block header
pub const HEADER_SIZE: usize = 80;

/// Upper bound on a single decoded length prefix
const MAX_ITEM_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed header: expected {expected} bytes, got {got}")]
    HeaderSize { expected: usize, got: usize },

    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("length prefix {0} exceeds limit")]
    TooLarge(u64),

    #[error("{0} trailing bytes after block")]
    TrailingBytes(usize),
}

/// The raw consensus fields of a block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != HEADER_SIZE {
            return Err(CodecError::HeaderSize { expected: HEADER_SIZE, got: bytes.len() });
        }
        let mut prev_hash = NULL_HASH;
        prev_hash.copy_from_slice(&bytes[4..36]);
        let mut merkle_root = NULL_HASH;
        merkle_root.copy_from_slice(&bytes[36..68]);
        Ok(BlockHeader {
            version: read_u32(bytes, 0),
            prev_hash,
            merkle_root,
            timestamp: read_u32(bytes, 68),
            bits: read_u32(bytes, 72),
            nonce: read_u32(bytes, 76),
        })
    }

    /// Block hash: double SHA-256 of the serialized header.
    pub fn hash(&self) -> Hash256 {
        crypto::double_sha256(&self.to_bytes())
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

// ─── CompactSize ─────────────────────────────────────────────────────

pub fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Decode a CompactSize at `*pos`, advancing the cursor.
pub fn read_compact_size(bytes: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let prefix = *bytes.get(*pos).ok_or(CodecError::Truncated(*pos))?;
    let width = match prefix {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        n => {
            *pos += 1;
            return Ok(n as u64);
        }
    };
    let start = *pos + 1;
    let end = start + width;
    let slice = bytes.get(start..end).ok_or(CodecError::Truncated(start))?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(slice);
    *pos = end;
    Ok(u64::from_le_bytes(buf))
}

// ─── Transactions & Blocks ──────────────────────────────────────────

/// An opaque serialized transaction. Only its identity matters here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub bytes: Vec<u8>,
}

impl Transaction {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn txid(&self) -> Hash256 {
        crypto::double_sha256(&self.bytes)
    }
}

/// A complete block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build a block whose header commits to `transactions`.
    pub fn assemble(mut header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
        header.merkle_root = crypto::merkle_root(&txids);
        Block { header, transactions }
    }

    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        crypto::merkle_root(&txids)
    }

    pub fn validate_merkle_root(&self) -> bool {
        self.header.merkle_root == self.compute_merkle_root()
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.transactions.iter().map(|tx| tx.bytes.len() + 9).sum();
        let mut out = Vec::with_capacity(HEADER_SIZE + 9 + body);
        out.extend_from_slice(&self.header.to_bytes());
        write_compact_size(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            write_compact_size(&mut out, tx.bytes.len() as u64);
            out.extend_from_slice(&tx.bytes);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let head = bytes.get(..HEADER_SIZE).ok_or(CodecError::HeaderSize {
            expected: HEADER_SIZE,
            got: bytes.len(),
        })?;
        let header = BlockHeader::from_bytes(head)?;

        let mut pos = HEADER_SIZE;
        let count = read_compact_size(bytes, &mut pos)?;
        if count > MAX_ITEM_SIZE {
            return Err(CodecError::TooLarge(count));
        }
        let mut transactions = Vec::new();
        for _ in 0..count {
            let len = read_compact_size(bytes, &mut pos)?;
            if len > MAX_ITEM_SIZE {
                return Err(CodecError::TooLarge(len));
            }
            let end = pos + len as usize;
            let raw = bytes.get(pos..end).ok_or(CodecError::Truncated(pos))?;
            transactions.push(Transaction::new(raw.to_vec()));
            pos = end;
        }
        if pos != bytes.len() {
            return Err(CodecError::TrailingBytes(bytes.len() - pos));
        }
        Ok(Block { header, transactions })
    }
}
