//! Block headers as tracked by the oracle.
//!
//! A `Header` pairs the immutable consensus fields (and their hash) with the
//! local chain state the oracle derives for it: height, cumulative work and
//! checkpoint/disconnection status. The derived state is only meaningful once
//! the header has been connected to a parent.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::block::{BlockHeader, CodecError};
use crate::core::types::*;
use crate::pow;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("malformed header: {0}")]
    Malformed(#[from] CodecError),

    #[error("invalid header: {0}")]
    Invalid(String),
}

/// Chain state of a header, tracked separately for the header itself
/// (local) and for what it inherits from its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Normal,
    /// The parent is not known yet
    Disconnected,
    /// This header is the active checkpoint
    Checkpoint,
    /// A checkpoint rules this header out of the canonical chain
    CheckpointBanned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    raw: BlockHeader,
    hash: Hash256,
    height: Height,
    work: Work,
    local_status: Status,
    inherited_status: Status,
}

impl Header {
    /// Parse a header from its 80-byte serialization.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        let raw = BlockHeader::from_bytes(bytes)?;
        Self::new(raw)
    }

    /// Wrap raw header fields. The result carries no chain state yet.
    pub fn new(raw: BlockHeader) -> Result<Self, HeaderError> {
        if pow::work_from_bits(raw.bits).is_none() {
            return Err(HeaderError::Invalid(format!("unusable compact target {:#010x}", raw.bits)));
        }
        Ok(Header {
            hash: raw.hash(),
            raw,
            height: BLANK_HEIGHT,
            work: Work::zero(),
            local_status: Status::Normal,
            inherited_status: Status::Normal,
        })
    }

    /// A genesis header: height 0, work is its own contribution.
    pub fn genesis(raw: BlockHeader) -> Result<Self, HeaderError> {
        let mut header = Self::new(raw)?;
        header.height = 0;
        header.work = header.own_work();
        Ok(header)
    }

    pub fn hash(&self) -> Hash256 {
        self.hash
    }

    pub fn parent_hash(&self) -> Hash256 {
        self.raw.prev_hash
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn work(&self) -> &Work {
        &self.work
    }

    pub fn position(&self) -> Position {
        Position::new(self.height, self.hash)
    }

    pub fn raw(&self) -> &BlockHeader {
        &self.raw
    }

    pub fn to_bytes(&self) -> [u8; crate::core::block::HEADER_SIZE] {
        self.raw.to_bytes()
    }

    pub fn local_status(&self) -> Status {
        self.local_status
    }

    pub fn inherited_status(&self) -> Status {
        self.inherited_status
    }

    /// Work contributed by this header alone.
    pub fn own_work(&self) -> Work {
        // Checked in `new`.
        pow::work_from_bits(self.raw.bits).unwrap_or_default()
    }

    pub fn is_disconnected(&self) -> bool {
        self.local_status == Status::Disconnected || self.inherited_status == Status::Disconnected
    }

    /// True when a checkpoint proves this header cannot be canonical.
    pub fn is_blacklisted(&self) -> bool {
        self.local_status == Status::CheckpointBanned
            || self.inherited_status == Status::CheckpointBanned
    }

    pub fn inherit_work(&mut self, parent_work: &Work) {
        self.work = parent_work + &self.own_work();
    }

    pub fn inherit_state(&mut self, parent: &Header) {
        self.inherited_status = if parent.is_blacklisted() {
            Status::CheckpointBanned
        } else if parent.is_disconnected() {
            Status::Disconnected
        } else {
            Status::Normal
        };
    }

    pub fn inherit_height(&mut self, parent: &Header) {
        self.height = parent.height + 1;
    }

    pub fn compare_to_checkpoint(&mut self, checkpoint: &Position) {
        self.local_status = if checkpoint.height != self.height {
            Status::Normal
        } else if checkpoint.hash == self.hash {
            Status::Checkpoint
        } else {
            Status::CheckpointBanned
        };
    }

    pub fn set_disconnected_state(&mut self) {
        self.local_status = Status::Disconnected;
        self.inherited_status = Status::Normal;
        self.height = BLANK_HEIGHT;
        self.work = Work::zero();
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header #{} [{}] parent={} work={} status={:?}/{:?}",
            self.height,
            short_hex(&self.hash),
            short_hex(&self.raw.prev_hash),
            self.work,
            self.local_status,
            self.inherited_status,
        )
    }
}
