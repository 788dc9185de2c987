//! HeaderForge - block header oracle.
//!
//! Tracks competing header chains, selects the best one by cumulative work,
//! enforces checkpoints and computes reorgs, persisting everything in an
//! embedded sled database.

pub mod core {
    pub mod block;
    pub mod header;
    pub mod params;
    pub mod types;
}

pub mod config;
pub mod crypto;
pub mod events;
pub mod oracle;
pub mod pow;
pub mod storage;

pub use crate::core::header::Header;
pub use crate::core::params::ChainId;
pub use crate::core::types::{Hash256, Height, Position, Work};
pub use crate::events::ChainEvent;
pub use crate::oracle::{HeaderOracle, OracleError, SyncBlock};
pub use crate::storage::{HeaderDb, StorageError};
