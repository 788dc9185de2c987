use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Db;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::core::header::Header;
use crate::core::params::{self, ChainId};
use crate::core::types::*;
use crate::events::{ChainEvent, EventBus};
use crate::oracle::update::{CheckpointChange, UpdateTransaction};

/// Key prefixes for the tables kept in the sled tree
const PREFIX_HEADER: &[u8] = b"hdr:";
const PREFIX_BEST: &[u8] = b"bst:";
const PREFIX_DISCONNECTED: &[u8] = b"dis:";
const PREFIX_SIBLING: &[u8] = b"sib:";
const META_TIP: &[u8] = b"meta:tip";
const META_CHECKPOINT: &[u8] = b"meta:checkpoint";
const META_CHAIN: &[u8] = b"meta:chain";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("transaction aborted: {0}")]
    Transaction(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database belongs to chain tag {found}, expected {expected}")]
    ChainMismatch { expected: ChainId, found: u8 },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistent header database.
///
/// Holds header metadata, the best-chain index, disconnected edges, the
/// sibling set and the checkpoint, all in one sled tree so that
/// `apply_update` can commit every table in a single transaction.
pub struct HeaderDb {
    db: Db,
    chain: ChainId,
    events: EventBus,
}

impl std::fmt::Debug for HeaderDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDb")
            .field("chain", &self.chain)
            .field("tip_height", &self.tip_height())
            .finish()
    }
}

impl HeaderDb {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P, chain: ChainId) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::init(db, chain)
    }

    /// In-memory database removed on drop
    pub fn temporary(chain: ChainId) -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::init(db, chain)
    }

    fn init(db: Db, chain: ChainId) -> Result<Self, StorageError> {
        match db.get(META_CHAIN)? {
            Some(tag) if tag.as_ref() != &[chain.tag()][..] => {
                return Err(StorageError::ChainMismatch {
                    expected: chain,
                    found: tag.first().copied().unwrap_or_default(),
                });
            }
            Some(_) => {}
            None => import_genesis(&db, chain)?,
        }

        let mut out = HeaderDb { db, chain, events: EventBus::new(Position::blank()) };
        let best = out.current_best()?.position();
        out.events = EventBus::new(best);
        tracing::info!("💾 Opened {} header database at {}", chain, best);
        Ok(out)
    }

    pub fn chain(&self) -> ChainId {
        self.chain
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn local_height(&self) -> watch::Receiver<Position> {
        self.events.local_height()
    }

    // ─── Headers ─────────────────────────────────────────────────────

    /// Load a header, treating any storage failure as a miss
    pub fn try_load_header(&self, hash: &Hash256) -> Option<Header> {
        match self.get_header(hash) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Failed to read header {}: {}", short_hex(hash), e);
                None
            }
        }
    }

    pub fn load_header(&self, hash: &Hash256) -> Result<Header, StorageError> {
        self.get_header(hash)?
            .ok_or_else(|| StorageError::NotFound(format!("header {}", hex::encode(hash))))
    }

    pub fn header_exists(&self, hash: &Hash256) -> bool {
        self.db.contains_key(prefixed_key(PREFIX_HEADER, hash)).unwrap_or(false)
    }

    fn get_header(&self, hash: &Hash256) -> Result<Option<Header>, StorageError> {
        match self.db.get(prefixed_key(PREFIX_HEADER, hash))? {
            Some(bytes) => Ok(Some(decode_header(&bytes)?)),
            None => Ok(None),
        }
    }

    // ─── Best Chain ──────────────────────────────────────────────────

    /// Hash of the best-chain block at `height`, if the chain is that long
    pub fn best_block(&self, height: Height) -> Option<Hash256> {
        if height < 0 {
            return None;
        }
        match self.db.get(best_key(height)) {
            Ok(Some(bytes)) => hash_from_slice(&bytes),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read best block at {}: {}", height, e);
                None
            }
        }
    }

    /// Height of the best-chain tip, or -1 if the database is unreadable
    pub fn tip_height(&self) -> Height {
        match self.db.get(META_TIP) {
            Ok(Some(bytes)) => height_from_slice(&bytes).unwrap_or(BLANK_HEIGHT),
            Ok(None) => BLANK_HEIGHT,
            Err(e) => {
                tracing::warn!("Failed to read tip height: {}", e);
                BLANK_HEIGHT
            }
        }
    }

    pub fn current_best(&self) -> Result<Header, StorageError> {
        let height = self.tip_height();
        let hash = self
            .best_block(height)
            .ok_or_else(|| StorageError::NotFound(format!("best block at height {}", height)))?;
        self.load_header(&hash)
    }

    // ─── Checkpoint ──────────────────────────────────────────────────

    /// Active checkpoint, blank if none
    pub fn current_checkpoint(&self) -> Position {
        match self.db.get(META_CHECKPOINT) {
            Ok(Some(bytes)) => bincode::deserialize(&bytes).unwrap_or_else(|e| {
                tracing::warn!("Corrupt checkpoint record: {}", e);
                Position::blank()
            }),
            Ok(None) => Position::blank(),
            Err(e) => {
                tracing::warn!("Failed to read checkpoint: {}", e);
                Position::blank()
            }
        }
    }

    // ─── Disconnected & Siblings ─────────────────────────────────────

    pub fn disconnected_hashes(&self) -> BTreeSet<(Hash256, Hash256)> {
        self.db
            .scan_prefix(PREFIX_DISCONNECTED)
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| edge_from_key(&key))
            .collect()
    }

    pub fn disconnected_children(&self, parent: &Hash256) -> Vec<Hash256> {
        self.db
            .scan_prefix(prefixed_key(PREFIX_DISCONNECTED, parent))
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| edge_from_key(&key))
            .map(|(_, child)| child)
            .collect()
    }

    pub fn has_disconnected_children(&self, parent: &Hash256) -> bool {
        self.db
            .scan_prefix(prefixed_key(PREFIX_DISCONNECTED, parent))
            .next()
            .is_some()
    }

    pub fn sibling_hashes(&self) -> BTreeSet<Hash256> {
        self.db
            .scan_prefix(PREFIX_SIBLING)
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| hash_from_slice(&key[PREFIX_SIBLING.len()..]))
            .collect()
    }

    pub fn is_sibling(&self, hash: &Hash256) -> bool {
        self.db.contains_key(prefixed_key(PREFIX_SIBLING, hash)).unwrap_or(false)
    }

    // ─── Update ──────────────────────────────────────────────────────

    /// Commit a staged update atomically.
    ///
    /// Either every staged write lands or none does. On success subscribers
    /// are notified and the local height is refreshed.
    pub fn apply_update(&self, update: &UpdateTransaction<'_>) -> Result<(), StorageError> {
        let mut records = Vec::with_capacity(update.staged_headers().len());
        for header in update.staged_headers() {
            let value = bincode::serialize(header).map_err(|e| StorageError::Serialize(e.to_string()))?;
            records.push((prefixed_key(PREFIX_HEADER, &header.hash()), value));
        }
        let checkpoint = match update.checkpoint_change() {
            CheckpointChange::Set(position) => Some(
                bincode::serialize(&position).map_err(|e| StorageError::Serialize(e.to_string()))?,
            ),
            _ => None,
        };
        let reorg_parent = update.reorg_parent();

        let result: Result<(Position, Position), TransactionError<String>> =
            self.db.transaction(|tx: &TransactionalTree| {
                let old_height = tx_tip_height(tx)?;
                let old_tip = Position::new(old_height, tx_best_block(tx, old_height)?);

                for (key, value) in &records {
                    tx.insert(key.as_slice(), value.as_slice())?;
                }

                let mut tip_height = old_height;
                if let Some(parent) = reorg_parent {
                    if tx_best_block(tx, parent.height)? != parent.hash {
                        return Err(ConflictableTransactionError::Abort(format!(
                            "reorg parent {} is not on the best chain",
                            parent
                        )));
                    }
                    for height in (parent.height + 1)..=old_height {
                        tx.remove(best_key(height))?;
                    }
                    tip_height = parent.height;
                }
                for (height, hash) in update.best_additions() {
                    if *height != tip_height + 1 {
                        return Err(ConflictableTransactionError::Abort(format!(
                            "best chain gap: appending {} onto tip {}",
                            height, tip_height
                        )));
                    }
                    tx.insert(best_key(*height), hash.as_slice())?;
                    tip_height = *height;
                }
                tx.insert(META_TIP, tip_height.to_be_bytes().to_vec())?;

                for (parent, child) in update.disconnected_removed() {
                    tx.remove(edge_key(parent, child))?;
                }
                for (parent, child) in update.disconnected_added() {
                    tx.insert(edge_key(parent, child), Vec::<u8>::new())?;
                }
                for hash in update.siblings_removed() {
                    tx.remove(prefixed_key(PREFIX_SIBLING, hash))?;
                }
                for hash in update.siblings_added() {
                    tx.insert(prefixed_key(PREFIX_SIBLING, hash), Vec::<u8>::new())?;
                }

                match (&checkpoint, update.checkpoint_change()) {
                    (Some(bytes), _) => {
                        tx.insert(META_CHECKPOINT, bytes.as_slice())?;
                    }
                    (None, CheckpointChange::Clear) => {
                        tx.remove(META_CHECKPOINT)?;
                    }
                    _ => {}
                }

                let new_tip = Position::new(tip_height, tx_best_block(tx, tip_height)?);
                Ok((old_tip, new_tip))
            });

        let (old_tip, new_tip) = match result {
            Ok(tips) => tips,
            Err(TransactionError::Abort(e)) => return Err(StorageError::Transaction(e)),
            Err(TransactionError::Storage(e)) => return Err(StorageError::Db(e)),
        };
        self.db.flush()?;

        match reorg_parent {
            Some(ancestor) if ancestor.height < old_tip.height => {
                tracing::info!("🔄 Reorg on {}: {} -> {} (fork at {})", self.chain, old_tip, new_tip, ancestor);
                self.events.publish(ChainEvent::Reorg { chain: self.chain, ancestor, tip: new_tip });
            }
            _ if new_tip != old_tip => {
                tracing::debug!("📦 New best header on {}: {}", self.chain, new_tip);
                self.events.publish(ChainEvent::NewHeader { chain: self.chain, tip: new_tip });
            }
            _ => {}
        }
        self.events.set_best(new_tip);
        Ok(())
    }
}

// ─── Genesis ─────────────────────────────────────────────────────────

fn import_genesis(db: &Db, chain: ChainId) -> Result<(), StorageError> {
    let genesis = Header::genesis(params::genesis_header(chain))
        .map_err(|e| StorageError::Corrupt(format!("genesis header: {}", e)))?;
    let value = bincode::serialize(&genesis).map_err(|e| StorageError::Serialize(e.to_string()))?;
    let hash = genesis.hash();

    let result: Result<(), TransactionError<String>> = db.transaction(|tx| {
        tx.insert(prefixed_key(PREFIX_HEADER, &hash), value.as_slice())?;
        tx.insert(best_key(0), hash.as_slice())?;
        tx.insert(META_TIP, 0i64.to_be_bytes().to_vec())?;
        tx.insert(META_CHAIN, vec![chain.tag()])?;
        Ok(())
    });
    match result {
        Ok(()) => {}
        Err(TransactionError::Abort(e)) => return Err(StorageError::Transaction(e)),
        Err(TransactionError::Storage(e)) => return Err(StorageError::Db(e)),
    }
    db.flush()?;
    tracing::info!("💾 Imported {} genesis {}", chain, short_hex(&hash));
    Ok(())
}

// ─── Transaction Helpers ─────────────────────────────────────────────

fn tx_tip_height(tx: &TransactionalTree) -> Result<Height, ConflictableTransactionError<String>> {
    let bytes = tx
        .get(META_TIP)?
        .ok_or_else(|| ConflictableTransactionError::Abort("missing tip height".to_string()))?;
    height_from_slice(&bytes)
        .ok_or_else(|| ConflictableTransactionError::Abort("corrupt tip height".to_string()))
}

fn tx_best_block(tx: &TransactionalTree, height: Height) -> Result<Hash256, ConflictableTransactionError<String>> {
    let bytes = tx
        .get(best_key(height))?
        .ok_or_else(|| ConflictableTransactionError::Abort(format!("no best block at height {}", height)))?;
    hash_from_slice(&bytes)
        .ok_or_else(|| ConflictableTransactionError::Abort(format!("corrupt best block at height {}", height)))
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn prefixed_key(prefix: &[u8], data: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + data.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(data);
    key
}

fn best_key(height: Height) -> Vec<u8> {
    // Heights are non-negative here; big-endian keeps the index ordered.
    prefixed_key(PREFIX_BEST, &(height as u64).to_be_bytes())
}

fn edge_key(parent: &Hash256, child: &Hash256) -> Vec<u8> {
    // dis:<parent(32)><child(32)>
    let mut key = Vec::with_capacity(PREFIX_DISCONNECTED.len() + 64);
    key.extend_from_slice(PREFIX_DISCONNECTED);
    key.extend_from_slice(parent);
    key.extend_from_slice(child);
    key
}

fn edge_from_key(key: &[u8]) -> Option<(Hash256, Hash256)> {
    let data = key.get(PREFIX_DISCONNECTED.len()..)?;
    if data.len() != 64 {
        return None;
    }
    Some((hash_from_slice(&data[..32])?, hash_from_slice(&data[32..])?))
}

fn hash_from_slice(bytes: &[u8]) -> Option<Hash256> {
    if bytes.len() != 32 {
        return None;
    }
    let mut hash = NULL_HASH;
    hash.copy_from_slice(bytes);
    Some(hash)
}

fn height_from_slice(bytes: &[u8]) -> Option<Height> {
    let buf: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(buf))
}

fn decode_header(bytes: &[u8]) -> Result<Header, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialize(e.to_string()))
}
