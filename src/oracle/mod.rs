//! HeaderForge Header Oracle
//!
//! Tracks competing header chains and keeps the best one (most cumulative
//! work, ties keep the incumbent) in the header database. Every public call
//! takes the oracle lock for its full duration and stages its changes in a
//! single `UpdateTransaction`, which is either committed whole or dropped.

pub mod candidate;
pub mod update;

use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::core::header::{Header, HeaderError};
use crate::core::params::{self, ChainId, MIN_CHECKPOINT_HEIGHT, RECENT_HASHES};
use crate::core::types::*;
use crate::events::ChainEvent;
use crate::storage::{HeaderDb, StorageError};
use candidate::{candidate_below, connect_children, initialize_candidate, reconnect, Candidate};
use update::UpdateTransaction;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("invalid position: {0}")]
    InvalidPosition(String),

    #[error("checkpoint already set at {0}")]
    CheckpointExists(Position),

    #[error("no checkpoint is set")]
    NoCheckpoint,

    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl OracleError {
    /// Logs loudly; the chain state is corrupt if this is ever built.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("❌ Header oracle invariant violated: {}", message);
        OracleError::InvariantViolation(message)
    }

    /// True for errors that indicate corrupted chain state
    pub fn is_fatal(&self) -> bool {
        matches!(self, OracleError::InvariantViolation(_))
    }
}

/// One record from a sync peer: claimed height plus serialized header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncBlock {
    pub height: Height,
    pub header: Vec<u8>,
}

pub struct HeaderOracle {
    db: HeaderDb,
    default_checkpoint: CheckpointData,
    lock: Mutex<()>,
}

impl std::fmt::Debug for HeaderOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderOracle")
            .field("db", &self.db)
            .field("default_checkpoint", &self.default_checkpoint.position())
            .finish()
    }
}

impl HeaderOracle {
    pub fn new(db: HeaderDb) -> Self {
        let default_checkpoint = params::default_checkpoint(db.chain());
        Self::with_default_checkpoint(db, default_checkpoint)
    }

    /// Oracle whose `init` upgrades to `checkpoint` instead of the chain default
    pub fn with_default_checkpoint(db: HeaderDb, checkpoint: CheckpointData) -> Self {
        HeaderOracle { db, default_checkpoint: checkpoint, lock: Mutex::new(()) }
    }

    /// One-time checkpoint upgrade.
    ///
    /// A stored checkpoint higher than the default is kept. Otherwise a stale
    /// one is removed and the default applied.
    pub fn init(&self) -> Result<(), OracleError> {
        let _guard = self.lock.lock();
        let default = self.default_checkpoint.position();
        let existing = self.db.current_checkpoint();

        if existing.height > default.height {
            tracing::info!("Keeping checkpoint {} above default {}", existing, default);
            return Ok(());
        }
        if existing == default {
            return Ok(());
        }

        let mut update = UpdateTransaction::new(&self.db);
        let mut changed = false;
        if !existing.is_blank() {
            tracing::info!("Removing stale checkpoint {}", existing);
            update.clear_checkpoint();
            apply_checkpoint(&mut update, existing)?;
            changed = true;
        }
        if default.height >= MIN_CHECKPOINT_HEIGHT {
            tracing::info!("📌 Applying default checkpoint {}", default);
            update.set_checkpoint(default);
            apply_checkpoint(&mut update, default)?;
            changed = true;
        }
        if changed {
            self.db.apply_update(&update)?;
        }
        Ok(())
    }

    // ─── Header Addition ─────────────────────────────────────────────

    pub fn add_header(&self, header: Header) -> Result<(), OracleError> {
        self.add_headers(vec![header])
    }

    /// Add headers in order. Either all of them are applied or none are.
    pub fn add_headers(&self, headers: Vec<Header>) -> Result<(), OracleError> {
        if headers.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock();
        let count = headers.len();
        let mut update = UpdateTransaction::new(&self.db);
        for header in headers {
            if let Err(e) = add_header(&mut update, header) {
                tracing::warn!("Rejected batch of {} headers: {}", count, e);
                return Err(e);
            }
        }
        self.db.apply_update(&update)?;
        Ok(())
    }

    /// Ingest ordered headers from a sync peer.
    ///
    /// Records must continue `prior` with contiguous heights and parent
    /// hashes. Any break, parse failure or commit failure applies nothing and
    /// returns 0; otherwise returns the number of records processed.
    pub fn process_sync_data(&self, prior: &Hash256, data: &[SyncBlock]) -> usize {
        if data.is_empty() {
            return 0;
        }
        let _guard = self.lock.lock();

        let mut expected_parent = *prior;
        let mut expected_height = self
            .db
            .try_load_header(prior)
            .filter(|header| !header.is_disconnected())
            .map(|header| header.height() + 1);
        let mut headers = Vec::with_capacity(data.len());
        for block in data {
            let header = match Header::from_bytes(&block.header) {
                Ok(header) => header,
                Err(e) => {
                    tracing::warn!("Sync record at height {} failed to parse: {}", block.height, e);
                    return 0;
                }
            };
            if header.parent_hash() != expected_parent {
                tracing::warn!(
                    "Sync data not contiguous at height {}: parent {} != {}",
                    block.height,
                    short_hex(&header.parent_hash()),
                    short_hex(&expected_parent)
                );
                return 0;
            }
            if let Some(height) = expected_height {
                if block.height != height {
                    tracing::warn!("Sync data height gap: expected {}, got {}", height, block.height);
                    return 0;
                }
            }
            let Some(next) = block.height.checked_add(1) else {
                tracing::warn!("Sync record claims out-of-range height {}", block.height);
                return 0;
            };
            expected_parent = header.hash();
            expected_height = Some(next);
            headers.push(header);
        }

        let mut update = UpdateTransaction::new(&self.db);
        for header in headers {
            if let Err(e) = add_header(&mut update, header) {
                tracing::warn!("Sync data rejected: {}", e);
                return 0;
            }
        }
        if let Err(e) = self.db.apply_update(&update) {
            tracing::error!("Failed to commit sync data: {}", e);
            return 0;
        }
        tracing::debug!("Processed {} sync headers after {}", data.len(), short_hex(prior));
        data.len()
    }

    // ─── Checkpoints ─────────────────────────────────────────────────

    pub fn add_checkpoint(&self, height: Height, hash: Hash256) -> Result<(), OracleError> {
        let _guard = self.lock.lock();
        if height < MIN_CHECKPOINT_HEIGHT {
            return Err(OracleError::InvalidCheckpoint(format!(
                "height {} is below minimum {}",
                height, MIN_CHECKPOINT_HEIGHT
            )));
        }
        let existing = self.db.current_checkpoint();
        if !existing.is_blank() {
            return Err(OracleError::CheckpointExists(existing));
        }

        let checkpoint = Position::new(height, hash);
        let mut update = UpdateTransaction::new(&self.db);
        update.set_checkpoint(checkpoint);
        apply_checkpoint(&mut update, checkpoint)?;
        self.db.apply_update(&update)?;
        tracing::info!("📌 Checkpoint set at {}", checkpoint);
        Ok(())
    }

    pub fn delete_checkpoint(&self) -> Result<(), OracleError> {
        let _guard = self.lock.lock();
        let existing = self.db.current_checkpoint();
        if existing.is_blank() {
            return Err(OracleError::NoCheckpoint);
        }

        let mut update = UpdateTransaction::new(&self.db);
        update.clear_checkpoint();
        apply_checkpoint(&mut update, existing)?;
        self.db.apply_update(&update)?;
        tracing::info!("Checkpoint at {} removed", existing);
        Ok(())
    }

    pub fn checkpoint(&self) -> Position {
        let _guard = self.lock.lock();
        self.db.current_checkpoint()
    }

    pub fn default_checkpoint(&self) -> CheckpointData {
        self.default_checkpoint
    }

    // ─── Queries ─────────────────────────────────────────────────────

    pub fn chain(&self) -> ChainId {
        self.db.chain()
    }

    pub fn genesis_hash(&self) -> Hash256 {
        params::genesis_hash(self.db.chain())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.db.subscribe()
    }

    pub fn local_height(&self) -> watch::Receiver<Position> {
        self.db.local_height()
    }

    /// Position of the best-chain tip
    pub fn best_chain(&self) -> Result<Position, OracleError> {
        let _guard = self.lock.lock();
        Ok(self.db.current_best()?.position())
    }

    /// Best-chain positions from the common ancestor of `tip` (inclusive)
    /// forward. A `limit` of 0 means unbounded.
    pub fn best_chain_from(&self, tip: &Position, limit: usize) -> Result<Vec<Position>, OracleError> {
        let _guard = self.lock.lock();
        let (ancestor, best) = self.common_parent_locked(tip)?;
        let mut out = Vec::new();
        for height in ancestor.height..=best.height {
            let Some(hash) = self.db.best_block(height) else {
                break;
            };
            out.push(Position::new(height, hash));
            if limit > 0 && out.len() == limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn best_hash(&self, height: Height) -> Option<Hash256> {
        let _guard = self.lock.lock();
        self.db.best_block(height)
    }

    pub fn best_position(&self, height: Height) -> Option<Position> {
        self.best_hash(height).map(|hash| Position::new(height, hash))
    }

    pub fn load_header(&self, hash: &Hash256) -> Result<Header, OracleError> {
        let _guard = self.lock.lock();
        Ok(self.db.load_header(hash)?)
    }

    pub fn header_exists(&self, hash: &Hash256) -> bool {
        let _guard = self.lock.lock();
        self.db.header_exists(hash)
    }

    /// Path from the common ancestor of `start` and `target` (inclusive) up
    /// to `target`, truncated to `limit` entries when non-zero.
    pub fn ancestors(&self, start: &Position, target: &Position, limit: usize) -> Result<Vec<Position>, OracleError> {
        let _guard = self.lock.lock();
        if start.height > target.height {
            return Err(OracleError::InvalidPosition(format!("start {} is above target {}", start, target)));
        }
        let truncate = |mut path: Vec<Position>| {
            if limit > 0 {
                path.truncate(limit);
            }
            path
        };

        if self.is_in_best_chain_locked(start) && self.is_in_best_chain_locked(target) {
            let mut path = Vec::new();
            for height in start.height..=target.height {
                let hash = self
                    .db
                    .best_block(height)
                    .ok_or_else(|| OracleError::invariant(format!("best chain has no block at {}", height)))?;
                path.push(Position::new(height, hash));
                if limit > 0 && path.len() == limit {
                    break;
                }
            }
            return Ok(path);
        }

        let mut other = self.connected_header(&start.hash)?;
        let mut cursor = self.connected_header(&target.hash)?;
        if other.height() > cursor.height() {
            return Err(OracleError::InvalidPosition(format!(
                "start {} is above target {}",
                other.position(),
                cursor.position()
            )));
        }
        let mut path = VecDeque::new();
        while cursor.height() > other.height() {
            path.push_front(cursor.position());
            cursor = self.db.load_header(&cursor.parent_hash())?;
        }
        while cursor.hash() != other.hash() {
            if cursor.height() <= 0 {
                return Err(OracleError::NotConnected(format!("{} and {} share no ancestor", start, target)));
            }
            path.push_front(cursor.position());
            cursor = self.db.load_header(&cursor.parent_hash())?;
            other = self.db.load_header(&other.parent_hash())?;
        }
        path.push_front(cursor.position());
        Ok(truncate(path.into()))
    }

    /// Youngest best-chain ancestor of `position`, and the current best tip.
    ///
    /// Unknown or disconnected positions report genesis as the ancestor.
    pub fn common_parent(&self, position: &Position) -> Result<(Position, Position), OracleError> {
        let _guard = self.lock.lock();
        self.common_parent_locked(position)
    }

    fn common_parent_locked(&self, position: &Position) -> Result<(Position, Position), OracleError> {
        let best = self.db.current_best()?.position();
        let genesis = Position::new(0, params::genesis_hash(self.db.chain()));
        let Some(mut cursor) = self.db.try_load_header(&position.hash) else {
            return Ok((genesis, best));
        };
        loop {
            if self.is_in_best_chain_locked(&cursor.position()) {
                return Ok((cursor.position(), best));
            }
            if cursor.height() <= 0 || cursor.is_disconnected() {
                return Ok((genesis, best));
            }
            match self.db.try_load_header(&cursor.parent_hash()) {
                Some(parent) => cursor = parent,
                None => return Ok((genesis, best)),
            }
        }
    }

    pub fn is_in_best_chain(&self, hash: &Hash256) -> bool {
        let _guard = self.lock.lock();
        match self.db.try_load_header(hash) {
            Some(header) => self.is_in_best_chain_locked(&header.position()),
            None => false,
        }
    }

    pub fn is_in_best_chain_position(&self, position: &Position) -> bool {
        let _guard = self.lock.lock();
        self.is_in_best_chain_locked(position)
    }

    fn is_in_best_chain_locked(&self, position: &Position) -> bool {
        self.db.best_block(position.height) == Some(position.hash)
    }

    /// Positions that a reorg to `tip` would connect, from `tip` down to just
    /// above the fork point. Empty if `tip` is already on the best chain.
    pub fn calculate_reorg(&self, tip: &Position) -> Result<Vec<Position>, OracleError> {
        let _guard = self.lock.lock();
        let mut out = Vec::new();
        if self.is_in_best_chain_locked(tip) {
            return Ok(out);
        }
        let mut cursor = self
            .db
            .try_load_header(&tip.hash)
            .ok_or_else(|| OracleError::NotConnected(format!("{} is not a known header", tip)))?;
        while !self.is_in_best_chain_locked(&cursor.position()) {
            if cursor.height() <= 0 || cursor.is_disconnected() {
                return Err(OracleError::NotConnected(format!("{} does not reach the best chain", tip)));
            }
            out.push(cursor.position());
            cursor = self.db.try_load_header(&cursor.parent_hash()).ok_or_else(|| {
                OracleError::NotConnected(format!("{} has a missing ancestor", tip))
            })?;
        }
        Ok(out)
    }

    pub fn siblings(&self) -> BTreeSet<Hash256> {
        let _guard = self.lock.lock();
        self.db.sibling_hashes()
    }

    /// The newest best-chain hashes, newest first
    pub fn recent_hashes(&self) -> Vec<Hash256> {
        let _guard = self.lock.lock();
        let tip = self.db.tip_height();
        (0..=tip)
            .rev()
            .take(RECENT_HASHES)
            .filter_map(|height| self.db.best_block(height))
            .collect()
    }

    /// Best-chain hashes from `start` forward, ending after `stop` if it is
    /// reached. A `limit` of 0 means unbounded.
    pub fn best_hashes(&self, start: Height, stop: &Hash256, limit: usize) -> Vec<Hash256> {
        let _guard = self.lock.lock();
        let mut out = Vec::new();
        let tip = self.db.tip_height();
        for height in start.max(0)..=tip {
            let Some(hash) = self.db.best_block(height) else {
                break;
            };
            out.push(hash);
            if hash == *stop || (limit > 0 && out.len() == limit) {
                break;
            }
        }
        out
    }

    fn connected_header(&self, hash: &Hash256) -> Result<Header, OracleError> {
        let header = self.db.load_header(hash)?;
        if header.is_disconnected() {
            return Err(OracleError::NotConnected(format!("{} is disconnected", short_hex(hash))));
        }
        Ok(header)
    }
}

// ─── Consensus Core ──────────────────────────────────────────────────

fn add_header(update: &mut UpdateTransaction<'_>, header: Header) -> Result<(), OracleError> {
    let hash = header.hash();
    if update.effective_header_exists(&hash) {
        tracing::trace!("Header {} already known", short_hex(&hash));
        return Ok(());
    }

    let parent_hash = header.parent_hash();
    let parent = match update.try_header(&parent_hash) {
        Some(parent) if !parent.is_disconnected() => parent,
        _ => {
            tracing::debug!("Header {} is disconnected from {}", short_hex(&hash), short_hex(&parent_hash));
            update.stage_header(header).set_disconnected_state();
            update.disconnect_block(parent_hash, hash);
            return Ok(());
        }
    };

    if update.effective_is_sibling(&parent_hash) {
        update.remove_sibling(parent_hash);
    }
    update.stage_header(header);

    let mut candidates = vec![initialize_candidate(update, &parent, &hash)?];
    connect_children(update, &mut candidates, 0)?;
    let reference = update.stage_best()?;
    choose_candidate(update, &reference, &candidates)
}

/// Make the winning candidate the best chain and record the losers.
///
/// Each candidate competes with its prefix below the first blacklisted
/// header. A candidate wins only with strictly more work than `reference`
/// and every earlier winner. With no winner and a `reference` that is not the
/// current tip, the best chain is rewound to `reference`.
fn choose_candidate(
    update: &mut UpdateTransaction<'_>,
    reference: &Header,
    candidates: &[Candidate],
) -> Result<(), OracleError> {
    let current = update.effective_tip()?;

    let mut best_work = reference.work().clone();
    let mut winner = None;
    for candidate in candidates {
        let eligible = candidate.eligible(update)?;
        let Some(tip) = eligible.last() else {
            continue;
        };
        let work = update.header(&tip.hash)?.work().clone();
        if work > best_work {
            best_work = work;
            winner = Some(eligible);
        }
    }

    let mut retired = Vec::with_capacity(candidates.len() + 1);
    match winner {
        Some(chain) => {
            let mut reorg = false;
            for position in chain {
                if !reorg && position.height <= current.height {
                    if update.effective_best_block(position.height) == Some(position.hash) {
                        continue;
                    }
                    let parent = update.header(&position.hash)?.parent_hash();
                    update.set_reorg_parent(Position::new(position.height - 1, parent));
                    retired.push(current);
                    reorg = true;
                }
                if update.effective_is_sibling(&position.hash) {
                    update.remove_sibling(position.hash);
                }
                update.add_to_best_chain(*position);
            }
        }
        None if reference.position() != current => {
            tracing::info!("No candidate beats {}, rewinding from {}", reference.position(), current);
            update.set_reorg_parent(reference.position());
            retired.push(current);
        }
        None => {}
    }

    retired.extend(candidates.iter().filter_map(Candidate::tip).copied());
    record_siblings(update, &retired)
}

/// Record off-chain tips as siblings, keeping only headers no other sibling
/// extends.
fn record_siblings(update: &mut UpdateTransaction<'_>, tips: &[Position]) -> Result<(), OracleError> {
    for tip in tips {
        if !update.effective_is_in_best_chain(tip) && !update.effective_is_sibling(&tip.hash) {
            update.add_sibling(tip.hash);
        }
    }
    let siblings = update.effective_sibling_hashes();
    for tip in tips {
        if !siblings.contains(&tip.hash) {
            continue;
        }
        for other in &siblings {
            if *other != tip.hash && descends_from(update, other, tip)? {
                tracing::debug!("Sibling {} is extended by {}", tip, short_hex(other));
                update.remove_sibling(tip.hash);
                break;
            }
        }
    }
    Ok(())
}

fn descends_from(update: &UpdateTransaction<'_>, hash: &Hash256, ancestor: &Position) -> Result<bool, OracleError> {
    let mut cursor = update.header(hash)?;
    while cursor.height() > ancestor.height {
        if cursor.is_disconnected() {
            return Ok(false);
        }
        cursor = update.header(&cursor.parent_hash())?;
    }
    Ok(cursor.hash() == ancestor.hash)
}

/// Re-evaluate the current chain and every sibling chain against a
/// checkpoint at `checkpoint.height`.
///
/// Chains are rooted at the best-chain header just below the checkpoint, or
/// at the tip when the best chain is shorter than that.
fn apply_checkpoint(update: &mut UpdateTransaction<'_>, checkpoint: Position) -> Result<(), OracleError> {
    let tip = update.effective_tip()?;
    let base = (checkpoint.height - 1).min(tip.height);
    let ancestor_hash = update.effective_best_block(base).ok_or_else(|| {
        OracleError::invariant(format!("best chain has no block at {} below checkpoint {}", base, checkpoint))
    })?;
    let ancestor = update.header(&ancestor_hash)?;

    // The current chain goes first so a tie keeps it.
    let mut candidates = vec![candidate_below(update, &tip.hash, base + 1)?];
    for sibling in update.effective_sibling_hashes() {
        match candidate_below(update, &sibling, base + 1) {
            Ok(candidate) => candidates.push(candidate),
            Err(OracleError::NotConnected(reason)) => {
                tracing::warn!("Skipping sibling {}: {}", short_hex(&sibling), reason);
            }
            Err(e) => return Err(e),
        }
    }
    for candidate in &mut candidates {
        reconnect(update, candidate)?;
    }
    choose_candidate(update, &ancestor, &candidates)
}
