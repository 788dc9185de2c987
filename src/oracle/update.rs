//! Read-your-own-writes staging for one oracle operation.
//!
//! An `UpdateTransaction` borrows the database for the duration of a single
//! call. Every read the oracle makes goes through the `effective_*` methods,
//! which consult staged changes before committed state. Nothing reaches the
//! database until `HeaderDb::apply_update` commits the whole set.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::OracleError;
use crate::core::header::Header;
use crate::core::types::*;
use crate::storage::HeaderDb;

/// Pending change to the checkpoint record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointChange {
    Unchanged,
    Set(Position),
    Clear,
}

pub struct UpdateTransaction<'a> {
    db: &'a HeaderDb,
    headers: HashMap<Hash256, Header>,
    best: BTreeMap<Height, Hash256>,
    reorg_parent: Option<Position>,
    siblings_added: BTreeSet<Hash256>,
    siblings_removed: BTreeSet<Hash256>,
    disconnected_added: BTreeSet<(Hash256, Hash256)>,
    disconnected_removed: BTreeSet<(Hash256, Hash256)>,
    checkpoint: CheckpointChange,
}

impl<'a> UpdateTransaction<'a> {
    pub fn new(db: &'a HeaderDb) -> Self {
        UpdateTransaction {
            db,
            headers: HashMap::new(),
            best: BTreeMap::new(),
            reorg_parent: None,
            siblings_added: BTreeSet::new(),
            siblings_removed: BTreeSet::new(),
            disconnected_added: BTreeSet::new(),
            disconnected_removed: BTreeSet::new(),
            checkpoint: CheckpointChange::Unchanged,
        }
    }

    // ─── Headers ─────────────────────────────────────────────────────

    /// Stage a header by value. An already-staged copy wins.
    pub fn stage_header(&mut self, header: Header) -> &mut Header {
        self.headers.entry(header.hash()).or_insert(header)
    }

    /// Stage a header by hash, pulling it from the database if needed.
    pub fn stage(&mut self, hash: &Hash256) -> Result<&mut Header, OracleError> {
        match self.headers.entry(*hash) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let header = self.db.load_header(hash)?;
                Ok(entry.insert(header))
            }
        }
    }

    /// Effective copy of a header without staging it
    pub fn header(&self, hash: &Hash256) -> Result<Header, OracleError> {
        self.try_header(hash)
            .ok_or_else(|| OracleError::NotFound(format!("header {}", hex::encode(hash))))
    }

    pub fn try_header(&self, hash: &Hash256) -> Option<Header> {
        match self.headers.get(hash) {
            Some(header) => Some(header.clone()),
            None => self.db.try_load_header(hash),
        }
    }

    /// Header at the effective best tip
    pub fn stage_best(&mut self) -> Result<Header, OracleError> {
        let tip = self.effective_tip()?;
        Ok(self.stage(&tip.hash)?.clone())
    }

    pub fn effective_header_exists(&self, hash: &Hash256) -> bool {
        self.headers.contains_key(hash) || self.db.header_exists(hash)
    }

    // ─── Best Chain ──────────────────────────────────────────────────

    pub fn effective_best_block(&self, height: Height) -> Option<Hash256> {
        if let Some(hash) = self.best.get(&height) {
            return Some(*hash);
        }
        match self.reorg_parent {
            Some(parent) if height > parent.height => None,
            _ => self.db.best_block(height),
        }
    }

    pub fn effective_tip(&self) -> Result<Position, OracleError> {
        let height = match (self.best.keys().next_back(), self.reorg_parent) {
            (Some(height), _) => *height,
            (None, Some(parent)) => parent.height,
            (None, None) => self.db.tip_height(),
        };
        self.effective_best_block(height)
            .map(|hash| Position::new(height, hash))
            .ok_or_else(|| {
                OracleError::invariant(format!("no effective best block at tip height {}", height))
            })
    }

    pub fn effective_is_in_best_chain(&self, position: &Position) -> bool {
        self.effective_best_block(position.height) == Some(position.hash)
    }

    pub fn add_to_best_chain(&mut self, position: Position) {
        self.best.insert(position.height, position.hash);
    }

    /// Rewind the effective best chain to `position`.
    ///
    /// Staged best entries above it are discarded. The committed chain is
    /// only marked for truncation when `position` is below the lowest
    /// committed height still in effect.
    pub fn set_reorg_parent(&mut self, position: Position) {
        let committed = match self.reorg_parent {
            Some(existing) => existing.height,
            None => self.db.tip_height(),
        };
        if position.height < committed {
            self.reorg_parent = Some(position);
        }
        self.best.split_off(&(position.height + 1));
    }

    // ─── Siblings ────────────────────────────────────────────────────

    pub fn add_sibling(&mut self, hash: Hash256) {
        self.siblings_removed.remove(&hash);
        self.siblings_added.insert(hash);
    }

    pub fn remove_sibling(&mut self, hash: Hash256) {
        self.siblings_added.remove(&hash);
        self.siblings_removed.insert(hash);
    }

    pub fn effective_is_sibling(&self, hash: &Hash256) -> bool {
        if self.siblings_added.contains(hash) {
            return true;
        }
        !self.siblings_removed.contains(hash) && self.db.is_sibling(hash)
    }

    pub fn effective_sibling_hashes(&self) -> BTreeSet<Hash256> {
        let mut out: BTreeSet<Hash256> = self
            .db
            .sibling_hashes()
            .into_iter()
            .filter(|hash| !self.siblings_removed.contains(hash))
            .collect();
        out.extend(self.siblings_added.iter().copied());
        out
    }

    // ─── Disconnected ────────────────────────────────────────────────

    pub fn disconnect_block(&mut self, parent: Hash256, child: Hash256) {
        self.disconnected_removed.remove(&(parent, child));
        self.disconnected_added.insert((parent, child));
    }

    pub fn connect_block(&mut self, parent: Hash256, child: Hash256) {
        self.disconnected_added.remove(&(parent, child));
        self.disconnected_removed.insert((parent, child));
    }

    /// Disconnected children of `parent`, in hash order
    pub fn effective_disconnected_children(&self, parent: &Hash256) -> Vec<Hash256> {
        let mut children: BTreeSet<Hash256> = self
            .db
            .disconnected_children(parent)
            .into_iter()
            .filter(|child| !self.disconnected_removed.contains(&(*parent, *child)))
            .collect();
        children.extend(
            self.disconnected_added
                .range((*parent, NULL_HASH)..)
                .take_while(|(p, _)| p == parent)
                .map(|(_, child)| *child),
        );
        children.into_iter().collect()
    }

    pub fn effective_has_disconnected_children(&self, parent: &Hash256) -> bool {
        !self.effective_disconnected_children(parent).is_empty()
    }

    pub fn effective_disconnected_hashes(&self) -> BTreeSet<(Hash256, Hash256)> {
        let mut out: BTreeSet<(Hash256, Hash256)> = self
            .db
            .disconnected_hashes()
            .into_iter()
            .filter(|edge| !self.disconnected_removed.contains(edge))
            .collect();
        out.extend(self.disconnected_added.iter().copied());
        out
    }

    // ─── Checkpoint ──────────────────────────────────────────────────

    pub fn set_checkpoint(&mut self, position: Position) {
        self.checkpoint = CheckpointChange::Set(position);
    }

    pub fn clear_checkpoint(&mut self) {
        self.checkpoint = CheckpointChange::Clear;
    }

    pub fn effective_checkpoint(&self) -> Position {
        match self.checkpoint {
            CheckpointChange::Set(position) => position,
            CheckpointChange::Clear => Position::blank(),
            CheckpointChange::Unchanged => self.db.current_checkpoint(),
        }
    }

    // ─── Commit View ─────────────────────────────────────────────────

    pub fn staged_headers(&self) -> impl ExactSizeIterator<Item = &Header> {
        self.headers.values()
    }

    pub fn best_additions(&self) -> impl Iterator<Item = (&Height, &Hash256)> {
        self.best.iter()
    }

    pub fn reorg_parent(&self) -> Option<Position> {
        self.reorg_parent
    }

    pub fn siblings_added(&self) -> impl Iterator<Item = &Hash256> {
        self.siblings_added.iter()
    }

    pub fn siblings_removed(&self) -> impl Iterator<Item = &Hash256> {
        self.siblings_removed.iter()
    }

    pub fn disconnected_added(&self) -> impl Iterator<Item = &(Hash256, Hash256)> {
        self.disconnected_added.iter()
    }

    pub fn disconnected_removed(&self) -> impl Iterator<Item = &(Hash256, Hash256)> {
        self.disconnected_removed.iter()
    }

    pub fn checkpoint_change(&self) -> CheckpointChange {
        self.checkpoint
    }
}
