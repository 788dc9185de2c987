//! Candidate chains under evaluation.
//!
//! Candidates live in a plain `Vec` and are addressed by index. Reattaching a
//! tree of disconnected headers is driven by an explicit stack so depth is
//! bounded by heap, not by the call stack.

use super::update::UpdateTransaction;
use super::OracleError;
use crate::core::header::Header;
use crate::core::types::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub blacklisted: bool,
    /// Ascending, from just above the fork point up to the tip
    pub chain: Vec<Position>,
}

impl Candidate {
    pub fn tip(&self) -> Option<&Position> {
        self.chain.last()
    }

    /// Longest prefix free of blacklisted headers.
    pub fn eligible(&self, update: &UpdateTransaction<'_>) -> Result<&[Position], OracleError> {
        if !self.blacklisted {
            return Ok(&self.chain);
        }
        let mut end = 0;
        for position in &self.chain {
            if update.header(&position.hash)?.is_blacklisted() {
                break;
            }
            end += 1;
        }
        Ok(&self.chain[..end])
    }
}

/// Derive a child's chain state from its parent.
///
/// Returns the child's new position and whether it is now blacklisted.
pub fn connect_to_parent(
    update: &mut UpdateTransaction<'_>,
    parent: &Header,
    child: &Hash256,
) -> Result<(Position, bool), OracleError> {
    let checkpoint = update.effective_checkpoint();
    let child = update.stage(child)?;
    child.inherit_work(parent.work());
    child.inherit_state(parent);
    child.inherit_height(parent);
    child.compare_to_checkpoint(&checkpoint);
    Ok((child.position(), child.is_blacklisted()))
}

/// Connect `child` to `parent` and collect the chain segment from the
/// effective best chain up to `child`.
pub fn initialize_candidate(
    update: &mut UpdateTransaction<'_>,
    parent: &Header,
    child: &Hash256,
) -> Result<Candidate, OracleError> {
    let (position, blacklisted) = connect_to_parent(update, parent, child)?;
    let mut chain = vec![position];
    let mut cursor = parent.clone();
    while !update.effective_is_in_best_chain(&cursor.position()) {
        if cursor.height() <= 0 || cursor.is_disconnected() {
            return Err(OracleError::NotConnected(format!(
                "walk from {} stopped at {}",
                position,
                cursor.position()
            )));
        }
        chain.push(cursor.position());
        cursor = update.header(&cursor.parent_hash())?;
    }
    chain.reverse();
    Ok(Candidate { blacklisted, chain })
}

/// Reattach every disconnected descendant of the tip of `candidates[start]`.
///
/// The first disconnected child of a header extends the candidate that
/// header belongs to; each further child starts a new candidate cloned
/// from the parent's chain.
pub fn connect_children(
    update: &mut UpdateTransaction<'_>,
    candidates: &mut Vec<Candidate>,
    start: usize,
) -> Result<(), OracleError> {
    let Some(tip) = candidates.get(start).and_then(Candidate::tip).copied() else {
        return Ok(());
    };
    let mut stack = vec![(tip.hash, start)];

    while let Some((parent_hash, index)) = stack.pop() {
        let children = update.effective_disconnected_children(&parent_hash);
        if children.is_empty() {
            continue;
        }
        let parent = update.header(&parent_hash)?;
        let snapshot = candidates[index].clone();

        for (n, child) in children.into_iter().enumerate() {
            let target = if n == 0 {
                index
            } else {
                candidates.push(snapshot.clone());
                candidates.len() - 1
            };
            update.connect_block(parent_hash, child);
            let (position, blacklisted) = connect_to_parent(update, &parent, &child)?;
            tracing::debug!("🔗 Reattached {} to {}", position, parent.position());

            let candidate = &mut candidates[target];
            candidate.chain.push(position);
            candidate.blacklisted = blacklisted;
            stack.push((child, target));
        }
    }
    Ok(())
}

/// Candidate ending at `tip`, reaching back to the first best-chain header
/// below `height`.
pub fn candidate_below(
    update: &UpdateTransaction<'_>,
    tip: &Hash256,
    height: Height,
) -> Result<Candidate, OracleError> {
    let mut chain = Vec::new();
    let mut cursor = update.header(tip)?;
    loop {
        if cursor.height() < height && update.effective_is_in_best_chain(&cursor.position()) {
            break;
        }
        if cursor.height() <= 0 || cursor.is_disconnected() {
            return Err(OracleError::NotConnected(format!(
                "chain ending at {} does not reach the best chain",
                short_hex(tip)
            )));
        }
        chain.push(cursor.position());
        cursor = update.header(&cursor.parent_hash())?;
    }
    chain.reverse();
    Ok(Candidate { blacklisted: false, chain })
}

/// Re-derive the chain state of every header in `candidate`, picking up the
/// effective checkpoint.
pub fn reconnect(update: &mut UpdateTransaction<'_>, candidate: &mut Candidate) -> Result<(), OracleError> {
    let Some(first) = candidate.chain.first() else {
        return Ok(());
    };
    let mut parent = update.header(&update.header(&first.hash)?.parent_hash())?;
    for n in 0..candidate.chain.len() {
        let hash = candidate.chain[n].hash;
        let (position, blacklisted) = connect_to_parent(update, &parent, &hash)?;
        candidate.chain[n] = position;
        candidate.blacklisted = blacklisted;
        parent = update.header(&hash)?;
    }
    Ok(())
}
