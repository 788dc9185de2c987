#![allow(dead_code)]

use std::collections::BTreeSet;

use headerforge::core::block::BlockHeader;
use headerforge::core::types::*;
use headerforge::{ChainId, Header, HeaderDb, HeaderOracle};

/// Regtest-difficulty header: every one carries work 2
pub fn header(parent: &Hash256, nonce: u32) -> Header {
    Header::new(BlockHeader {
        version: 1,
        prev_hash: *parent,
        merkle_root: NULL_HASH,
        timestamp: 1_600_000_000 + nonce,
        bits: 0x207fffff,
        nonce,
    })
    .unwrap()
}

/// `count` headers extending `parent`, nonces from `seed`
pub fn chain(parent: &Hash256, count: usize, seed: u32) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::with_capacity(count);
    let mut prev = *parent;
    for n in 0..count {
        let next = header(&prev, seed + n as u32);
        prev = next.hash();
        out.push(next);
    }
    out
}

pub fn oracle() -> HeaderOracle {
    HeaderOracle::new(HeaderDb::temporary(ChainId::UnitTest).unwrap())
}

pub fn genesis(oracle: &HeaderOracle) -> Position {
    Position::new(0, oracle.genesis_hash())
}

/// Full best chain plus the sibling set
pub fn snapshot(oracle: &HeaderOracle) -> (Vec<Position>, BTreeSet<Hash256>) {
    let best = oracle.best_chain_from(&genesis(oracle), 0).unwrap();
    (best, oracle.siblings())
}

pub fn hashes(headers: &[&Header]) -> BTreeSet<Hash256> {
    headers.iter().map(|h| h.hash()).collect()
}
