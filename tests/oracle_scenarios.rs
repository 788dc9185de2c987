mod common;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use common::*;
use headerforge::core::types::*;
use headerforge::{ChainEvent, ChainId, Header, OracleError, SyncBlock};

#[test]
fn genesis_is_the_initial_best_chain() {
    let oracle = oracle();
    oracle.init().unwrap();
    assert_eq!(oracle.best_chain().unwrap(), genesis(&oracle));
    assert_eq!(oracle.recent_hashes(), vec![oracle.genesis_hash()]);
    assert!(oracle.siblings().is_empty());
    assert!(oracle.is_in_best_chain(&oracle.genesis_hash()));
}

#[test]
fn adding_a_header_twice_changes_nothing() {
    let once = oracle();
    let twice = oracle();
    let headers = chain(&once.genesis_hash(), 4, 1);
    let fork = header(&headers[1].hash(), 50);

    for h in headers.iter().chain(std::iter::once(&fork)) {
        once.add_header(h.clone()).unwrap();
        twice.add_header(h.clone()).unwrap();
        twice.add_header(h.clone()).unwrap();
    }
    twice.add_headers(vec![fork.clone(), fork.clone()]).unwrap();
    assert_eq!(snapshot(&once), snapshot(&twice));
}

#[test]
fn longer_competing_chain_reorgs_at_the_fork() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 5, 1);
    let b = chain(&a[1].hash(), 4, 100);
    let a_tip = Position::new(5, a[4].hash());

    oracle.add_headers(a.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), a_tip);

    let mut events = oracle.subscribe();
    for (n, h) in b.iter().enumerate() {
        oracle.add_header(h.clone()).unwrap();
        if n < 3 {
            // Equal or less work never displaces the incumbent.
            assert_eq!(oracle.best_chain().unwrap(), a_tip);
        }
    }

    let b_tip = Position::new(6, b[3].hash());
    let fork = Position::new(2, a[1].hash());
    assert_eq!(oracle.best_chain().unwrap(), b_tip);
    assert_eq!(oracle.common_parent(&a_tip).unwrap(), (fork, b_tip));
    assert_eq!(
        oracle.calculate_reorg(&a_tip).unwrap(),
        vec![a_tip, Position::new(4, a[3].hash()), Position::new(3, a[2].hash())]
    );
    assert!(oracle.siblings().contains(&a[4].hash()));
    assert!(!oracle.siblings().contains(&b[3].hash()));
    for h in &a[2..] {
        assert!(!oracle.is_in_best_chain(&h.hash()));
    }

    assert_eq!(
        events.try_recv().unwrap(),
        ChainEvent::Reorg { chain: ChainId::UnitTest, ancestor: fork, tip: b_tip }
    );
    assert_eq!(*oracle.local_height().borrow(), b_tip);
}

#[test]
fn reattachment_is_order_independent() {
    // main: 1..=6, fork: two headers above height 3, stub: one above height 1
    let reference = oracle();
    let main = chain(&reference.genesis_hash(), 6, 1);
    let fork = chain(&main[2].hash(), 2, 200);
    let stub = chain(&main[0].hash(), 1, 300);
    let all: Vec<Header> = main.iter().chain(&fork).chain(&stub).cloned().collect();

    for h in &all {
        reference.add_header(h.clone()).unwrap();
    }
    let expected = snapshot(&reference);
    assert_eq!(expected.0.last(), Some(&Position::new(6, main[5].hash())));
    assert_eq!(expected.1, hashes(&[&fork[1], &stub[0]]));

    for seed in 0..12u64 {
        let mut shuffled = all.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(seed));
        let oracle = oracle();
        for h in &shuffled {
            oracle.add_header(h.clone()).unwrap();
        }
        assert_eq!(snapshot(&oracle), expected, "seed {}", seed);
        for h in &all {
            assert!(!oracle.load_header(&h.hash()).unwrap().is_disconnected(), "seed {}", seed);
        }
    }
}

#[test]
fn deep_orphan_tree_connects_in_one_step() {
    let oracle = oracle();
    let root = header(&oracle.genesis_hash(), 1);
    // root -> {x1 -> {x2, y2 -> y3}, z1}
    let x1 = header(&root.hash(), 2);
    let x2 = header(&x1.hash(), 3);
    let y2 = header(&x1.hash(), 4);
    let y3 = header(&y2.hash(), 5);
    let z1 = header(&root.hash(), 6);

    oracle.add_headers(vec![y3.clone(), x2.clone(), y2.clone(), z1.clone(), x1.clone()]).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), genesis(&oracle));

    oracle.add_header(root.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(4, y3.hash()));
    assert_eq!(oracle.siblings(), hashes(&[&x2, &z1]));
    assert_eq!(oracle.load_header(&y3.hash()).unwrap().height(), 4);
}

#[test]
fn checkpoint_bans_competitors_until_deleted() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 3, 1);
    let b = chain(&a[1].hash(), 3, 100);
    oracle.add_headers(a.clone()).unwrap();
    oracle.add_checkpoint(3, a[2].hash()).unwrap();

    // b[0] sits at height 3 with the wrong hash; its chain outworks a.
    oracle.add_headers(b.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(3, a[2].hash()));
    assert!(oracle.load_header(&b[0].hash()).unwrap().is_blacklisted());
    assert!(oracle.load_header(&b[2].hash()).unwrap().is_blacklisted());
    assert!(oracle.siblings().contains(&b[2].hash()));

    oracle.delete_checkpoint().unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(5, b[2].hash()));
    assert!(!oracle.load_header(&b[2].hash()).unwrap().is_blacklisted());
    assert_eq!(oracle.siblings(), hashes(&[&a[2]]));
}

/// Seven headers: a1 a2 a3 a4 on one branch, b3 b4 b5 forking above a2.
#[test]
fn checkpoint_forces_reorg_to_pinned_branch() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 4, 1);
    let b = chain(&a[1].hash(), 3, 100);
    let fixture: Vec<Header> = a.iter().chain(&b).cloned().collect();
    assert_eq!(fixture.len(), 7);

    for h in &fixture {
        oracle.add_header(h.clone()).unwrap();
    }
    let (best, siblings) = snapshot(&oracle);
    let expected_best: Vec<Position> = vec![
        genesis(&oracle),
        Position::new(1, a[0].hash()),
        Position::new(2, a[1].hash()),
        Position::new(3, b[0].hash()),
        Position::new(4, b[1].hash()),
        Position::new(5, b[2].hash()),
    ];
    assert_eq!(best, expected_best);
    assert_eq!(siblings, hashes(&[&a[3]]));

    let mut events = oracle.subscribe();
    oracle.add_checkpoint(3, a[2].hash()).unwrap();
    let (best, siblings) = snapshot(&oracle);
    assert_eq!(
        best,
        vec![
            genesis(&oracle),
            Position::new(1, a[0].hash()),
            Position::new(2, a[1].hash()),
            Position::new(3, a[2].hash()),
            Position::new(4, a[3].hash()),
        ]
    );
    assert_eq!(siblings, hashes(&[&b[2]]));
    assert_eq!(oracle.checkpoint(), Position::new(3, a[2].hash()));
    assert_eq!(
        events.try_recv().unwrap(),
        ChainEvent::Reorg {
            chain: ChainId::UnitTest,
            ancestor: Position::new(2, a[1].hash()),
            tip: Position::new(4, a[3].hash()),
        }
    );

    // Extending the banned branch does not help it.
    let b6 = header(&b[2].hash(), 150);
    oracle.add_header(b6.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(4, a[3].hash()));
    assert_eq!(oracle.siblings(), hashes(&[&b6]));

    oracle.delete_checkpoint().unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(6, b6.hash()));
    assert_eq!(oracle.siblings(), hashes(&[&a[3]]));
}

#[test]
fn checkpoint_on_current_chain_changes_nothing() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 4, 1);
    let b = chain(&a[0].hash(), 2, 100);
    oracle.add_headers(a.clone()).unwrap();
    oracle.add_headers(b.clone()).unwrap();
    let before = snapshot(&oracle);

    oracle.add_checkpoint(2, a[1].hash()).unwrap();
    assert_eq!(snapshot(&oracle), before);
    assert!(oracle.load_header(&b[0].hash()).unwrap().is_blacklisted());
}

#[test]
fn checkpoint_without_alternative_rewinds_to_ancestor() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 4, 1);
    oracle.add_headers(a.clone()).unwrap();

    oracle.add_checkpoint(3, [0xee; 32]).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(2, a[1].hash()));
    assert_eq!(oracle.siblings(), hashes(&[&a[3]]));

    oracle.delete_checkpoint().unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(4, a[3].hash()));
    assert!(oracle.siblings().is_empty());
}

#[test]
fn checkpoint_rules_are_enforced() {
    let oracle = oracle();
    for height in [-1, 0, 1] {
        assert!(matches!(
            oracle.add_checkpoint(height, [1u8; 32]),
            Err(OracleError::InvalidCheckpoint(_))
        ));
    }
    assert!(matches!(oracle.delete_checkpoint(), Err(OracleError::NoCheckpoint)));
    oracle.add_checkpoint(2, [1u8; 32]).unwrap();
    assert!(matches!(
        oracle.add_checkpoint(3, [2u8; 32]),
        Err(OracleError::CheckpointExists(p)) if p == Position::new(2, [1u8; 32])
    ));
}

#[test]
fn sync_data_must_be_contiguous() {
    let oracle = oracle();
    let headers = chain(&oracle.genesis_hash(), 4, 1);
    let record = |n: usize| SyncBlock { height: n as Height + 1, header: headers[n].to_bytes().to_vec() };

    let gap = vec![record(0), record(2)];
    assert_eq!(oracle.process_sync_data(&oracle.genesis_hash(), &gap), 0);

    let wrong_height = vec![record(0), SyncBlock { height: 5, header: headers[1].to_bytes().to_vec() }];
    assert_eq!(oracle.process_sync_data(&oracle.genesis_hash(), &wrong_height), 0);

    let wrong_prior = vec![record(1), record(2)];
    assert_eq!(oracle.process_sync_data(&oracle.genesis_hash(), &wrong_prior), 0);

    let garbage = vec![record(0), SyncBlock { height: 2, header: vec![0u8; 79] }];
    assert_eq!(oracle.process_sync_data(&oracle.genesis_hash(), &garbage), 0);

    assert_eq!(oracle.best_chain().unwrap(), genesis(&oracle));
    assert!(!oracle.header_exists(&headers[0].hash()));

    let good: Vec<SyncBlock> = (0..4).map(record).collect();
    assert_eq!(oracle.process_sync_data(&oracle.genesis_hash(), &good[..2]), 2);
    assert_eq!(oracle.process_sync_data(&headers[1].hash(), &good[2..]), 2);
    assert_eq!(oracle.best_chain().unwrap(), Position::new(4, headers[3].hash()));
    assert_eq!(oracle.process_sync_data(&headers[3].hash(), &[]), 0);
}

#[test]
fn batched_and_incremental_addition_agree() {
    let batched = oracle();
    let incremental = oracle();
    let a = chain(&batched.genesis_hash(), 4, 1);
    let b = chain(&a[1].hash(), 3, 100);
    let c = chain(&a[0].hash(), 2, 200);
    let mut all: Vec<Header> = a.iter().chain(&b).chain(&c).cloned().collect();
    all.shuffle(&mut StdRng::seed_from_u64(7));

    batched.add_headers(all.clone()).unwrap();
    for h in &all {
        incremental.add_header(h.clone()).unwrap();
    }
    assert_eq!(snapshot(&batched), snapshot(&incremental));
    assert_eq!(batched.best_chain().unwrap(), Position::new(5, b[2].hash()));
}

#[test]
fn best_tip_outworks_every_eligible_sibling() {
    let oracle = oracle();
    let mut rng = StdRng::seed_from_u64(42);
    let mut known = vec![oracle.genesis_hash()];
    let mut nonce = 1u32;
    for _ in 0..60 {
        let parent = *known.choose(&mut rng).unwrap();
        let next = header(&parent, nonce);
        nonce += 1;
        known.push(next.hash());
        oracle.add_header(next).unwrap();
    }

    for hash in &known[1..] {
        let h = oracle.load_header(hash).unwrap();
        let parent = oracle.load_header(&h.parent_hash()).unwrap();
        assert!(h.work() > parent.work());
        assert_eq!(h.height(), parent.height() + 1);
    }

    let tip = oracle.load_header(&oracle.best_chain().unwrap().hash).unwrap();
    for sibling in oracle.siblings() {
        let sibling = oracle.load_header(&sibling).unwrap();
        assert!(tip.work() >= sibling.work());
        assert!(!oracle.is_in_best_chain(&sibling.hash()));
    }
}

#[test]
fn rejected_checkpoint_change_leaves_state_untouched() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 3, 1);
    oracle.add_headers(a[..1].to_vec()).unwrap();
    let before = snapshot(&oracle);

    // Deleting a checkpoint that does not exist fails without side effects.
    assert!(oracle.delete_checkpoint().is_err());
    assert_eq!(snapshot(&oracle), before);
    assert!(!oracle.header_exists(&a[1].hash()));
}

#[test]
fn ancestors_walk_both_branches() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 5, 1);
    let b = chain(&a[1].hash(), 2, 100);
    oracle.add_headers(a.clone()).unwrap();
    oracle.add_headers(b.clone()).unwrap();

    let start = Position::new(3, a[2].hash());
    let target = Position::new(4, b[1].hash());
    assert_eq!(
        oracle.ancestors(&start, &target, 0).unwrap(),
        vec![Position::new(2, a[1].hash()), Position::new(3, b[0].hash()), target]
    );
    assert_eq!(oracle.ancestors(&start, &target, 1).unwrap(), vec![Position::new(2, a[1].hash())]);

    let chain = oracle.best_chain_from(&target, 0).unwrap();
    assert_eq!(chain.first(), Some(&Position::new(2, a[1].hash())));
    assert_eq!(chain.len(), 4);
}

#[test]
fn banned_orphans_do_not_sink_their_parent() {
    let reference = oracle();
    reference.add_checkpoint(2, [0xab; 32]).unwrap();
    let b1 = header(&reference.genesis_hash(), 1);
    let b2 = header(&b1.hash(), 2);
    let c2 = header(&b1.hash(), 3);
    let all = [b1.clone(), b2.clone(), c2.clone()];

    for h in &all {
        reference.add_header(h.clone()).unwrap();
    }
    let expected = snapshot(&reference);
    assert_eq!(expected.0.last(), Some(&Position::new(1, b1.hash())));
    assert_eq!(expected.1, hashes(&[&b2, &c2]));

    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
    for order in orders {
        let oracle = oracle();
        oracle.add_checkpoint(2, [0xab; 32]).unwrap();
        for n in order {
            oracle.add_header(all[n].clone()).unwrap();
        }
        assert_eq!(snapshot(&oracle), expected, "order {:?}", order);
    }
}

#[test]
fn replaced_tip_is_not_a_sibling_once_extended() {
    let oracle = oracle();
    let a = chain(&oracle.genesis_hash(), 3, 1);
    let b = chain(&a[0].hash(), 3, 100);
    oracle.add_headers(a.clone()).unwrap();
    oracle.add_checkpoint(4, b[2].hash()).unwrap();

    // a4 conflicts with the checkpoint and waits as a sibling above a3.
    let a4 = header(&a[2].hash(), 4);
    oracle.add_header(a4.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(3, a[2].hash()));
    assert_eq!(oracle.siblings(), hashes(&[&a4]));

    oracle.add_headers(b.clone()).unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(4, b[2].hash()));
    assert_eq!(oracle.siblings(), hashes(&[&a4]));

    oracle.delete_checkpoint().unwrap();
    assert_eq!(oracle.siblings().len(), 1);
    assert_eq!(oracle.best_chain().unwrap().height, 4);
}

#[test]
fn sync_height_claim_must_leave_room_for_a_successor() {
    let oracle = oracle();
    let orphan = header(&[7u8; 32], 1);
    let data = vec![SyncBlock { height: Height::MAX, header: orphan.to_bytes().to_vec() }];
    assert_eq!(oracle.process_sync_data(&[7u8; 32], &data), 0);
    assert!(!oracle.header_exists(&orphan.hash()));
}

#[test]
fn readers_share_the_oracle_lock_with_writers() {
    let oracle = std::sync::Arc::new(oracle());
    let headers = chain(&oracle.genesis_hash(), 40, 1);

    let writer = {
        let oracle = oracle.clone();
        let headers = headers.clone();
        std::thread::spawn(move || {
            for h in headers {
                oracle.add_header(h).unwrap();
            }
        })
    };
    for h in headers.iter().cycle().take(400) {
        if oracle.header_exists(&h.hash()) {
            let stored = oracle.load_header(&h.hash()).unwrap();
            assert!(!stored.is_disconnected());
            assert!(oracle.is_in_best_chain(&h.hash()));
        }
    }
    writer.join().unwrap();
    assert_eq!(oracle.best_chain().unwrap(), Position::new(40, headers[39].hash()));
}
