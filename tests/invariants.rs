//! Randomized traces checked against the structural and coherence
//! invariants after every single request. The RNG is seeded so a
//! failure reproduces exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use snoopsim::commons::{
    Addr, BlockAddr, BlockState, CacheStat, ProcRequest, Protocol, ASSOCIATIVITY, BLOCK_SIZE,
    NUM_CACHES, OFFSET_BITS,
};
use snoopsim::system::System;

const PROTOCOLS: [Protocol; 5] = [
    Protocol::MSI,
    Protocol::MESI,
    Protocol::MESIF,
    Protocol::MOESI,
    Protocol::FESI,
];

// 32 lines over 4 sets keeps evictions and sharing both frequent
const POOL_BLOCKS: u64 = 32;
const STEPS: usize = 2_000;

fn check_structure(system: &System) {
    for cache in system.caches() {
        for set in cache.sets() {
            assert_eq!(set.len(), ASSOCIATIVITY);
            let mut tags = Vec::new();
            let mut seen_valid = false;
            for block in set.blocks() {
                if block.state == BlockState::Invalid {
                    assert!(
                        !seen_valid,
                        "cache {}: Invalid block above a valid one",
                        cache.id
                    );
                } else {
                    seen_valid = true;
                    assert!(
                        !tags.contains(&block.tag),
                        "cache {}: duplicate valid tag {:#x}",
                        cache.id,
                        block.tag
                    );
                    tags.push(block.tag);
                }
            }
        }
    }
}

fn check_coherence(system: &System, protocol: Protocol) {
    for raw in 0..POOL_BLOCKS {
        let block = BlockAddr(raw);
        let states: Vec<BlockState> =
            system.caches().iter().map(|c| c.state_of(block)).collect();

        let modified = states.iter().filter(|s| **s == BlockState::Modified).count();
        assert!(modified <= 1, "{protocol:?}: two Modified copies of {block:?}");
        if modified == 1 {
            assert!(
                states
                    .iter()
                    .all(|s| *s == BlockState::Modified || *s == BlockState::Invalid),
                "{protocol:?}: Modified copy of {block:?} coexists with a valid peer"
            );
        }
        if protocol == Protocol::FESI {
            assert_eq!(modified, 0, "FESI must never hold Modified");
        }

        if matches!(protocol, Protocol::MESIF | Protocol::FESI) {
            let forwards = states.iter().filter(|s| **s == BlockState::Forward).count();
            assert!(forwards <= 1, "{protocol:?}: two Forward copies of {block:?}");
        }
        if protocol == Protocol::MOESI {
            let owned = states.iter().filter(|s| **s == BlockState::Owned).count();
            assert!(owned <= 1, "MOESI: two Owned copies of {block:?}");
        }
    }
}

#[test]
fn random_traces_preserve_invariants() {
    for (salt, protocol) in PROTOCOLS.into_iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(0xC0FFEE + salt as u64);
        let mut system = System::new(protocol);
        let mut reads = 0u64;
        let mut writes = 0u64;

        for step in 0..STEPS {
            let core = rng.gen_range(0..NUM_CACHES);
            let block = rng.gen_range(0..POOL_BLOCKS);
            let offset = rng.gen_range(0..BLOCK_SIZE as u64);
            let addr = Addr((block << OFFSET_BITS) | offset);
            let op = if rng.gen_bool(0.5) {
                reads += 1;
                ProcRequest::Read
            } else {
                writes += 1;
                ProcRequest::Write
            };

            let provided_before = system.total(CacheStat::Provided);
            system.handle_proc_request(core, op, addr);

            // at most one peer supplies per broadcast
            assert!(
                system.total(CacheStat::Provided) - provided_before <= 1,
                "{protocol:?} step {step}: more than one supplier"
            );
            check_structure(&system);
            check_coherence(&system, protocol);
        }

        assert_eq!(system.total(CacheStat::Reads), reads);
        assert_eq!(system.total(CacheStat::Writes), writes);
        assert!(system.total(CacheStat::ReadMisses) <= reads);
        assert!(system.total(CacheStat::WriteMisses) <= writes);
        assert_eq!(
            system.total(CacheStat::Writebacks),
            system.bus().num_flushes,
            "{protocol:?}: every Flush broadcast is someone's writeback"
        );
    }
}
