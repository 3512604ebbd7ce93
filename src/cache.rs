use std::collections::VecDeque;

use crate::commons::{
    BlockAddr, BlockState, CacheStat, ASSOCIATIVITY, NUM_SETS,
};

pub struct CacheBlock {
    pub tag: u64,
    pub state: BlockState,
}

/// One associativity set, ordered front = LRU to back = MRU.
///
/// Invalid blocks are kept at the LRU end so that `insert` reuses
/// emptied slots before it evicts a valid block.
pub struct CacheSet {
    blocks: VecDeque<CacheBlock>,
}

impl CacheSet {
    pub fn new() -> Self {
        let mut blocks = VecDeque::with_capacity(ASSOCIATIVITY);
        for _ in 0..ASSOCIATIVITY {
            blocks.push_back(CacheBlock {
                tag: 0,
                state: BlockState::Invalid,
            });
        }
        CacheSet { blocks }
    }

    fn position_of(&self, tag: u64) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.state != BlockState::Invalid && b.tag == tag)
    }

    /// State of the valid block with the given tag, `Invalid` if absent.
    pub fn state_of(&self, tag: u64) -> BlockState {
        match self.position_of(tag) {
            Some(i) => self.blocks[i].state,
            None => BlockState::Invalid,
        }
    }

    /// Moves the valid block with the given tag to the MRU position.
    pub fn move_to_mru(&mut self, tag: u64) {
        if let Some(i) = self.position_of(tag) {
            let block = self.blocks.remove(i).unwrap();
            self.blocks.push_back(block);
        }
    }

    /// Replaces the current LRU block with `new_block` (inserted at MRU)
    /// and returns the replaced block for victim handling.
    pub fn insert(&mut self, new_block: CacheBlock) -> CacheBlock {
        debug_assert!(
            self.position_of(new_block.tag).is_none(),
            "inserting tag {:#x} that is already valid in this set",
            new_block.tag
        );
        let evicted = self.blocks.pop_front().unwrap();
        self.blocks.push_back(new_block);
        evicted
    }

    /// Updates the state of the valid block with the given tag.
    ///
    /// Invalidation clears the tag and demotes the block to the LRU
    /// position, making it the preferred eviction victim.
    pub fn set_state(&mut self, tag: u64, state: BlockState) {
        if let Some(i) = self.position_of(tag) {
            if state == BlockState::Invalid {
                let mut block = self.blocks.remove(i).unwrap();
                block.tag = 0;
                block.state = BlockState::Invalid;
                self.blocks.push_front(block);
            } else {
                self.blocks[i].state = state;
            }
        }
    }

    /// Blocks in LRU to MRU order.
    pub fn blocks(&self) -> impl Iterator<Item = &CacheBlock> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for CacheSet {
    fn default() -> Self {
        Self::new()
    }
}

/// One core's private cache: the sets plus the per-cache counters.
///
/// The coherence engine drives all mutations; the cache itself only
/// knows how to decompose block addresses and maintain its sets.
pub struct Cache {
    pub id: usize,
    sets: Vec<CacheSet>,

    pub num_reads: u64,
    pub num_read_misses: u64,
    pub num_writes: u64,
    pub num_write_misses: u64,
    pub num_writebacks: u64,
    pub num_invalidations: u64,
    pub num_provided: u64,
    pub num_from_llc: u64,
    pub num_random: u64,
}

impl Cache {
    pub fn new(id: usize) -> Self {
        Cache {
            id,
            sets: (0..NUM_SETS).map(|_| CacheSet::new()).collect(),

            num_reads: 0,
            num_read_misses: 0,
            num_writes: 0,
            num_write_misses: 0,
            num_writebacks: 0,
            num_invalidations: 0,
            num_provided: 0,
            num_from_llc: 0,
            num_random: 0,
        }
    }

    pub fn state_of(&self, block: BlockAddr) -> BlockState {
        let (set, tag) = block.pos();
        self.sets[set].state_of(tag)
    }

    pub fn set_state(&mut self, block: BlockAddr, state: BlockState) {
        let (set, tag) = block.pos();
        self.sets[set].set_state(tag, state);
    }

    pub fn move_to_mru(&mut self, block: BlockAddr) {
        let (set, tag) = block.pos();
        self.sets[set].move_to_mru(tag);
    }

    /// Inserts a block in the given state at the MRU position of its set
    /// and returns the evicted block.
    pub fn insert(&mut self, block: BlockAddr, state: BlockState) -> CacheBlock {
        let (set, tag) = block.pos();
        self.sets[set].insert(CacheBlock { tag, state })
    }

    pub fn stat(&self, stat: CacheStat) -> u64 {
        match stat {
            CacheStat::Reads => self.num_reads,
            CacheStat::ReadMisses => self.num_read_misses,
            CacheStat::Writes => self.num_writes,
            CacheStat::WriteMisses => self.num_write_misses,
            CacheStat::Writebacks => self.num_writebacks,
            CacheStat::Invalidations => self.num_invalidations,
            CacheStat::Provided => self.num_provided,
            CacheStat::FromLlc => self.num_from_llc,
            CacheStat::Random => self.num_random,
        }
    }

    pub fn sets(&self) -> &[CacheSet] {
        &self.sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::SET_BITS;

    fn tags(set: &CacheSet) -> Vec<(u64, BlockState)> {
        set.blocks().map(|b| (b.tag, b.state)).collect()
    }

    #[test]
    fn new_set_is_all_invalid() {
        let set = CacheSet::new();
        assert_eq!(set.len(), ASSOCIATIVITY);
        assert!(set.blocks().all(|b| b.state == BlockState::Invalid));
    }

    #[test]
    fn insert_evicts_lru_first() {
        let mut set = CacheSet::new();
        for tag in 1..=ASSOCIATIVITY as u64 {
            let evicted = set.insert(CacheBlock {
                tag,
                state: BlockState::Shared,
            });
            // placeholders go first
            assert_eq!(evicted.state, BlockState::Invalid);
        }
        // all slots valid now; the next insertion evicts tag 1 (the LRU)
        let evicted = set.insert(CacheBlock {
            tag: 99,
            state: BlockState::Shared,
        });
        assert_eq!(evicted.tag, 1);
        assert_eq!(evicted.state, BlockState::Shared);
        assert_eq!(set.len(), ASSOCIATIVITY);
    }

    #[test]
    fn move_to_mru_reorders() {
        let mut set = CacheSet::new();
        for tag in 1..=ASSOCIATIVITY as u64 {
            set.insert(CacheBlock {
                tag,
                state: BlockState::Shared,
            });
        }
        set.move_to_mru(1);
        // tag 2 is now the LRU victim
        let evicted = set.insert(CacheBlock {
            tag: 99,
            state: BlockState::Shared,
        });
        assert_eq!(evicted.tag, 2);
        assert_eq!(set.state_of(1), BlockState::Shared);
    }

    #[test]
    fn invalidation_moves_block_to_lru_and_clears_tag() {
        let mut set = CacheSet::new();
        for tag in 1..=ASSOCIATIVITY as u64 {
            set.insert(CacheBlock {
                tag,
                state: BlockState::Shared,
            });
        }
        set.set_state(3, BlockState::Invalid);
        assert_eq!(set.state_of(3), BlockState::Invalid);
        let front: Vec<_> = tags(&set);
        assert_eq!(front[0], (0, BlockState::Invalid));
        // the freed slot is reused before any valid block is evicted
        let evicted = set.insert(CacheBlock {
            tag: 99,
            state: BlockState::Shared,
        });
        assert_eq!(evicted.state, BlockState::Invalid);
        assert_eq!(set.len(), ASSOCIATIVITY);
    }

    #[test]
    fn set_state_in_place_keeps_position() {
        let mut set = CacheSet::new();
        for tag in 1..=ASSOCIATIVITY as u64 {
            set.insert(CacheBlock {
                tag,
                state: BlockState::Shared,
            });
        }
        set.set_state(1, BlockState::Modified);
        // tag 1 is still the LRU victim: upgrades do not touch recency
        let evicted = set.insert(CacheBlock {
            tag: 99,
            state: BlockState::Shared,
        });
        assert_eq!(evicted.tag, 1);
        assert_eq!(evicted.state, BlockState::Modified);
    }

    #[test]
    fn cache_decomposes_block_addresses() {
        let mut cache = Cache::new(0);
        // two lines one set apart land in different sets with the same tag
        cache.insert(BlockAddr(0), BlockState::Exclusive);
        cache.insert(BlockAddr(1), BlockState::Shared);
        assert_eq!(cache.state_of(BlockAddr(0)), BlockState::Exclusive);
        assert_eq!(cache.state_of(BlockAddr(1)), BlockState::Shared);
        // same set as block 0, different tag
        let other = BlockAddr(1 << SET_BITS);
        assert_eq!(cache.state_of(other), BlockState::Invalid);
    }
}
