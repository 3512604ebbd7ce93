use log::{debug, trace};

use crate::bus::Bus;
use crate::cache::Cache;
use crate::coherence::{self, Eviction, ProcOutcome};
use crate::commons::{
    Addr, BlockAddr, BlockState, BusRequest, CacheStat, ProcRequest, Protocol, NUM_CACHES,
};

/// The coherent cache subsystem: all per-core caches plus the bus.
///
/// Owning both ends here resolves the Cache/Bus reference cycle by
/// construction; snoopers get the bus through a split borrow for the
/// duration of one broadcast. Requests are processed strictly one at a
/// time, modeling fully serialized bus arbitration.
pub struct System {
    protocol: Protocol,
    caches: Vec<Cache>,
    bus: Bus,
}

impl System {
    pub fn new(protocol: Protocol) -> Self {
        System {
            protocol,
            caches: (0..NUM_CACHES).map(Cache::new).collect(),
            bus: Bus::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn total(&self, stat: CacheStat) -> u64 {
        self.caches.iter().map(|c| c.stat(stat)).sum()
    }

    /// Processes one trace reference to completion: the local lookup,
    /// any broadcasts, every peer reaction, and victim handling.
    pub fn handle_proc_request(&mut self, core: usize, request: ProcRequest, addr: Addr) {
        assert!(core < self.caches.len(), "core {core} out of range");
        let block = addr.block();
        let state = self.caches[core].state_of(block);
        trace!("core {core} {request:?} {addr:?} -> {state:?}");

        match request {
            ProcRequest::Read => self.caches[core].num_reads += 1,
            ProcRequest::Write => self.caches[core].num_writes += 1,
        }

        match coherence::proc(self.protocol, state, request) {
            ProcOutcome::Hit { upgrade, broadcast } => {
                let cache = &mut self.caches[core];
                cache.move_to_mru(block);
                if let Some(next) = upgrade {
                    cache.set_state(block, next);
                }
                if let Some(announce) = broadcast {
                    self.send(announce, block, core);
                }
            }
            ProcOutcome::Miss(miss) => {
                let (shared, supplied) = self.send(miss.request, block, core);
                let cache = &mut self.caches[core];
                match request {
                    ProcRequest::Read => cache.num_read_misses += 1,
                    ProcRequest::Write => cache.num_write_misses += 1,
                }
                if !supplied {
                    cache.num_from_llc += 1;
                }
                let victim = cache.insert(block, miss.fill);
                if miss.exclusive_when_alone && !shared {
                    cache.set_state(block, BlockState::Exclusive);
                }
                self.handle_victim(core, block, victim.tag, victim.state);
            }
        }
    }

    fn handle_victim(&mut self, core: usize, block: BlockAddr, tag: u64, state: BlockState) {
        if state == BlockState::Invalid {
            return;
        }
        let (set, _) = block.pos();
        let victim = BlockAddr::from_pos(set, tag);
        match coherence::eviction(self.protocol, state) {
            Eviction::Drop => {}
            Eviction::Writeback => {
                self.send(BusRequest::Flush, victim, core);
                self.caches[core].num_writebacks += 1;
            }
            Eviction::OfferForward => {
                // the first Shared peer to see the offer takes over
                // Forward ownership; memory only gets the block when
                // nobody does
                let (_, adopted) = self.send(BusRequest::SetF, victim, core);
                if !adopted {
                    self.send(BusRequest::Flush, victim, core);
                    self.caches[core].num_writebacks += 1;
                }
            }
        }
    }

    /// Broadcasts a bus transaction from `sender` and returns the
    /// sampled `(shared_line, supplied)` pair.
    ///
    /// Flush-class requests are counted and go no further. Everything
    /// else clears the response lines and snoops every other cache in
    /// id order; the returned pair is the OR of the peer responses and
    /// must be consumed before the sender issues another broadcast.
    fn send(&mut self, request: BusRequest, block: BlockAddr, sender: usize) -> (bool, bool) {
        self.bus.count(request);
        if request.is_flush() {
            return (self.bus.shared_line(), self.bus.supplied());
        }

        debug!("cache {sender} broadcasts {request:?} for {block:?}");
        self.bus.clear_lines();
        let System { caches, bus, protocol } = self;
        for cache in caches.iter_mut() {
            if cache.id == sender {
                continue;
            }
            let state = cache.state_of(block);
            let outcome = coherence::snoop(*protocol, state, request);
            coherence::apply_snoop(cache, bus, block, outcome);
        }
        (self.bus.shared_line(), self.bus.supplied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(system: &mut System, core: usize, addr: u64) {
        system.handle_proc_request(core, ProcRequest::Read, Addr(addr));
    }

    fn write(system: &mut System, core: usize, addr: u64) {
        system.handle_proc_request(core, ProcRequest::Write, Addr(addr));
    }

    #[test]
    fn cold_read_comes_from_memory() {
        let mut system = System::new(Protocol::MESI);
        read(&mut system, 0, 0x40);
        assert_eq!(system.caches()[0].num_reads, 1);
        assert_eq!(system.caches()[0].num_read_misses, 1);
        assert_eq!(system.caches()[0].num_from_llc, 1);
        assert_eq!(system.caches()[0].state_of(Addr(0x40).block()), BlockState::Exclusive);
        assert_eq!(system.bus().num_busrd, 1);
    }

    #[test]
    fn second_reader_is_supplied_by_the_first() {
        let mut system = System::new(Protocol::MESI);
        read(&mut system, 0, 0x40);
        read(&mut system, 1, 0x40);
        let block = Addr(0x40).block();
        assert_eq!(system.caches()[0].state_of(block), BlockState::Shared);
        assert_eq!(system.caches()[1].state_of(block), BlockState::Shared);
        assert_eq!(system.caches()[0].num_provided, 1);
        assert_eq!(system.caches()[1].num_from_llc, 0);
        assert_eq!(system.bus().num_flush_primes, 1);
    }

    #[test]
    fn upgrade_invalidates_the_peer() {
        let mut system = System::new(Protocol::MESI);
        read(&mut system, 0, 0x40);
        read(&mut system, 1, 0x40);
        write(&mut system, 1, 0x40);
        let block = Addr(0x40).block();
        assert_eq!(system.caches()[1].state_of(block), BlockState::Modified);
        assert_eq!(system.caches()[0].state_of(block), BlockState::Invalid);
        assert_eq!(system.caches()[0].num_invalidations, 1);
        assert_eq!(system.bus().num_busupgr, 1);
    }

    #[test]
    fn dirty_eviction_flushes_the_victim() {
        let mut system = System::new(Protocol::MESI);
        // five lines mapping to set 0 of cache 0; the first is dirtied
        write(&mut system, 0, 0x000);
        for i in 1..=4u64 {
            read(&mut system, 0, i << 8);
        }
        assert_eq!(system.caches()[0].num_writebacks, 1);
        assert_eq!(system.bus().num_flushes, 1);
        assert_eq!(system.caches()[0].state_of(Addr(0).block()), BlockState::Invalid);
    }
}
