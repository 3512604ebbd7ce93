//! The protocol state machines.
//!
//! Behavior is expressed as two dispatch tables: `snoop` maps
//! (protocol, local state, snooped request) to a `SnoopOutcome`, and
//! `proc` maps (protocol, local state, processor op) to a
//! `ProcOutcome`. Outcomes name a small set of primitive effects; the
//! engine in `system` is their only interpreter. Keeping the tables as
//! pure functions makes every transition auditable against the protocol
//! diagrams in one screenful per protocol.

use crate::bus::Bus;
use crate::cache::Cache;
use crate::commons::BlockState::{Exclusive, Forward, Invalid, Modified, Owned, Shared};
use crate::commons::{BlockAddr, BlockState, BusRequest, ProcRequest, Protocol};

/// What a snooping cache puts on the data lines.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SupplyKind {
    /// Flush′: the block moves cache-to-cache, memory is not touched.
    Clean,
    /// Flush: the dirty copy is written back to the LLC while supplying.
    Dirty,
}

/// The snooper's reply, beyond any state transition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reply {
    None,
    /// Write back without claiming the supply (BusUpgr on a dirty copy:
    /// the requester already has the data).
    Writeback,
    /// This cache is the designated supplier.
    Supply(SupplyKind),
    /// Arbitrary-sharer tie-break: supply only if no peer has claimed
    /// the broadcast yet. Counts toward `random`.
    SupplyIfFirst(SupplyKind),
    /// setF handoff: the first Shared peer adopts Forward ownership.
    /// Counts toward `random`.
    AdoptForwardIfFirst,
}

#[derive(Clone, Copy, Debug)]
pub struct SnoopOutcome {
    pub next: Option<BlockState>,
    pub reply: Reply,
    pub assert_shared: bool,
    pub invalidate: bool,
}

impl SnoopOutcome {
    const IGNORE: SnoopOutcome = SnoopOutcome {
        next: None,
        reply: Reply::None,
        assert_shared: false,
        invalidate: false,
    };
}

/// How a processor request resolves against the local state.
#[derive(Clone, Copy, Debug)]
pub enum ProcOutcome {
    /// Valid local copy: move to MRU, maybe upgrade, maybe announce.
    Hit {
        upgrade: Option<BlockState>,
        broadcast: Option<BusRequest>,
    },
    Miss(MissOutcome),
}

#[derive(Clone, Copy, Debug)]
pub struct MissOutcome {
    /// BusRd for read misses, BusRdX for write misses.
    pub request: BusRequest,
    /// Tentative state for the inserted block.
    pub fill: BlockState,
    /// Overwrite the fill with Exclusive when the shared line stays low.
    pub exclusive_when_alone: bool,
}

/// Victim handling after an insertion evicted a valid block.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Eviction {
    /// Clean copy: drop silently.
    Drop,
    /// Only dirty copy in the system: Flush it to the LLC.
    Writeback,
    /// FESI Forward victim: offer ownership via setF, write back only
    /// if no Shared peer adopts it.
    OfferForward,
}

const HIT: ProcOutcome = ProcOutcome::Hit {
    upgrade: None,
    broadcast: None,
};

const fn upgrade_silent(next: BlockState) -> ProcOutcome {
    ProcOutcome::Hit {
        upgrade: Some(next),
        broadcast: None,
    }
}

const fn upgrade_announced(next: BlockState) -> ProcOutcome {
    ProcOutcome::Hit {
        upgrade: Some(next),
        broadcast: Some(BusRequest::BusUpgr),
    }
}

const fn read_miss(fill: BlockState, exclusive_when_alone: bool) -> ProcOutcome {
    ProcOutcome::Miss(MissOutcome {
        request: BusRequest::BusRd,
        fill,
        exclusive_when_alone,
    })
}

const fn write_miss(fill: BlockState) -> ProcOutcome {
    ProcOutcome::Miss(MissOutcome {
        request: BusRequest::BusRdX,
        fill,
        exclusive_when_alone: false,
    })
}

/// Processor-side dispatch.
///
/// Panics on a state the protocol does not admit: that is a table bug,
/// not a recoverable condition.
pub fn proc(protocol: Protocol, state: BlockState, request: ProcRequest) -> ProcOutcome {
    match request {
        ProcRequest::Read => proc_read(protocol, state),
        ProcRequest::Write => proc_write(protocol, state),
    }
}

fn proc_read(protocol: Protocol, state: BlockState) -> ProcOutcome {
    match protocol {
        Protocol::MSI => match state {
            Modified | Shared => HIT,
            Invalid => read_miss(Shared, false),
            _ => unreachable!("state {state:?} unreachable under MSI"),
        },
        Protocol::MESI => match state {
            Modified | Exclusive | Shared => HIT,
            Invalid => read_miss(Shared, true),
            _ => unreachable!("state {state:?} unreachable under MESI"),
        },
        Protocol::MESIF => match state {
            Modified | Exclusive | Shared | Forward => HIT,
            Invalid => read_miss(Forward, true),
            _ => unreachable!("state {state:?} unreachable under MESIF"),
        },
        Protocol::MOESI => match state {
            Modified | Owned | Exclusive | Shared => HIT,
            Invalid => read_miss(Shared, true),
            _ => unreachable!("state {state:?} unreachable under MOESI"),
        },
        Protocol::FESI => match state {
            Forward | Exclusive | Shared => HIT,
            Invalid => read_miss(Forward, true),
            _ => unreachable!("state {state:?} unreachable under FESI"),
        },
    }
}

fn proc_write(protocol: Protocol, state: BlockState) -> ProcOutcome {
    match protocol {
        Protocol::MSI => match state {
            Modified => HIT,
            Shared => upgrade_announced(Modified),
            Invalid => write_miss(Modified),
            _ => unreachable!("state {state:?} unreachable under MSI"),
        },
        Protocol::MESI => match state {
            Modified => HIT,
            Exclusive => upgrade_silent(Modified),
            Shared => upgrade_announced(Modified),
            Invalid => write_miss(Modified),
            _ => unreachable!("state {state:?} unreachable under MESI"),
        },
        Protocol::MESIF => match state {
            Modified => HIT,
            Exclusive => upgrade_silent(Modified),
            Shared | Forward => upgrade_announced(Modified),
            Invalid => write_miss(Modified),
            _ => unreachable!("state {state:?} unreachable under MESIF"),
        },
        Protocol::MOESI => match state {
            Modified => HIT,
            Exclusive => upgrade_silent(Modified),
            Shared | Owned => upgrade_announced(Modified),
            Invalid => write_miss(Modified),
            _ => unreachable!("state {state:?} unreachable under MOESI"),
        },
        // FESI has no Modified: the Forward holder owns the dirty data.
        Protocol::FESI => match state {
            Forward => ProcOutcome::Hit {
                upgrade: None,
                broadcast: Some(BusRequest::BusUpgr),
            },
            Exclusive => upgrade_silent(Forward),
            Shared => upgrade_announced(Forward),
            Invalid => write_miss(Forward),
            _ => unreachable!("state {state:?} unreachable under FESI"),
        },
    }
}

/// Which evicted states carry the only dirty copy and must reach memory.
pub fn eviction(protocol: Protocol, victim_state: BlockState) -> Eviction {
    match protocol {
        Protocol::MSI => match victim_state {
            Modified => Eviction::Writeback,
            Shared | Invalid => Eviction::Drop,
            _ => unreachable!("victim state {victim_state:?} unreachable under MSI"),
        },
        Protocol::MESI => match victim_state {
            Modified => Eviction::Writeback,
            Exclusive | Shared | Invalid => Eviction::Drop,
            _ => unreachable!("victim state {victim_state:?} unreachable under MESI"),
        },
        // a Forward victim is clean in MESIF; forwarding just lapses
        Protocol::MESIF => match victim_state {
            Modified => Eviction::Writeback,
            Exclusive | Shared | Forward | Invalid => Eviction::Drop,
            _ => unreachable!("victim state {victim_state:?} unreachable under MESIF"),
        },
        Protocol::MOESI => match victim_state {
            Modified | Owned => Eviction::Writeback,
            Exclusive | Shared | Invalid => Eviction::Drop,
            _ => unreachable!("victim state {victim_state:?} unreachable under MOESI"),
        },
        Protocol::FESI => match victim_state {
            Forward => Eviction::OfferForward,
            Exclusive | Shared | Invalid => Eviction::Drop,
            _ => unreachable!("victim state {victim_state:?} unreachable under FESI"),
        },
    }
}

/// Snoop-side dispatch.
pub fn snoop(protocol: Protocol, state: BlockState, request: BusRequest) -> SnoopOutcome {
    if state == Invalid {
        return SnoopOutcome::IGNORE;
    }
    match request {
        BusRequest::BusRd => snoop_busrd(protocol, state),
        BusRequest::BusRdX => snoop_busrdx(protocol, state),
        BusRequest::BusUpgr => snoop_busupgr(protocol, state),
        BusRequest::SetF => snoop_setf(protocol, state),
        BusRequest::Flush | BusRequest::FlushPrime => {
            unreachable!("Flush-class broadcasts never reach peers")
        }
    }
}

fn snoop_busrd(protocol: Protocol, state: BlockState) -> SnoopOutcome {
    let entry = |next, reply, assert_shared| SnoopOutcome {
        next,
        reply,
        assert_shared,
        invalidate: false,
    };
    match protocol {
        // MSI never drives the shared line: a read miss installs Shared
        // unconditionally, so nobody samples it.
        Protocol::MSI => match state {
            Modified => entry(Some(Shared), Reply::Supply(SupplyKind::Dirty), false),
            Shared => entry(None, Reply::SupplyIfFirst(SupplyKind::Clean), false),
            _ => unreachable!("state {state:?} unreachable under MSI"),
        },
        Protocol::MESI => match state {
            Modified => entry(Some(Shared), Reply::Supply(SupplyKind::Dirty), true),
            Exclusive => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            Shared => entry(None, Reply::SupplyIfFirst(SupplyKind::Clean), true),
            _ => unreachable!("state {state:?} unreachable under MESI"),
        },
        // plain Shared copies never supply; the Forward holder does
        Protocol::MESIF => match state {
            Modified => entry(Some(Shared), Reply::Supply(SupplyKind::Dirty), true),
            Exclusive => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            Shared => entry(None, Reply::None, true),
            Forward => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            _ => unreachable!("state {state:?} unreachable under MESIF"),
        },
        // M degrades to Owned and keeps supplying; the write-back is
        // deferred until the Owned copy is displaced
        Protocol::MOESI => match state {
            Modified => entry(Some(Owned), Reply::Supply(SupplyKind::Clean), true),
            Owned => entry(None, Reply::Supply(SupplyKind::Clean), true),
            Exclusive => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            Shared => entry(None, Reply::None, true),
            _ => unreachable!("state {state:?} unreachable under MOESI"),
        },
        // Shared copies stay silent entirely: a FESI read miss only
        // consults the line to pick Exclusive, and any line with Shared
        // copies left behind has already lost its Forward holder
        Protocol::FESI => match state {
            Forward => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            Exclusive => entry(Some(Shared), Reply::Supply(SupplyKind::Clean), true),
            Shared => SnoopOutcome::IGNORE,
            _ => unreachable!("state {state:?} unreachable under FESI"),
        },
    }
}

fn snoop_busrdx(protocol: Protocol, state: BlockState) -> SnoopOutcome {
    let entry = |reply| SnoopOutcome {
        next: Some(Invalid),
        reply,
        assert_shared: false,
        invalidate: true,
    };
    match protocol {
        Protocol::MSI => match state {
            Modified => entry(Reply::Supply(SupplyKind::Dirty)),
            Shared => entry(Reply::SupplyIfFirst(SupplyKind::Clean)),
            _ => unreachable!("state {state:?} unreachable under MSI"),
        },
        Protocol::MESI => match state {
            Modified => entry(Reply::Supply(SupplyKind::Dirty)),
            Exclusive => entry(Reply::Supply(SupplyKind::Clean)),
            Shared => entry(Reply::SupplyIfFirst(SupplyKind::Clean)),
            _ => unreachable!("state {state:?} unreachable under MESI"),
        },
        Protocol::MESIF => match state {
            Modified => entry(Reply::Supply(SupplyKind::Dirty)),
            Exclusive | Forward => entry(Reply::Supply(SupplyKind::Clean)),
            Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MESIF"),
        },
        // Owned holds the only up-to-date copy: write back on the way out
        Protocol::MOESI => match state {
            Modified | Owned => entry(Reply::Supply(SupplyKind::Dirty)),
            Exclusive => entry(Reply::Supply(SupplyKind::Clean)),
            Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MOESI"),
        },
        Protocol::FESI => match state {
            Forward | Exclusive => entry(Reply::Supply(SupplyKind::Clean)),
            Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under FESI"),
        },
    }
}

fn snoop_busupgr(protocol: Protocol, state: BlockState) -> SnoopOutcome {
    let entry = |reply| SnoopOutcome {
        next: Some(Invalid),
        reply,
        assert_shared: false,
        invalidate: true,
    };
    // An upgrade carries no data, so nobody supplies; a dirty copy
    // still has to reach memory before it disappears. The M/E/O rows
    // are unreachable when the requester really held Shared, but the
    // table is total.
    match protocol {
        Protocol::MSI => match state {
            Modified => entry(Reply::Writeback),
            Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MSI"),
        },
        Protocol::MESI => match state {
            Modified => entry(Reply::Writeback),
            Exclusive | Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MESI"),
        },
        Protocol::MESIF => match state {
            Modified => entry(Reply::Writeback),
            Exclusive | Shared | Forward => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MESIF"),
        },
        Protocol::MOESI => match state {
            Modified | Owned => entry(Reply::Writeback),
            Exclusive | Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under MOESI"),
        },
        Protocol::FESI => match state {
            Forward | Exclusive | Shared => entry(Reply::None),
            _ => unreachable!("state {state:?} unreachable under FESI"),
        },
    }
}

fn snoop_setf(protocol: Protocol, state: BlockState) -> SnoopOutcome {
    assert_eq!(protocol, Protocol::FESI, "setF broadcast under {protocol:?}");
    match state {
        Shared => SnoopOutcome {
            next: None,
            reply: Reply::AdoptForwardIfFirst,
            assert_shared: false,
            invalidate: false,
        },
        Forward | Exclusive => SnoopOutcome::IGNORE,
        _ => unreachable!("state {state:?} unreachable under FESI"),
    }
}

/// Applies a snoop outcome to the snooping cache and the bus.
///
/// Flush-class emissions are counted directly on the bus rather than
/// routed through the engine's broadcast: peers never react to them, so
/// the effect is identical and the snoop loop stays non-reentrant.
pub fn apply_snoop(cache: &mut Cache, bus: &mut Bus, block: BlockAddr, outcome: SnoopOutcome) {
    match outcome.reply {
        Reply::None => {}
        Reply::Writeback => {
            bus.count(BusRequest::Flush);
            cache.num_writebacks += 1;
        }
        Reply::Supply(kind) => supply(cache, bus, kind),
        Reply::SupplyIfFirst(kind) => {
            if !bus.supplied() {
                supply(cache, bus, kind);
                cache.num_random += 1;
            }
        }
        Reply::AdoptForwardIfFirst => {
            if !bus.supplied() {
                bus.set_supplied();
                cache.set_state(block, Forward);
                cache.num_random += 1;
            }
        }
    }
    if outcome.assert_shared {
        bus.set_shared_line();
    }
    if outcome.invalidate {
        cache.num_invalidations += 1;
    }
    if let Some(next) = outcome.next {
        cache.set_state(block, next);
    }
}

fn supply(cache: &mut Cache, bus: &mut Bus, kind: SupplyKind) {
    bus.set_supplied();
    cache.num_provided += 1;
    match kind {
        SupplyKind::Clean => bus.count(BusRequest::FlushPrime),
        SupplyKind::Dirty => {
            bus.count(BusRequest::Flush);
            cache.num_writebacks += 1;
        }
    }
}
