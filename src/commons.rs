use std::fmt;
use std::str::FromStr;

// system geometry

pub const NUM_CACHES: usize = 16;
pub const SET_BITS: u32 = 2;
pub const NUM_SETS: usize = 1 << SET_BITS;
pub const ASSOC_BITS: u32 = 2;
pub const ASSOCIATIVITY: usize = 1 << ASSOC_BITS;
pub const OFFSET_BITS: u32 = 6;
pub const BLOCK_SIZE: usize = 1 << OFFSET_BITS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Protocol {
    MSI,
    MESI,
    MESIF,
    MOESI,
    FESI,
}

impl Protocol {
    /// Whether a read miss with no other sharers installs Exclusive.
    pub fn admits_exclusive(self) -> bool {
        self != Protocol::MSI
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MSI" => Ok(Protocol::MSI),
            "MESI" => Ok(Protocol::MESI),
            "MESIF" => Ok(Protocol::MESIF),
            "MOESI" => Ok(Protocol::MOESI),
            "FESI" => Ok(Protocol::FESI),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::MSI => "MSI",
            Protocol::MESI => "MESI",
            Protocol::MESIF => "MESIF",
            Protocol::MOESI => "MOESI",
            Protocol::FESI => "FESI",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockState {
    Modified,
    Exclusive,
    Shared,
    Invalid,
    Owned,
    Forward,
}

impl BlockState {
    /// Single-letter form used by the cache contents dump.
    pub fn letter(self) -> char {
        match self {
            BlockState::Modified => 'M',
            BlockState::Exclusive => 'E',
            BlockState::Shared => 'S',
            BlockState::Invalid => 'I',
            BlockState::Owned => 'O',
            BlockState::Forward => 'F',
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcRequest {
    Read,
    Write,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusRequest {
    BusRd,
    BusRdX,
    BusUpgr,
    SetF,
    Flush,
    FlushPrime,
}

impl BusRequest {
    /// Flush-class broadcasts are bookkeeping only; peers never snoop them.
    pub fn is_flush(self) -> bool {
        matches!(self, BusRequest::Flush | BusRequest::FlushPrime)
    }
}

/// Per-cache counter selectors, used for totals and by tests.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheStat {
    Reads,
    ReadMisses,
    Writes,
    WriteMisses,
    Writebacks,
    Invalidations,
    Provided,
    FromLlc,
    Random,
}

// addresses

/// A full processor address as it appears in the trace.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Addr(pub u64);

impl Addr {
    pub fn block(self) -> BlockAddr {
        BlockAddr(self.0 >> OFFSET_BITS)
    }
}

/// A memory address with the line offset bits stripped. Bus messages
/// always carry block addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockAddr(pub u64);

impl BlockAddr {
    /// Returns the set index and tag of this block address.
    pub fn pos(self) -> (usize, u64) {
        let set = (self.0 & ((1 << SET_BITS) - 1)) as usize;
        let tag = self.0 >> SET_BITS;
        (set, tag)
    }

    /// Reconstructs the block address of a cached block from its set
    /// index and tag, e.g. when flushing an eviction victim.
    pub fn from_pos(set: usize, tag: u64) -> Self {
        BlockAddr((tag << SET_BITS) | set as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_names_round_trip() {
        for name in ["MSI", "MESI", "MESIF", "MOESI", "FESI"] {
            let p: Protocol = name.parse().unwrap();
            assert_eq!(p.to_string(), name);
        }
        assert!("Dragon".parse::<Protocol>().is_err());
        assert!("mesi".parse::<Protocol>().is_err());
    }

    #[test]
    fn address_decomposition() {
        // 0x40 is the second cache line: block address 1, set 1, tag 0
        let block = Addr(0x40).block();
        assert_eq!(block, BlockAddr(1));
        assert_eq!(block.pos(), (1, 0));
    }

    #[test]
    fn block_address_round_trip() {
        for raw in [0u64, 1, 2, 3, 4, 0x3f, 0x1234, u64::MAX >> OFFSET_BITS] {
            let block = BlockAddr(raw);
            let (set, tag) = block.pos();
            assert_eq!(BlockAddr::from_pos(set, tag), block);
        }
    }
}
