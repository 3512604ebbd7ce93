/*
    A trace-driven simulator for snoop-based, write-back invalidation
    cache-coherence protocols: MSI, MESI, MESIF, MOESI, and FESI.
 */

pub mod bus;
pub mod cache;
pub mod coherence;
pub mod commons;
pub mod system;
pub mod trace;
