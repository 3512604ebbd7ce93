use std::fs;
use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;
use log::info;

use snoopsim::bus::Bus;
use snoopsim::cache::Cache;
use snoopsim::commons::CacheStat;
use snoopsim::system::System;
use snoopsim::trace::{TraceEvent, TraceReader};

/// Trace-driven snoop-based cache-coherence simulator.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Trace file to simulate; reads stdin when omitted.
    trace: Option<PathBuf>,

    /// Suppress the per-set cache contents dump.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,
}

fn main() {
    env_logger::init_from_env(Env::default().filter_or("SNOOPSIM_LOG", "warn"));

    let args = Args::parse();
    if let Err(e) = run(&args) {
        // a malformed trace yields a diagnostic, not a partial report
        eprintln!("snoopsim: {e}");
    }
}

fn run(args: &Args) -> Result<(), snoopsim::trace::TraceError> {
    let input = match &args.trace {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let mut reader = TraceReader::new(&input);
    let Some(protocol) = reader.read_protocol() else {
        return Ok(());
    };
    let mut system = System::new(protocol);
    println!("Protocol Used : {}", system.protocol());

    let mut processed = 0u64;
    loop {
        match reader.next_event()? {
            TraceEvent::Access { core, op, addr } => {
                system.handle_proc_request(core, op, addr);
                processed += 1;
            }
            TraceEvent::CoreOutOfRange(core) => {
                println!("Incorrect core number {core}");
                return Ok(());
            }
            TraceEvent::End => break,
        }
    }
    info!("processed {processed} trace records");

    print_report(&system, args.quiet);
    Ok(())
}

fn print_report(system: &System, quiet: bool) {
    for cache in system.caches() {
        print_cache_stats(cache, quiet);
    }
    println!("---- ");
    print_bus_stats(system.bus());
    println!("---- ");
    print_totals(system);
}

fn print_cache_stats(cache: &Cache, quiet: bool) {
    println!(">> Cache {} stats", cache.id);
    println!("{:<16}: {}", "Reads", cache.num_reads);
    println!("{:<16}: {}", "Read misses", cache.num_read_misses);
    println!("{:<16}: {}", "Writes", cache.num_writes);
    println!("{:<16}: {}", "Write misses", cache.num_write_misses);
    println!("{:<16}: {}", "Writebacks", cache.num_writebacks);
    println!("{:<16}: {}", "Invalidations", cache.num_invalidations);
    println!("{:<16}: {}", "Provided", cache.num_provided);
    println!("{:<16}: {}", "From LLC", cache.num_from_llc);
    println!("{:<16}: {}", "Randomly Chosen", cache.num_random);
    if quiet {
        return;
    }
    println!("Cache blocks present :");
    for (index, set) in cache.sets().iter().enumerate() {
        let mut line = format!("Set {index} => ");
        for block in set.blocks() {
            line.push(block.state.letter());
            line.push_str(&format!(":0x{:x}\t", block.tag));
        }
        println!("{line}");
    }
}

fn print_bus_stats(bus: &Bus) {
    println!(">> Bus stats");
    println!("{:<23}: {}", "Number of BusRd", bus.num_busrd);
    println!("{:<23}: {}", "Number of BusRdX", bus.num_busrdx);
    println!("{:<23}: {}", "Number of BusUpgr", bus.num_busupgr);
    println!("{:<23}: {}", "Number of Flushes", bus.num_flushes);
    println!("{:<23}: {}", "Number of Flush Primes", bus.num_flush_primes);
    println!("{:<23}: {}", "Number of setF", bus.num_setf);
}

fn print_totals(system: &System) {
    println!(">>>> Total Cache Stats ");
    println!("{:<14}: {}", "Reads", system.total(CacheStat::Reads));
    println!("{:<14}: {}", "Read misses", system.total(CacheStat::ReadMisses));
    println!("{:<14}: {}", "Writes", system.total(CacheStat::Writes));
    println!("{:<14}: {}", "Write misses", system.total(CacheStat::WriteMisses));
    println!("{:<14}: {}", "Writebacks", system.total(CacheStat::Writebacks));
    println!("{:<14}: {}", "Invalidations", system.total(CacheStat::Invalidations));
    println!("{:<14}: {}", "Provided", system.total(CacheStat::Provided));
    println!("{:<14}: {}", "From LLC", system.total(CacheStat::FromLlc));
    println!("{:<14}: {}", "Random", system.total(CacheStat::Random));
}
