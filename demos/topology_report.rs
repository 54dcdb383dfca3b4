// demos/topology_report.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Detects the local machine's topology and prints the bundles the
//! allocator would hand out for a given `--workers`/`--core-limit` pair.

use corebench::allocator;
use corebench::topology::Topology;

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let mut args = std::env::args().skip(1);
    let workers: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(2);
    let core_limit: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(2);

    println!("=== Topology Detection ===\n");

    let topology = match Topology::detect(None) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to detect topology: {e}");
            std::process::exit(1);
        }
    };

    println!("active cores: {}", topology.active_core_count());
    println!("hierarchy levels: {}", topology.hierarchy.len());
    for (idx, level) in topology.hierarchy.iter().enumerate() {
        println!("  level {idx}: {} region(s)", level.len());
    }

    println!("\n=== Allocating {workers} worker(s) x {core_limit} core(s) ===\n");
    match allocator::allocate(&topology.hierarchy, &topology.cores, core_limit, workers, false, None) {
        Ok(bundles) => {
            for (i, bundle) in bundles.iter().enumerate() {
                let ids: Vec<String> = bundle.cores.iter().map(|c| c.0.to_string()).collect();
                println!("worker {i}: cores [{}]", ids.join(","));
            }
        }
        Err(e) => {
            eprintln!("allocation failed: {e}");
            std::process::exit(1);
        }
    }
}
