// src/topology/reader.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topology Reader (spec §4.1): produces per-CPU facts for every core in the
//! process's allowed set, applies the explicit core-set override and the
//! frequency filter.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::constants::FREQUENCY_FILTER_THRESHOLD;
use crate::error::{CoreBenchError, Result};
use crate::types::{CoreId, RegionId};

use super::sysfs;

/// Raw per-core facts as read from sysfs, before hierarchy assembly.
#[derive(Debug, Clone)]
pub struct RawCoreFacts {
    pub id: CoreId,
    pub max_freq_khz: u64,
    pub siblings: Vec<CoreId>,
    pub l3: Option<RegionId>,
    pub package: Option<RegionId>,
    pub die: Option<RegionId>,
    pub cluster: Option<RegionId>,
    pub book: Option<RegionId>,
    pub drawer: Option<RegionId>,
    pub numa_node: Option<RegionId>,
}

/// Lists every `cpuN` directory present under the cpu sysfs root that exposes
/// a `topology/` subdirectory (i.e. an online, topology-visible core).
fn discover_present_cores() -> Result<Vec<CoreId>> {
    let root = Path::new("/sys/devices/system/cpu");
    let entries = fs::read_dir(root).map_err(|e| CoreBenchError::TopologyReadFailure {
        path: root.display().to_string(),
        source: e,
    })?;
    let mut cores = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CoreBenchError::TopologyReadFailure {
            path: root.display().to_string(),
            source: e,
        })?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix("cpu") {
            if let Ok(id) = rest.parse::<u32>() {
                if entry.path().join("topology").is_dir() {
                    cores.push(CoreId(id));
                }
            }
        }
    }
    cores.sort_unstable();
    Ok(cores)
}

fn read_facts(core: CoreId) -> Result<RawCoreFacts> {
    let to_err = |path: &str, e: std::io::Error| CoreBenchError::TopologyReadFailure {
        path: path.to_string(),
        source: e,
    };
    let max_freq_khz = sysfs::read_max_freq_khz(core)
        .map_err(|e| to_err(&format!("cpu{}/cpufreq/cpuinfo_max_freq", core.0), e))?;
    let siblings = sysfs::read_siblings(core)
        .map_err(|e| to_err(&format!("cpu{}/topology/core_cpus_list", core.0), e))?;
    let package = sysfs::read_generic_mapping(core, "physical_package_id")
        .map_err(|e| to_err(&format!("cpu{}/topology/physical_package_id", core.0), e))?;
    let die = sysfs::read_generic_mapping(core, "die_id")
        .map_err(|e| to_err(&format!("cpu{}/topology/die_id", core.0), e))?;
    let cluster = sysfs::read_generic_mapping(core, "cluster_id")
        .map_err(|e| to_err(&format!("cpu{}/topology/cluster_id", core.0), e))?;
    let book = sysfs::read_generic_mapping(core, "book_id")
        .map_err(|e| to_err(&format!("cpu{}/topology/book_id", core.0), e))?;
    let drawer = sysfs::read_generic_mapping(core, "drawer_id")
        .map_err(|e| to_err(&format!("cpu{}/topology/drawer_id", core.0), e))?;
    let l3 = sysfs::read_l3_cache_id(core)
        .map_err(|e| to_err(&format!("cpu{}/cache", core.0), e))?;
    let numa_node = sysfs::read_numa_node(core)
        .map_err(|e| to_err(&format!("cpu{}", core.0), e))?;

    Ok(RawCoreFacts {
        id: core,
        max_freq_khz,
        siblings,
        l3,
        package,
        die,
        cluster,
        book,
        drawer,
        numa_node,
    })
}

/// Reads facts for every requested core in parallel. `explicit_core_set`
/// mirrors `resources.py::get_cpu_list`'s `coreSet` parameter: when given, it
/// is intersected with the cgroup-allowed set, and any requested core absent
/// from that intersection is a hard error rather than a silent drop.
pub fn detect(explicit_core_set: Option<&[CoreId]>) -> Result<Vec<RawCoreFacts>> {
    let present = discover_present_cores()?;
    let allowed = sysfs::read_cgroup_allowed_cpus().unwrap_or(None);

    let mut candidates: Vec<CoreId> = match &allowed {
        Some(allowed) => {
            let allowed: std::collections::HashSet<u32> = allowed.iter().copied().collect();
            present.into_iter().filter(|c| allowed.contains(&c.0)).collect()
        }
        None => present,
    };

    if let Some(requested) = explicit_core_set {
        let available: std::collections::HashSet<CoreId> = candidates.iter().copied().collect();
        let invalid: Vec<u32> = requested
            .iter()
            .filter(|c| !available.contains(c))
            .map(|c| c.0)
            .collect();
        if !invalid.is_empty() {
            return Err(CoreBenchError::InvalidCoreSet(invalid));
        }
        candidates = requested.to_vec();
    }

    debug!(count = candidates.len(), "reading topology facts for candidate cores");

    let facts: Result<Vec<RawCoreFacts>> = candidates
        .par_iter()
        .map(|&core| read_facts(core))
        .collect();
    let facts = facts?;

    Ok(apply_frequency_filter(facts))
}

/// Keeps a core iff `max_freq_khz >= THRESHOLD * fastest`. Discarded cores
/// are logged at debug level and never used (spec §4.1).
fn apply_frequency_filter(facts: Vec<RawCoreFacts>) -> Vec<RawCoreFacts> {
    let fastest = facts.iter().map(|f| f.max_freq_khz).max().unwrap_or(0);
    if fastest == 0 {
        return facts;
    }
    let threshold = (fastest as f64 * FREQUENCY_FILTER_THRESHOLD) as u64;
    let (kept, dropped): (Vec<_>, Vec<_>) =
        facts.into_iter().partition(|f| f.max_freq_khz >= threshold);
    for f in &dropped {
        debug!(core = f.id.0, freq_khz = f.max_freq_khz, fastest, "core excluded by frequency filter");
    }
    if !dropped.is_empty() {
        warn!(excluded = dropped.len(), "excluded slow cores from a heterogeneous-frequency topology");
    }
    kept
}
