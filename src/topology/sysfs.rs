// src/topology/sysfs.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw sysfs/procfs readers implementing the bit-stable contract of spec §6.
//! Every function here is a thin, testable wrapper around one file format;
//! the higher-level assembly lives in `reader.rs` and `hierarchy.rs`.

use std::fs;
use std::io;
use std::path::Path;

use crate::types::{BankId, CoreId, RegionId};

const CPU_SYSFS_ROOT: &str = "/sys/devices/system/cpu";
const NODE_SYSFS_ROOT: &str = "/sys/devices/system/node";

fn read_trimmed(path: &Path) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

/// Parses a Linux "list" format, e.g. `"0-3,8,10-11"`, into individual ids.
pub fn parse_id_list(raw: &str) -> Vec<u32> {
    let mut out = Vec::new();
    for part in raw.trim().split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                out.extend(lo..=hi);
            }
        } else if let Ok(v) = part.parse::<u32>() {
            out.push(v);
        }
    }
    out
}

/// `/sys/devices/system/cpu/cpuN/cpufreq/cpuinfo_max_freq` — integer kHz.
pub fn read_max_freq_khz(core: CoreId) -> io::Result<u64> {
    let path = format!(
        "{CPU_SYSFS_ROOT}/cpu{}/cpufreq/cpuinfo_max_freq",
        core.0
    );
    read_trimmed(Path::new(&path))?
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Hyper-thread sibling list for one core: prefers `core_cpus_list`, falls
/// back to the deprecated `thread_siblings_list`.
pub fn read_siblings(core: CoreId) -> io::Result<Vec<CoreId>> {
    let preferred = format!(
        "{CPU_SYSFS_ROOT}/cpu{}/topology/core_cpus_list",
        core.0
    );
    let deprecated = format!(
        "{CPU_SYSFS_ROOT}/cpu{}/topology/thread_siblings_list",
        core.0
    );
    let raw = read_trimmed(Path::new(&preferred))
        .or_else(|_| read_trimmed(Path::new(&deprecated)))?;
    Ok(parse_id_list(&raw).into_iter().map(CoreId).collect())
}

/// Generic single-integer-id sysfs field reader (`physical_package_id`,
/// `die_id`, `cluster_id`, `book_id`, `drawer_id`). Returns `Ok(None)` rather
/// than erroring when the attribute doesn't exist on this kernel/arch, matching
/// the original's "absence means not available" semantics.
pub fn read_generic_mapping(core: CoreId, filename: &str) -> io::Result<Option<RegionId>> {
    let path = format!("{CPU_SYSFS_ROOT}/cpu{}/topology/{filename}", core.0);
    match read_trimmed(Path::new(&path)) {
        Ok(raw) => raw
            .parse::<i64>()
            .map(|v| Some(RegionId(v as u64)))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// L3 cache id for a core: scans `cache/indexK/level` for `level == 3`, then
/// reads that index's `id`.
pub fn read_l3_cache_id(core: CoreId) -> io::Result<Option<RegionId>> {
    let cache_dir = format!("{CPU_SYSFS_ROOT}/cpu{}/cache", core.0);
    let entries = match fs::read_dir(&cache_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let index_dir = entry.path();
        let level_path = index_dir.join("level");
        let level = match read_trimmed(&level_path) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if level.trim() == "3" {
            let id = read_trimmed(&index_dir.join("id"))?
                .parse::<u64>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            return Ok(Some(RegionId(id)));
        }
    }
    Ok(None)
}

/// Per-core NUMA node, inferred by listing `node*` entries under the core's
/// sysfs directory.
pub fn read_numa_node(core: CoreId) -> io::Result<Option<RegionId>> {
    let dir = format!("{CPU_SYSFS_ROOT}/cpu{}", core.0);
    list_node_entries(Path::new(&dir)).map(|nodes| nodes.into_iter().next().map(RegionId))
}

/// Lists `node<N>` entries directly inside `dir`, returning the bare `N`s.
/// Works for both `/sys/devices/system/node/` and a per-core cpu directory.
pub fn list_node_entries(dir: &Path) -> io::Result<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut nodes = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(rest) = name.strip_prefix("node") {
            if let Ok(id) = rest.parse::<u64>() {
                nodes.push(id);
            }
        }
    }
    nodes.sort_unstable();
    Ok(nodes)
}

/// Lists all NUMA node ids present on the system, or an empty vec if the
/// system has no NUMA sysfs tree at all (meaning "no memory restriction").
pub fn list_numa_nodes() -> io::Result<Vec<u32>> {
    list_node_entries(Path::new(NODE_SYSFS_ROOT)).map(|v| v.into_iter().map(|n| n as u32).collect())
}

/// `/sys/devices/system/node/nodeK/distance` — space-separated distance vector.
pub fn read_node_distance(node: u32) -> io::Result<Vec<u64>> {
    let path = format!("{NODE_SYSFS_ROOT}/node{node}/distance");
    let raw = read_trimmed(Path::new(&path))?;
    raw.split_whitespace()
        .map(|s| s.parse::<u64>().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)))
        .collect()
}

/// `/sys/devices/system/node/nodeK/meminfo`'s `MemTotal: N kB` entry,
/// converted to bytes. `kB` here means KiB: multiply by 1024.
pub fn read_node_mem_total_bytes(node: u32) -> io::Result<u64> {
    let path = format!("{NODE_SYSFS_ROOT}/node{node}/meminfo");
    let text = fs::read_to_string(&path)?;
    for line in text.lines() {
        if let Some(rest) = line.split("MemTotal:").nth(1) {
            let kb = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse::<u64>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            return Ok(kb * 1024);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("no MemTotal line in {path}"),
    ))
}

/// Banks listed as `node<N>` entries under the node sysfs root, for use when
/// intersecting a bundle's reachable banks against the process's allowed set.
pub fn list_all_banks() -> io::Result<Vec<BankId>> {
    list_numa_nodes().map(|v| v.into_iter().map(BankId).collect())
}

/// Best-effort read of the cgroup-allowed CPU set (`cpuset.cpus.effective` for
/// v2, `cpuset.cpus` for v1). Returns `None` if no cpuset controller is
/// mounted, meaning "no restriction beyond the physical cores present".
pub fn read_cgroup_allowed_cpus() -> io::Result<Option<Vec<u32>>> {
    for path in [
        "/sys/fs/cgroup/cpuset.cpus.effective",
        "/sys/fs/cgroup/cpuset/cpuset.cpus",
    ] {
        if let Ok(raw) = read_trimmed(Path::new(path)) {
            return Ok(Some(parse_id_list(&raw)));
        }
    }
    Ok(None)
}

/// Best-effort read of the cgroup-allowed memory node set, mirroring
/// `read_cgroup_allowed_cpus` for `cpuset.mems`.
pub fn read_cgroup_allowed_mems() -> io::Result<Option<Vec<u32>>> {
    for path in [
        "/sys/fs/cgroup/cpuset.mems.effective",
        "/sys/fs/cgroup/cpuset/cpuset.mems",
    ] {
        if let Ok(raw) = read_trimmed(Path::new(path)) {
            return Ok(Some(parse_id_list(&raw)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_list() {
        assert_eq!(parse_id_list("0,1,2,3"), vec![0, 1, 2, 3]);
    }

    #[test]
    fn parses_ranges() {
        assert_eq!(parse_id_list("0-3,8,10-11"), vec![0, 1, 2, 3, 8, 10, 11]);
    }

    #[test]
    fn parses_empty() {
        assert_eq!(parse_id_list(""), Vec::<u32>::new());
    }
}
