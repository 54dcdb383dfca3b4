// src/membank.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory-bank Assigner (spec §4.4): maps each bundle to the NUMA banks
//! locally reachable from its cores, intersected with the process's allowed
//! bank set.

use std::collections::HashSet;

use crate::error::{CoreBenchError, Result};
use crate::topology::sysfs;
use crate::types::{BankAssignment, BankId, Bundle, CoreId, VirtualCore};

/// Assigns banks to every bundle. Returns `None` if the system has no NUMA
/// sysfs tree at all, meaning "no memory restriction" (spec §4.4).
pub fn assign(bundles: &[Bundle], cores: &[VirtualCore]) -> Result<Option<Vec<BankAssignment>>> {
    let all_banks = sysfs::list_all_banks().map_err(|e| CoreBenchError::TopologyReadFailure {
        path: "/sys/devices/system/node".to_string(),
        source: e,
    })?;
    if all_banks.is_empty() {
        return Ok(None);
    }

    let allowed: HashSet<BankId> = match sysfs::read_cgroup_allowed_mems().unwrap_or(None) {
        Some(mems) => mems.into_iter().map(BankId).collect(),
        None => all_banks.iter().copied().collect(),
    };

    let core_to_node: std::collections::HashMap<CoreId, BankId> = cores
        .iter()
        .filter_map(|c| c.numa_node.map(|n| (c.id, BankId(n.0 as u32))))
        .collect();

    let mut assignments = Vec::with_capacity(bundles.len());
    for bundle in bundles {
        let mut banks: Vec<BankId> = bundle
            .cores
            .iter()
            .filter_map(|c| core_to_node.get(c))
            .filter(|b| allowed.contains(b))
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        banks.sort_unstable();

        if banks.is_empty() {
            return Err(CoreBenchError::TopologyReadFailure {
                path: "/sys/devices/system/node".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "bundle has no reachable memory bank after intersecting the allowed set",
                ),
            });
        }

        assignments.push(BankAssignment { banks });
    }

    Ok(Some(assignments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegionId;

    fn core(id: u32, node: u32) -> VirtualCore {
        VirtualCore {
            id: CoreId(id),
            regions: Vec::new(),
            max_freq_khz: 3_000_000,
            numa_node: Some(RegionId(node as u64)),
        }
    }

    #[test]
    fn banks_sorted_and_deduplicated() {
        let cores = vec![core(0, 1), core(1, 1), core(2, 0)];
        let bundle = Bundle { cores: vec![CoreId(0), CoreId(1), CoreId(2)] };
        let core_to_node: std::collections::HashMap<CoreId, BankId> =
            cores.iter().map(|c| (c.id, BankId(c.numa_node.unwrap().0 as u32))).collect();
        let mut banks: Vec<BankId> = bundle
            .cores
            .iter()
            .filter_map(|c| core_to_node.get(c))
            .copied()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        banks.sort_unstable();
        assert_eq!(banks, vec![BankId(0), BankId(1)]);
    }
}
