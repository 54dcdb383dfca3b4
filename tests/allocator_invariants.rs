// tests/allocator_invariants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property-style checks of the quantified allocator invariants against
//! synthetic topologies spanning the scenario shapes: disjointness, exact
//! bundle size, and sibling-group compliance with/without hyperthreading.

use std::collections::{HashMap, HashSet};

use corebench::allocator;
use corebench::error::CoreBenchError;
use corebench::types::{Bundle, CoreId, Hierarchy, HierarchyLevel, RegionId, VirtualCore};

fn synthetic_cores(n: u32) -> Vec<VirtualCore> {
    (0..n)
        .map(|id| VirtualCore { id: CoreId(id), regions: Vec::new(), max_freq_khz: 3_000_000, numa_node: None })
        .collect()
}

fn two_level_hierarchy(packages: u32, total_cores: u32, siblings_per_core: u32) -> Hierarchy {
    let per_package = total_cores / packages;
    let mut siblings_level: HierarchyLevel = HashMap::new();
    let mut package_level: HierarchyLevel = HashMap::new();
    for core in 0..total_cores {
        let phys_core = core / siblings_per_core;
        siblings_level.entry(RegionId(phys_core as u64)).or_default().push(CoreId(core));
        let package = core / per_package;
        package_level.entry(RegionId(package as u64)).or_default().push(CoreId(core));
    }
    let mut levels = vec![siblings_level];
    if packages > 1 {
        levels.push(package_level);
    }
    if levels.last().unwrap().len() > 1 {
        let all: Vec<CoreId> = (0..total_cores).map(CoreId).collect();
        let mut root = HashMap::new();
        root.insert(RegionId(0), all);
        levels.push(root);
    }
    levels
}

fn numa_l3_hierarchy(numa_nodes: u32, l3_per_node: u32, siblings_per_core: u32) -> Hierarchy {
    let l3_total = numa_nodes * l3_per_node;
    let total_cores = l3_total * siblings_per_core;
    let cores_per_numa = l3_per_node * siblings_per_core;

    let mut siblings_level: HierarchyLevel = HashMap::new();
    let mut l3_level: HierarchyLevel = HashMap::new();
    let mut numa_level: HierarchyLevel = HashMap::new();
    for core in 0..total_cores {
        let phys_core = core / siblings_per_core;
        siblings_level.entry(RegionId(phys_core as u64)).or_default().push(CoreId(core));
        l3_level.entry(RegionId(phys_core as u64)).or_default().push(CoreId(core));
        numa_level.entry(RegionId((core / cores_per_numa) as u64)).or_default().push(CoreId(core));
    }
    let mut root: HierarchyLevel = HashMap::new();
    root.insert(RegionId(0), (0..total_cores).map(CoreId).collect());

    vec![siblings_level, l3_level, numa_level, root]
}

fn bundle(ids: &[u32]) -> Bundle {
    Bundle { cores: ids.iter().copied().map(CoreId).collect() }
}

fn assert_disjoint_and_sized(bundles: &[Bundle], core_limit: usize) {
    let mut seen: HashSet<CoreId> = HashSet::new();
    for b in bundles {
        assert_eq!(b.cores.len(), core_limit, "bundle size must equal the requested core_limit");
        for &c in &b.cores {
            assert!(seen.insert(c), "core {c:?} double-assigned across bundles");
        }
    }
}

fn assert_sibling_rule(bundles: &[Bundle], hierarchy: &Hierarchy, hyperthreading: bool) {
    for cores in hierarchy[0].values() {
        for bundle in bundles {
            let claimed = cores.iter().filter(|c| bundle.cores.contains(c)).count();
            if hyperthreading {
                assert!(claimed == 0 || claimed == cores.len(), "sibling group split across a bundle boundary");
            } else {
                assert!(claimed <= 1, "more than one sibling of a group landed in the same bundle");
            }
        }
    }
}

#[test]
fn single_package_no_hyperthreading_yields_disjoint_equal_bundles() {
    let hierarchy = two_level_hierarchy(1, 8, 1);
    let cores = synthetic_cores(8);
    let bundles = allocator::allocate(&hierarchy, &cores, 2, 4, false, None).unwrap();
    assert_eq!(bundles, vec![bundle(&[0, 1]), bundle(&[2, 3]), bundle(&[4, 5]), bundle(&[6, 7])]);
    assert_disjoint_and_sized(&bundles, 2);
    assert_sibling_rule(&bundles, &hierarchy, false);
}

#[test]
fn two_packages_with_hyperthreading_keeps_sibling_groups_intact() {
    let hierarchy = two_level_hierarchy(2, 32, 2);
    let cores = synthetic_cores(32);
    let bundles = allocator::allocate(&hierarchy, &cores, 2, 16, true, None).unwrap();
    let expected: Vec<Bundle> = (0..8)
        .flat_map(|i| [bundle(&[2 * i, 2 * i + 1]), bundle(&[16 + 2 * i, 17 + 2 * i])])
        .collect();
    assert_eq!(bundles, expected, "bundles must alternate packages, lowest id first in each");
    assert_disjoint_and_sized(&bundles, 2);
    assert_sibling_rule(&bundles, &hierarchy, true);
}

/// Scenario 3 (spec §8): the only multi-level (NUMA-then-L3) case.
#[test]
fn numa_then_l3_spreads_across_nodes_before_packing() {
    let hierarchy = numa_l3_hierarchy(2, 4, 2);
    let cores = synthetic_cores(16);
    let bundles = allocator::allocate(&hierarchy, &cores, 2, 4, false, None).unwrap();
    assert_eq!(bundles, vec![bundle(&[0, 2]), bundle(&[8, 10]), bundle(&[4, 6]), bundle(&[12, 14])]);
}

#[test]
fn odd_package_count_still_distributes_evenly() {
    let hierarchy = two_level_hierarchy(3, 15, 1);
    let cores = synthetic_cores(15);
    let bundles = allocator::allocate(&hierarchy, &cores, 2, 6, false, None).unwrap();
    assert_eq!(
        bundles,
        vec![
            bundle(&[0, 1]),
            bundle(&[5, 6]),
            bundle(&[10, 11]),
            bundle(&[2, 3]),
            bundle(&[7, 8]),
            bundle(&[12, 13]),
        ]
    );
    assert_disjoint_and_sized(&bundles, 2);
}

#[test]
fn whole_package_bundles_across_four_packages() {
    let hierarchy = two_level_hierarchy(4, 64, 2);
    let cores = synthetic_cores(64);
    let bundles = allocator::allocate(&hierarchy, &cores, 16, 4, true, None).unwrap();
    let expected: Vec<Bundle> =
        (0..4).map(|package| bundle(&(package * 16..package * 16 + 16).collect::<Vec<u32>>())).collect();
    assert_eq!(bundles, expected, "each bundle must be exactly one whole package's cores");
    assert_disjoint_and_sized(&bundles, 16);
    assert_sibling_rule(&bundles, &hierarchy, true);
}

#[test]
fn infeasible_request_is_rejected_with_a_suggestion() {
    let hierarchy = two_level_hierarchy(1, 8, 1);
    let cores = synthetic_cores(8);
    let err = allocator::allocate(&hierarchy, &cores, 5, 2, false, None).unwrap_err();
    match err {
        CoreBenchError::InfeasibleAllocation { .. } => {}
        other => panic!("expected InfeasibleAllocation, got {other:?}"),
    }
}

#[test]
fn boundary_core_limit_of_one_covers_every_active_core() {
    let hierarchy = two_level_hierarchy(1, 8, 1);
    let cores = synthetic_cores(8);
    let bundles = allocator::allocate(&hierarchy, &cores, 1, 8, false, None).unwrap();
    let mut all: Vec<u32> = bundles.iter().flat_map(|b| b.cores.iter().map(|c| c.0)).collect();
    all.sort_unstable();
    assert_eq!(all, (0..8).collect::<Vec<_>>());
}

#[test]
fn core_requirement_above_core_limit_truncates_each_bundle() {
    let hierarchy = two_level_hierarchy(2, 32, 2);
    let cores = synthetic_cores(32);
    let bundles = allocator::allocate(&hierarchy, &cores, 2, 8, true, Some(4)).unwrap();
    assert_eq!(bundles.len(), 8);
    assert_disjoint_and_sized(&bundles, 2);
}

#[test]
fn allocation_is_deterministic_across_repeated_calls() {
    let hierarchy = two_level_hierarchy(2, 32, 2);
    let cores = synthetic_cores(32);
    let first = allocator::allocate(&hierarchy, &cores, 2, 16, true, None).unwrap();
    let second = allocator::allocate(&hierarchy, &cores, 2, 16, true, None).unwrap();
    assert_eq!(first, second);
}
