// benches/allocator_throughput.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Measures allocator wall-clock cost across topology sizes, since the
//! allocator runs once per pool start and should stay well under a second
//! even for large multi-socket machines.

use std::collections::HashMap;

use corebench::allocator;
use corebench::types::{CoreId, Hierarchy, HierarchyLevel, RegionId, VirtualCore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn synthetic_hierarchy(packages: u32, cores_per_package: u32, siblings_per_core: u32) -> (Hierarchy, Vec<VirtualCore>) {
    let total = packages * cores_per_package;
    let mut siblings_level: HierarchyLevel = HashMap::new();
    let mut package_level: HierarchyLevel = HashMap::new();
    let mut cores = Vec::with_capacity(total as usize);

    for id in 0..total {
        let phys = id / siblings_per_core;
        siblings_level.entry(RegionId(phys as u64)).or_default().push(CoreId(id));
        let package = id / cores_per_package;
        package_level.entry(RegionId(package as u64)).or_default().push(CoreId(id));
        cores.push(VirtualCore { id: CoreId(id), regions: Vec::new(), max_freq_khz: 3_000_000, numa_node: None });
    }

    let mut levels = vec![siblings_level, package_level];
    if packages > 1 {
        let all: Vec<CoreId> = (0..total).map(CoreId).collect();
        let mut root = HashMap::new();
        root.insert(RegionId(0), all);
        levels.push(root);
    }
    (levels, cores)
}

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    for &(packages, cores_per_package) in &[(2u32, 16u32), (4, 32), (8, 64)] {
        let (hierarchy, cores) = synthetic_hierarchy(packages, cores_per_package, 2);
        let total_workers = packages * cores_per_package / 4;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{packages}x{cores_per_package}")),
            &(hierarchy, cores),
            |b, (hierarchy, cores)| {
                b.iter(|| {
                    allocator::allocate(
                        black_box(hierarchy),
                        black_box(cores),
                        black_box(2),
                        black_box(total_workers.max(1)),
                        black_box(true),
                        black_box(None),
                    )
                    .unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_allocate);
criterion_main!(benches);
