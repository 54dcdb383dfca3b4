// src/allocator/distribute.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The distribution algorithm (spec §4.3.3): for each bundle, descend the
//! hierarchy picking the largest-remaining region to spread bundles across
//! top-level regions, then pack within the chosen region by repeatedly
//! pulling from the most-depleted sub-region so a bundle's cores stay local.

use std::collections::HashMap;

use crate::error::{CoreBenchError, Result};
use crate::types::{Bundle, CoreId, Hierarchy, HierarchyLevel, RegionId};

use super::feasibility::FeasibilityPlan;

fn region_containing(level: &HierarchyLevel, core: CoreId) -> Option<RegionId> {
    level.iter().find(|(_, cores)| cores.contains(&core)).map(|(r, _)| *r)
}

fn group_by_level(scope: &[CoreId], level: &HierarchyLevel) -> HashMap<RegionId, Vec<CoreId>> {
    let mut out: HashMap<RegionId, Vec<CoreId>> = HashMap::new();
    for &c in scope {
        if let Some(r) = region_containing(level, c) {
            out.entry(r).or_default().push(c);
        }
    }
    out
}

/// Picks one region out of a grouping. `prefer_largest = true` spreads
/// (picks the biggest remaining region, used when descending from the top);
/// `false` packs (picks the most-depleted region, used when filling a
/// bundle within its chosen-level region). Ties always break toward the
/// region whose lowest core id is smallest, for determinism.
fn pick_region(grouped: &HashMap<RegionId, Vec<CoreId>>, prefer_largest: bool) -> RegionId {
    grouped
        .iter()
        .map(|(r, cores)| (*r, cores.len(), cores.iter().map(|c| c.0).min().unwrap_or(u32::MAX)))
        .reduce(|best, candidate| {
            let (_, bsize, bfirst) = best;
            let (_, size, first) = candidate;
            let better = if prefer_largest {
                size > bsize || (size == bsize && first < bfirst)
            } else {
                size < bsize || (size == bsize && first < bfirst)
            };
            if better {
                candidate
            } else {
                best
            }
        })
        .map(|(r, _, _)| r)
        .expect("grouping must be non-empty")
}

/// Descends from `scope` (known to lie within one region at `from_idx`)
/// down to `stop_idx`, narrowing at each level via `pick_region`.
fn descend(
    levels: &Hierarchy,
    scope: &[CoreId],
    from_idx: usize,
    stop_idx: usize,
    prefer_largest: bool,
) -> Vec<CoreId> {
    let mut cur = scope.to_vec();
    let mut idx = from_idx;
    while idx > stop_idx {
        let next_idx = idx - 1;
        let grouped = group_by_level(&cur, &levels[next_idx]);
        if grouped.is_empty() {
            break;
        }
        let r = pick_region(&grouped, prefer_largest);
        cur = grouped[&r].clone();
        idx = next_idx;
        if cur.len() <= 1 {
            break;
        }
    }
    cur
}

pub(crate) fn remove_core_everywhere(levels: &mut Hierarchy, core: CoreId) {
    for level in levels.iter_mut() {
        let mut empty_regions = Vec::new();
        for (region, cores) in level.iter_mut() {
            cores.retain(|&c| c != core);
            if cores.is_empty() {
                empty_regions.push(*region);
            }
        }
        for region in empty_regions {
            level.remove(&region);
        }
    }
}

fn sibling_group(levels: &Hierarchy, core: CoreId) -> Vec<CoreId> {
    levels[0]
        .values()
        .find(|cores| cores.contains(&core))
        .cloned()
        .unwrap_or_else(|| vec![core])
}

/// Builds the `workers` bundles for one allocation, mutating `levels` in
/// place as cores are claimed (spec §4.3.3, §4.3.4).
pub fn run(
    levels: &mut Hierarchy,
    plan: &FeasibilityPlan,
    core_limit: usize,
    workers: usize,
) -> Result<Vec<Bundle>> {
    let mut bundles = Vec::with_capacity(workers);

    for _ in 0..workers {
        let top_idx = levels.len() - 1;
        let top_scope: Vec<CoreId> = levels[top_idx]
            .values()
            .next()
            .cloned()
            .ok_or_else(|| CoreBenchError::InfeasibleAllocation {
                reason: "ran out of cores while building bundles".to_string(),
                suggested_workers: Some(bundles.len() as u32),
            })?;

        // Stage 1: spread — descend from the top to the chosen level,
        // always preferring the largest remaining region.
        let region_a_cores = descend(levels, &top_scope, top_idx, plan.chosen_level, true);
        let region_a =
            region_containing(&levels[plan.chosen_level], region_a_cores[0]).ok_or_else(|| {
                CoreBenchError::InfeasibleAllocation {
                    reason: "chosen-level region vanished while building a bundle".to_string(),
                    suggested_workers: Some(bundles.len() as u32),
                }
            })?;
        let mut remaining_in_region: Vec<CoreId> = levels[plan.chosen_level][&region_a].clone();

        let mut bundle_cores: Vec<CoreId> = Vec::with_capacity(core_limit);

        // Stage 2: pack — within region A, repeatedly pull the full sibling
        // group of the most-depleted leaf until the bundle is full.
        while bundle_cores.len() < core_limit && !remaining_in_region.is_empty() {
            let leaf = if plan.chosen_level == 0 {
                remaining_in_region.clone()
            } else {
                descend(levels, &remaining_in_region, plan.chosen_level - 1, 0, false)
            };
            let picked = *leaf.iter().min().ok_or_else(|| CoreBenchError::InfeasibleAllocation {
                reason: "empty sub-region while packing a bundle".to_string(),
                suggested_workers: Some(bundles.len() as u32),
            })?;

            let siblings = sibling_group(levels, picked);
            for &s in &siblings {
                if bundle_cores.len() < core_limit {
                    bundle_cores.push(s);
                }
                // else: extra sibling is set aside (blocked) — still removed
                // below so it is never reused by a later bundle.
            }
            for &s in &siblings {
                remove_core_everywhere(levels, s);
                remaining_in_region.retain(|&c| c != s);
            }
        }

        if bundle_cores.len() != core_limit {
            return Err(CoreBenchError::InfeasibleAllocation {
                reason: format!(
                    "bundle only received {} of {core_limit} requested cores",
                    bundle_cores.len()
                ),
                suggested_workers: Some(bundles.len() as u32),
            });
        }

        bundle_cores.sort_unstable();
        bundles.push(Bundle { cores: bundle_cores });
    }

    Ok(bundles)
}
