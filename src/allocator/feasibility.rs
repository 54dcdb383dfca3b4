// src/allocator/feasibility.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Feasibility checking and the level/size computations from spec §4.3.2.

use crate::error::{CoreBenchError, Result};
use crate::types::Hierarchy;

/// Output of a passed feasibility check: everything the distribution loop
/// needs to place cores into bundles.
#[derive(Debug, Clone, Copy)]
pub struct FeasibilityPlan {
    pub chosen_level: usize,
    pub core_limit_rounded: usize,
    pub sub_units_per_run: usize,
}

/// `C* = ceil(C/s) * s` — round up to a whole number of physical cores.
pub fn core_limit_rounded_up(core_limit: usize, siblings_per_core: usize) -> usize {
    if siblings_per_core == 0 {
        return core_limit;
    }
    ((core_limit + siblings_per_core - 1) / siblings_per_core) * siblings_per_core
}

fn region_size(level: &std::collections::HashMap<crate::types::RegionId, Vec<crate::types::CoreId>>) -> usize {
    level.values().next().map(|v| v.len()).unwrap_or(0)
}

/// Lowest hierarchy level whose region size is >= `core_limit_rounded`.
pub fn chosen_level(hierarchy: &Hierarchy, core_limit_rounded: usize) -> Result<usize> {
    hierarchy
        .iter()
        .position(|level| region_size(level) >= core_limit_rounded)
        .ok_or_else(|| CoreBenchError::InfeasibleAllocation {
            reason: format!(
                "no hierarchy level has a region large enough to hold {core_limit_rounded} cores"
            ),
            suggested_workers: None,
        })
}

/// `sub = ceil(C* / |region at chosen-1|)` — sub-regions consumed per bundle.
pub fn sub_units_per_run(hierarchy: &Hierarchy, chosen: usize, core_limit_rounded: usize) -> usize {
    if chosen == 0 {
        return 1;
    }
    let below = region_size(&hierarchy[chosen - 1]);
    if below == 0 {
        return 1;
    }
    (core_limit_rounded + below - 1) / below
}

/// Runs all four feasibility checks from spec §4.3.2, returning a plan on
/// success.
pub fn check(
    hierarchy: &Hierarchy,
    active_cores: usize,
    core_limit: usize,
    workers: usize,
    siblings_per_core: usize,
) -> Result<FeasibilityPlan> {
    if core_limit > active_cores {
        return Err(CoreBenchError::InfeasibleAllocation {
            reason: format!(
                "requested core_limit {core_limit} exceeds the {active_cores} active cores"
            ),
            suggested_workers: None,
        });
    }
    if core_limit * workers > active_cores {
        let suggested = (active_cores / core_limit.max(1)).max(1) as u32;
        return Err(CoreBenchError::InfeasibleAllocation {
            reason: format!(
                "core_limit {core_limit} * workers {workers} exceeds the {active_cores} active cores"
            ),
            suggested_workers: Some(suggested),
        });
    }

    let core_limit_rounded = core_limit_rounded_up(core_limit, siblings_per_core);
    let chosen = chosen_level(hierarchy, core_limit_rounded)?;
    let region_at_chosen = region_size(&hierarchy[chosen]);
    let regions_at_chosen = hierarchy[chosen].len();
    let runs_per_unit = region_at_chosen / core_limit_rounded.max(1);

    if regions_at_chosen * runs_per_unit < workers {
        return Err(CoreBenchError::InfeasibleAllocation {
            reason: format!(
                "only {regions_at_chosen} regions of size {region_at_chosen} at the chosen level, \
                 yielding {runs_per_unit} run(s) each, too few for {workers} workers"
            ),
            suggested_workers: Some((regions_at_chosen * runs_per_unit) as u32),
        });
    }

    let sub = sub_units_per_run(hierarchy, chosen, core_limit_rounded);
    if chosen > 0 {
        let regions_below = hierarchy[chosen - 1].len();
        if sub > 0 && regions_below / sub < workers {
            return Err(CoreBenchError::InfeasibleAllocation {
                reason: format!(
                    "only {regions_below} sub-regions below the chosen level, needing {sub} per \
                     bundle, too few for {workers} workers"
                ),
                suggested_workers: Some((regions_below / sub.max(1)) as u32),
            });
        }
    }

    Ok(FeasibilityPlan {
        chosen_level: chosen,
        core_limit_rounded,
        sub_units_per_run: sub,
    })
}
