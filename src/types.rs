// src/types.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data model: virtual cores, hierarchy levels, bundles, and the
//! request/result types exchanged with the worker pool.

use std::collections::HashMap;
use std::path::PathBuf;

/// A logical CPU id, as reported by `/sys/devices/system/cpu/cpuN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(pub u32);

/// Identifier of a region within one hierarchy level. Region ids are only
/// unique within their level, not across levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u64);

/// A NUMA memory bank id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BankId(pub u32);

/// Opaque identifier tagging a dispatched run, assigned in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

/// One core's position in every hierarchy level, plus its raw topology facts.
///
/// Immutable after construction; the allocator works against the
/// [`crate::topology::hierarchy::Hierarchy`] levels, not against this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualCore {
    pub id: CoreId,
    /// `regions[k]` is this core's region id at hierarchy level `k`.
    pub regions: Vec<RegionId>,
    pub max_freq_khz: u64,
    pub numa_node: Option<RegionId>,
}

/// One layer of the hierarchy: a partition of active cores into regions.
pub type HierarchyLevel = HashMap<RegionId, Vec<CoreId>>;

/// Ordered sequence of hierarchy levels, index 0 is the siblings level.
pub type Hierarchy = Vec<HierarchyLevel>;

/// A disjoint set of cores assigned to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub cores: Vec<CoreId>,
}

/// Sorted set of NUMA banks reachable from a bundle, intersected with the
/// process's allowed bank set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankAssignment {
    pub banks: Vec<BankId>,
}

/// Per-run resource limits. Every field is optional, meaning "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_seconds: Option<u64>,
    pub wall_seconds: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub core_limit: Option<u32>,
    pub file_count: Option<u64>,
    pub file_bytes: Option<u64>,
}

/// Per-path filesystem visibility policy inside the container.
///
/// `HIDDEN` mounts tmpfs over the path; `ReadOnly` bind-mounts it read-only;
/// `Overlay` layers a private upper/work pair over a read-only lower; `Full`
/// bind-mounts it read-write. Longer configured paths override shorter ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirMode {
    Hidden,
    ReadOnly,
    Overlay,
    Full,
}

/// Per-path `DirMode` overrides, keyed by absolute host path.
pub type MountPolicy = HashMap<PathBuf, DirMode>;

/// One run to execute under the container + supervisor.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub command: Vec<String>,
    pub input_paths: Vec<PathBuf>,
    pub output_paths: Vec<PathBuf>,
    pub limits: ResourceLimits,
    pub mount_policy: MountPolicy,
    pub network_allowed: bool,
}

/// Non-fatal outcome of a single run. These are reported through
/// [`RunResult`], not through [`crate::error::CoreBenchError`] — a failing
/// tool is data, not a pool failure (spec §7 propagation policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Exited { code: i32 },
    Signaled { signal: i32 },
    Timeout,
    OutOfMemory,
    FileLimitExceeded,
}

/// Measurement record produced by the supervisor for one run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub cpu_seconds_used: f64,
    pub wall_seconds_used: f64,
    pub peak_memory_bytes: u64,
    pub was_oom: bool,
    pub was_timeout: bool,
    pub energy_joules: Option<f64>,
    pub created_files: Vec<PathBuf>,
}

/// Emitted once per pool start, independent of any individual run.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub cpu_model: String,
    pub core_count: usize,
    pub kernel_version: String,
    pub memory_bytes: u64,
}
