// src/topology/mod.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topology Reader + Hierarchy Model (spec §4.1, §4.2).

pub mod hierarchy;
pub mod reader;
pub mod sysfs;

use crate::error::Result;
use crate::types::{CoreId, Hierarchy, VirtualCore};

/// Full topology snapshot: the hierarchy plus per-core metadata, built once
/// per process start and treated as read-only thereafter (the allocator
/// takes an owned, mutable copy).
#[derive(Debug, Clone)]
pub struct Topology {
    pub hierarchy: Hierarchy,
    pub cores: Vec<VirtualCore>,
}

impl Topology {
    /// Detects the machine's topology, optionally restricted to an explicit
    /// core set (intersected with whatever the cgroup already allows).
    pub fn detect(explicit_core_set: Option<&[CoreId]>) -> Result<Self> {
        let facts = reader::detect(explicit_core_set)?;
        let (hierarchy, cores) = hierarchy::build(&facts)?;
        Ok(Topology { hierarchy, cores })
    }

    pub fn active_core_count(&self) -> usize {
        self.cores.len()
    }
}
