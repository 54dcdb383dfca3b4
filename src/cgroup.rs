// src/cgroup.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! cgroup tree management for the Run Supervisor (spec §4.7 step 1).
//! Supports both cgroup v1 (one mount per controller) and v2 (a single
//! unified hierarchy with controller delegation).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::constants::{CFS_PERIOD_US, CGROUP_V1_CONTROLLERS, CGROUP_V1_ROOT, CGROUP_V2_ROOT};
use crate::error::{CoreBenchError, Result};
use crate::types::{BankId, CoreId, ResourceLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

fn detect_version() -> CgroupVersion {
    if Path::new(CGROUP_V2_ROOT).join("cgroup.controllers").exists() {
        CgroupVersion::V2
    } else {
        CgroupVersion::V1
    }
}

fn to_io_err(stage: &str, e: std::io::Error) -> CoreBenchError {
    CoreBenchError::ContainerSetupFailure {
        stage: stage.to_string(),
        errno: e.raw_os_error().unwrap_or(-1),
    }
}

/// One run's exclusive cgroup subtree.
pub struct RunCgroup {
    pub version: CgroupVersion,
    /// v2: one unified path. v1: one path per controller.
    v2_path: Option<PathBuf>,
    v1_paths: Vec<(&'static str, PathBuf)>,
}

impl RunCgroup {
    /// Creates a fresh cgroup named `name` and writes the bundle's cores,
    /// bank set, and resource limits into the appropriate controller files.
    pub fn create(
        name: &str,
        cores: &[CoreId],
        banks: &[BankId],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        match detect_version() {
            CgroupVersion::V2 => Self::create_v2(name, cores, banks, limits),
            CgroupVersion::V1 => Self::create_v1(name, cores, banks, limits),
        }
    }

    fn create_v2(
        name: &str,
        cores: &[CoreId],
        banks: &[BankId],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        let root = Path::new(CGROUP_V2_ROOT);
        let subtree_control = root.join("cgroup.subtree_control");
        let _ = fs::write(&subtree_control, "+cpuset +cpu +memory +pids");

        let path = root.join(name);
        fs::create_dir_all(&path).map_err(|e| to_io_err("cgroup.create_v2.mkdir", e))?;

        write_cpuset(&path.join("cpuset.cpus"), cores)?;
        if !banks.is_empty() {
            write_bank_set(&path.join("cpuset.mems"), banks)?;
        }
        if let Some(cpu_seconds) = limits.cpu_seconds {
            write_cpu_max(&path.join("cpu.max"), cpu_seconds)?;
        }
        if let Some(mem) = limits.memory_bytes {
            fs::write(path.join("memory.max"), mem.to_string())
                .map_err(|e| to_io_err("cgroup.memory.max", e))?;
        }
        if let Some(count) = limits.file_count {
            fs::write(path.join("pids.max"), count.to_string())
                .map_err(|e| to_io_err("cgroup.pids.max", e))?;
        }

        debug!(path = %path.display(), "created cgroup v2 subtree");
        Ok(RunCgroup { version: CgroupVersion::V2, v2_path: Some(path), v1_paths: Vec::new() })
    }

    fn create_v1(
        name: &str,
        cores: &[CoreId],
        banks: &[BankId],
        limits: &ResourceLimits,
    ) -> Result<Self> {
        let mut paths = Vec::new();
        for &controller in CGROUP_V1_CONTROLLERS {
            let path = Path::new(CGROUP_V1_ROOT).join(controller).join(name);
            fs::create_dir_all(&path).map_err(|e| to_io_err("cgroup.create_v1.mkdir", e))?;
            paths.push((controller, path));
        }

        for (controller, path) in &paths {
            match *controller {
                "cpuset" => {
                    write_cpuset(&path.join("cpuset.cpus"), cores)?;
                    if !banks.is_empty() {
                        write_bank_set(&path.join("cpuset.mems"), banks)?;
                    } else {
                        fs::write(path.join("cpuset.mems"), "0").ok();
                    }
                }
                "cpu" => {
                    if let Some(cpu_seconds) = limits.cpu_seconds {
                        fs::write(path.join("cpu.cfs_period_us"), CFS_PERIOD_US.to_string())
                            .map_err(|e| to_io_err("cgroup.cpu.cfs_period_us", e))?;
                        let quota = cpu_seconds.saturating_mul(1_000_000);
                        fs::write(path.join("cpu.cfs_quota_us"), quota.to_string())
                            .map_err(|e| to_io_err("cgroup.cpu.cfs_quota_us", e))?;
                    }
                }
                "memory" => {
                    if let Some(mem) = limits.memory_bytes {
                        fs::write(path.join("memory.limit_in_bytes"), mem.to_string())
                            .map_err(|e| to_io_err("cgroup.memory.limit_in_bytes", e))?;
                    }
                }
                "pids" => {
                    if let Some(count) = limits.file_count {
                        fs::write(path.join("pids.max"), count.to_string())
                            .map_err(|e| to_io_err("cgroup.pids.max", e))?;
                    }
                }
                _ => {}
            }
        }

        debug!(name, "created cgroup v1 subtree across controllers");
        Ok(RunCgroup { version: CgroupVersion::V1, v2_path: None, v1_paths: paths })
    }

    fn controller_path(&self, controller: &str) -> Option<&PathBuf> {
        match self.version {
            CgroupVersion::V2 => self.v2_path.as_ref(),
            CgroupVersion::V1 => self.v1_paths.iter().find(|(c, _)| *c == controller).map(|(_, p)| p),
        }
    }

    /// Adds `pid` to this cgroup's process list.
    pub fn add_process(&self, pid: i32) -> Result<()> {
        match self.version {
            CgroupVersion::V2 => {
                if let Some(path) = &self.v2_path {
                    fs::write(path.join("cgroup.procs"), pid.to_string())
                        .map_err(|e| to_io_err("cgroup.procs", e))?;
                }
            }
            CgroupVersion::V1 => {
                for (_, path) in &self.v1_paths {
                    fs::write(path.join("cgroup.procs"), pid.to_string())
                        .map_err(|e| to_io_err("cgroup.procs", e))?;
                }
            }
        }
        Ok(())
    }

    /// Freezes every process in the cgroup so it can be killed without
    /// racing a fork (spec §4.7 step 4, watchdog safe-kill protocol).
    pub fn freeze(&self) -> Result<()> {
        self.write_freezer_state("FROZEN")
    }

    pub fn thaw(&self) -> Result<()> {
        self.write_freezer_state("THAWED")
    }

    fn write_freezer_state(&self, state: &str) -> Result<()> {
        let path = match self.version {
            CgroupVersion::V2 => self.v2_path.clone(),
            CgroupVersion::V1 => self.controller_path("freezer").cloned(),
        };
        let Some(path) = path else { return Ok(()) };
        let file = match self.version {
            CgroupVersion::V2 => path.join("cgroup.freeze"),
            CgroupVersion::V1 => path.join("freezer.state"),
        };
        let value = match self.version {
            CgroupVersion::V2 if state == "FROZEN" => "1",
            CgroupVersion::V2 => "0",
            CgroupVersion::V1 => state,
            _ => state,
        };
        fs::write(&file, value).map_err(|e| to_io_err("cgroup.freezer", e))
    }

    /// Peak memory usage recorded for this run.
    pub fn peak_memory_bytes(&self) -> u64 {
        let path = match self.controller_path("memory").or_else(|| self.v2_path.as_ref()) {
            Some(p) => p,
            None => return 0,
        };
        for file in ["memory.max_usage_in_bytes", "memory.peak"] {
            if let Ok(raw) = fs::read_to_string(path.join(file)) {
                if let Ok(v) = raw.trim().parse::<u64>() {
                    return v;
                }
            }
        }
        0
    }

    /// Total CPU time (user + kernel) consumed, in seconds.
    pub fn cpu_seconds_used(&self) -> f64 {
        let path = match self.controller_path("cpuacct").or(self.controller_path("cpu")).or(self.v2_path.as_ref()) {
            Some(p) => p,
            None => return 0.0,
        };
        if let Ok(raw) = fs::read_to_string(path.join("cpuacct.usage")) {
            if let Ok(ns) = raw.trim().parse::<u64>() {
                return ns as f64 / 1_000_000_000.0;
            }
        }
        if let Ok(raw) = fs::read_to_string(path.join("cpu.stat")) {
            for line in raw.lines() {
                if let Some(usec) = line.strip_prefix("usage_usec ") {
                    if let Ok(usec) = usec.trim().parse::<u64>() {
                        return usec as f64 / 1_000_000.0;
                    }
                }
            }
        }
        0.0
    }

    /// Whether the kernel OOM-killed a process in this cgroup.
    pub fn was_oom_killed(&self) -> bool {
        let path = match self.controller_path("memory").or_else(|| self.v2_path.as_ref()) {
            Some(p) => p,
            None => return false,
        };
        for file in ["memory.events", "memory.oom_control"] {
            if let Ok(raw) = fs::read_to_string(path.join(file)) {
                if raw.lines().any(|l| {
                    (l.starts_with("oom_kill") || l.starts_with("oom "))
                        && l.split_whitespace().nth(1).and_then(|n| n.parse::<u64>().ok()).unwrap_or(0) > 0
                }) {
                    return true;
                }
            }
        }
        false
    }

    /// PIDs currently listed in this cgroup's process list. Since children
    /// inherit their parent's cgroup membership across `fork`, this reaches
    /// processes born after the one originally added with [`add_process`].
    pub fn member_pids(&self) -> Vec<i32> {
        let path = match self.version {
            CgroupVersion::V2 => self.v2_path.as_ref(),
            CgroupVersion::V1 => self.v1_paths.first().map(|(_, p)| p),
        };
        let Some(path) = path else { return Vec::new() };
        fs::read_to_string(path.join("cgroup.procs"))
            .map(|raw| raw.lines().filter_map(|l| l.trim().parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Kills every remaining process and removes the cgroup directories.
    pub fn teardown(self) -> Result<()> {
        let _ = self.thaw();
        let paths: Vec<PathBuf> = match self.version {
            CgroupVersion::V2 => self.v2_path.iter().cloned().collect(),
            CgroupVersion::V1 => self.v1_paths.iter().map(|(_, p)| p.clone()).collect(),
        };
        for path in paths {
            if let Err(e) = fs::remove_dir(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove cgroup directory during teardown");
            }
        }
        Ok(())
    }
}

fn format_cpu_list(cores: &[CoreId]) -> String {
    let mut ids: Vec<u32> = cores.iter().map(|c| c.0).collect();
    ids.sort_unstable();
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}

fn write_cpuset(path: &Path, cores: &[CoreId]) -> Result<()> {
    fs::write(path, format_cpu_list(cores)).map_err(|e| to_io_err("cgroup.cpuset.cpus", e))
}

fn write_bank_set(path: &Path, banks: &[BankId]) -> Result<()> {
    let mut ids: Vec<u32> = banks.iter().map(|b| b.0).collect();
    ids.sort_unstable();
    let list = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",");
    fs::write(path, list).map_err(|e| to_io_err("cgroup.cpuset.mems", e))
}

fn write_cpu_max(path: &Path, cpu_seconds: u64) -> Result<()> {
    let quota = cpu_seconds.saturating_mul(CFS_PERIOD_US);
    fs::write(path, format!("{quota} {CFS_PERIOD_US}")).map_err(|e| to_io_err("cgroup.cpu.max", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_cpu_list_sorted() {
        let cores = vec![CoreId(3), CoreId(1), CoreId(2)];
        assert_eq!(format_cpu_list(&cores), "1,2,3");
    }
}
