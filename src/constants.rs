// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Frequency filter threshold from `resources.py::frequency_filter`: cores whose
/// max frequency falls below this fraction of the fastest core are excluded.
pub const FREQUENCY_FILTER_THRESHOLD: f64 = 0.95;

/// cgroup v1 controller mount points, relative to the cgroup v1 root.
pub const CGROUP_V1_CONTROLLERS: &[&str] =
    &["cpuset", "cpu", "memory", "freezer", "pids"];

/// Default cgroup v1 hierarchy root.
pub const CGROUP_V1_ROOT: &str = "/sys/fs/cgroup";

/// Unified cgroup v2 mount point.
pub const CGROUP_V2_ROOT: &str = "/sys/fs/cgroup";

/// sysctl path gating unprivileged user namespace creation on Debian/Ubuntu kernels.
pub const SYSCTL_UNPRIVILEGED_USERNS_CLONE: &str =
    "/proc/sys/kernel/unprivileged_userns_clone";

/// sysctl path capping the number of nested user namespaces.
pub const SYSCTL_MAX_USER_NAMESPACES: &str = "/proc/sys/user/max_user_namespaces";

/// tmpfs size argument used for the container's overlay base, sized to the full
/// amount of memory available to the run (see `container::mount`).
pub const CONTAINER_TMPFS_SIZE_OPT: &str = "size=100%";

/// Default cgroup period for CFS bandwidth control, in microseconds.
pub const CFS_PERIOD_US: u64 = 100_000;
