// src/container/mount.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Overlay filesystem construction (spec §4.6 steps 1-4, 7-8), grounded on
//! `containerized_tool.py::_setup_container_filesystem`.

use std::fs;
use std::path::{Path, PathBuf};

use nix::mount::{mount, MsFlags};
use tracing::debug;

use crate::constants::CONTAINER_TMPFS_SIZE_OPT;
use crate::error::{CoreBenchError, Result};
use crate::types::{DirMode, MountPolicy};

fn to_err(stage: &str, e: nix::Error) -> CoreBenchError {
    CoreBenchError::ContainerSetupFailure { stage: stage.to_string(), errno: e as i32 }
}

/// Mounts a tmpfs at `temp_dir`, sized at 100% of memory — overlay storage
/// for the run (spec §4.6 step 1).
pub fn mount_run_tmpfs(temp_dir: &Path) -> Result<()> {
    fs::create_dir_all(temp_dir).map_err(|e| CoreBenchError::ContainerSetupFailure {
        stage: "mkdir temp_dir".to_string(),
        errno: e.raw_os_error().unwrap_or(-1),
    })?;
    mount(
        Some("tmpfs"),
        temp_dir,
        Some("tmpfs"),
        MsFlags::empty(),
        Some(CONTAINER_TMPFS_SIZE_OPT),
    )
    .map_err(|e| to_err("mount tmpfs temp_dir", e))
}

/// Creates `mount_base`, `upper`, `work` under `temp_dir` (spec §4.6 step 2).
pub fn make_overlay_dirs(temp_dir: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let mount_base = temp_dir.join("mount_base");
    let upper = temp_dir.join("upper");
    let work = temp_dir.join("work");
    for dir in [&mount_base, &upper, &work] {
        fs::create_dir_all(dir).map_err(|e| CoreBenchError::ContainerSetupFailure {
            stage: format!("mkdir {}", dir.display()),
            errno: e.raw_os_error().unwrap_or(-1),
        })?;
    }
    Ok((mount_base, upper, work))
}

fn mirrored_path(mount_base: &Path, host_path: &Path) -> PathBuf {
    let relative = host_path.strip_prefix("/").unwrap_or(host_path);
    mount_base.join(relative)
}

/// Duplicates the host mount hierarchy into `mount_base` per the DirMode
/// policy. Longer paths are applied after shorter ones so they override
/// them (spec §4.6 step 3).
pub fn duplicate_mount_hierarchy(
    mount_base: &Path,
    temp_dir: &Path,
    policy: &MountPolicy,
) -> Result<()> {
    let mut paths: Vec<&PathBuf> = policy.keys().collect();
    paths.sort_by_key(|p| p.as_os_str().len());

    for host_path in paths {
        let mode = policy[host_path];
        let target = mirrored_path(mount_base, host_path);
        fs::create_dir_all(&target).map_err(|e| CoreBenchError::ContainerSetupFailure {
            stage: format!("mkdir {}", target.display()),
            errno: e.raw_os_error().unwrap_or(-1),
        })?;

        match mode {
            DirMode::Hidden => {
                mount(Some("tmpfs"), &target, Some("tmpfs"), MsFlags::empty(), None::<&str>)
                    .map_err(|e| to_err("mount hidden", e))?;
            }
            DirMode::ReadOnly => {
                mount(
                    Some(host_path.as_path()),
                    &target,
                    None::<&str>,
                    MsFlags::MS_BIND,
                    None::<&str>,
                )
                .map_err(|e| to_err("bind mount read_only", e))?;
                mount(
                    None::<&str>,
                    &target,
                    None::<&str>,
                    MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                    None::<&str>,
                )
                .map_err(|e| to_err("remount read_only", e))?;
            }
            DirMode::Overlay => {
                // Private upper/work pair per path, not one global pair, so
                // two OVERLAY paths never share copy-up state.
                let slot = target
                    .strip_prefix(mount_base)
                    .unwrap_or(&target)
                    .to_string_lossy()
                    .replace('/', "_");
                let upper = temp_dir.join("overlay-upper").join(&slot);
                let work = temp_dir.join("overlay-work").join(&slot);
                fs::create_dir_all(&upper).ok();
                fs::create_dir_all(&work).ok();
                let opts = format!(
                    "lowerdir={},upperdir={},workdir={}",
                    host_path.display(),
                    upper.display(),
                    work.display()
                );
                mount(Some("overlay"), &target, Some("overlay"), MsFlags::empty(), Some(opts.as_str()))
                    .map_err(|e| to_err("mount overlay", e))?;
            }
            DirMode::Full => {
                mount(
                    Some(host_path.as_path()),
                    &target,
                    None::<&str>,
                    MsFlags::MS_BIND,
                    None::<&str>,
                )
                .map_err(|e| to_err("bind mount full", e))?;
            }
        }
        debug!(host = %host_path.display(), mode = ?mode, "mounted path into container");
    }
    Ok(())
}

/// Ensures a tmpfs on `/dev/shm` and `/run/shm` if they exist on the host
/// and aren't already covered by an explicit policy entry (spec §4.6 step 4).
pub fn ensure_shm_tmpfs(mount_base: &Path, policy: &MountPolicy) -> Result<()> {
    for shm in ["/dev/shm", "/run/shm"] {
        let host = Path::new(shm);
        if !host.exists() || policy.contains_key(host) {
            continue;
        }
        let target = mirrored_path(mount_base, host);
        fs::create_dir_all(&target).ok();
        mount(Some("tmpfs"), &target, Some("tmpfs"), MsFlags::empty(), None::<&str>)
            .map_err(|e| to_err("mount shm tmpfs", e))?;
    }
    Ok(())
}

/// `chroot`s into `mount_base` and returns to the original working
/// directory (spec §4.6 step 7).
pub fn chroot_into(mount_base: &Path, original_cwd: &Path) -> Result<()> {
    nix::unistd::chroot(mount_base).map_err(|e| to_err("chroot", e))?;
    nix::unistd::chdir(original_cwd).map_err(|e| to_err("chdir", e))
}

/// Mounts a fresh `/proc`, only possible once the PID namespace has been
/// entered (spec §4.6 step 8).
pub fn mount_fresh_proc() -> Result<()> {
    mount(Some("proc"), Path::new("/proc"), Some("proc"), MsFlags::empty(), None::<&str>)
        .map_err(|e| to_err("mount proc", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrored_path_strips_leading_slash() {
        let base = Path::new("/tmp/mount_base");
        assert_eq!(mirrored_path(base, Path::new("/usr/bin")), base.join("usr/bin"));
    }
}
