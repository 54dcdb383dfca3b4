// src/container/mod.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container Setup (spec §4.6): orchestrates the full namespace/mount/
//! capability/seccomp sequence and execs the run's command as the
//! container's init process.

pub mod capabilities;
pub mod mount;
pub mod namespaces;
pub mod seccomp;

use std::ffi::CString;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{CoreBenchError, Result};
use crate::types::RunRequest;

pub use namespaces::EntryMode;

/// System-config mode synthesizes `/etc/passwd`-style identity files and
/// sets a fixed container UID/GID/hostname; otherwise the host identity is
/// mapped straight through (spec §4.6 step 5-6).
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub container_uid: u32,
    pub container_gid: u32,
    pub hostname: String,
}

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub temp_dir: PathBuf,
    pub original_cwd: PathBuf,
    pub entry_mode: EntryMode,
    pub system_config: Option<SystemConfig>,
}

fn synthesize_system_files(mount_base: &Path, config: &SystemConfig) -> Result<()> {
    let etc = mount_base.join("etc");
    std::fs::create_dir_all(&etc).map_err(|e| CoreBenchError::ContainerSetupFailure {
        stage: "mkdir /etc".to_string(),
        errno: e.raw_os_error().unwrap_or(-1),
    })?;
    let write = |name: &str, contents: String| {
        std::fs::write(etc.join(name), contents).map_err(|e| CoreBenchError::ContainerSetupFailure {
            stage: format!("write /etc/{name}"),
            errno: e.raw_os_error().unwrap_or(-1),
        })
    };
    write(
        "passwd",
        format!("root:x:0:0:root:/root:/bin/sh\nbenchmark:x:{}:{}:benchmark:/:/bin/sh\n", config.container_uid, config.container_gid),
    )?;
    write("group", format!("root:x:0:\nbenchmark:x:{}:\n", config.container_gid))?;
    write("nsswitch.conf", "passwd: files\ngroup: files\nhosts: files dns\n".to_string())?;
    write("hostname", format!("{}\n", config.hostname))
}

/// Runs the full container setup sequence in the calling (child) process,
/// then `execvp`s the run's command, replacing the process image. On
/// success this function never returns.
fn exec_inside_container(config: &ContainerConfig, run: &RunRequest) -> Result<()> {
    mount::mount_run_tmpfs(&config.temp_dir)?;
    let (mount_base, _upper, _work) = mount::make_overlay_dirs(&config.temp_dir)?;
    mount::duplicate_mount_hierarchy(&mount_base, &config.temp_dir, &run.mount_policy)?;
    mount::ensure_shm_tmpfs(&mount_base, &run.mount_policy)?;

    if let Some(system_config) = &config.system_config {
        synthesize_system_files(&mount_base, system_config)?;
        namespaces::set_hostname(&system_config.hostname)?;
        namespaces::setup_system_config_user_mapping(
            system_config.container_uid,
            system_config.container_gid,
        )?;
    } else {
        namespaces::setup_identity_user_mapping()?;
    }

    if !run.network_allowed {
        // A denied run still gets its own net namespace (see
        // `namespaces::namespace_flags`); an allowed run reuses the host's,
        // whose loopback is already up.
        namespaces::bring_up_loopback()?;
    }

    mount::chroot_into(&mount_base, &config.original_cwd)?;
    mount::mount_fresh_proc()?;

    capabilities::drop_all_capabilities()?;
    capabilities::lock_down_process()?;

    let filter = seccomp::build_filter()?;
    seccomp::apply_filter(&filter)?;

    let program =
        CString::new(run.command[0].clone()).map_err(|_| CoreBenchError::ContainerSetupFailure {
            stage: "exec.argv0".to_string(),
            errno: -1,
        })?;
    let argv: Vec<CString> = run
        .command
        .iter()
        .map(|s| CString::new(s.clone()).unwrap_or_default())
        .collect();

    info!(argv = ?run.command, "execing tool inside container");
    nix::unistd::execvp(&program, &argv).map_err(|e| CoreBenchError::ContainerSetupFailure {
        stage: "execvp".to_string(),
        errno: e as i32,
    })?;
    unreachable!("execvp only returns on error, which is handled above");
}

/// Sets up and enters the container for one run, returning once the tool's
/// process has exited (spec §4.6).
///
/// `unshare(CLONE_NEWPID)` never moves the calling process into the new PID
/// namespace — only a process forked afterward lands there as PID 1. That
/// holds regardless of `entry_mode`, so both modes fork again here via
/// `enter_via_unshare_self`; `entry_mode` only changes whether the caller
/// already runs in a process dedicated to this one container (`CloneChild`,
/// the Run Supervisor's case) or is a shared worker thread's process doing
/// the unshare itself (`UnshareSelf`, used directly by tests).
pub fn run_in_container(config: &ContainerConfig, run: &RunRequest) -> Result<()> {
    namespaces::unshare_namespaces(run.network_allowed)?;

    let mode = config.entry_mode;
    let config = config.clone();
    let run = run.clone();
    namespaces::enter_via_unshare_self(move || match exec_inside_container(&config, &run) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, ?mode, "container setup failed after entering namespaces");
            127
        }
    })
}
