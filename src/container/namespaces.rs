// src/container/namespaces.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Namespace unshare/fork protocol (spec §4.6), grounded on
//! `containerized_tool.py::_init_container`'s exact namespace-flag set and
//! errno-disambiguation logic.

use std::fs;

use nix::sched::{unshare, CloneFlags};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::debug;

use crate::constants::{SYSCTL_MAX_USER_NAMESPACES, SYSCTL_UNPRIVILEGED_USERNS_CLONE};
use crate::error::{CoreBenchError, Result};

/// Who calls into `run_in_container`: a process the Run Supervisor already
/// forked just for this container (`CloneChild`), or a worker thread's
/// shared process unsharing itself directly (`UnshareSelf`, used by tests
/// that call the container entry point without a supervisor). Both still
/// fork once more after the unshare, since `CLONE_NEWPID` never moves the
/// caller into the namespace it just created (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    CloneChild,
    UnshareSelf,
}

fn namespace_flags(network_allowed: bool) -> CloneFlags {
    let mut flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWUSER
        | CloneFlags::CLONE_NEWPID;
    if !network_allowed {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    flags
}

fn sysctl_value(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Translates an `unshare(2)` failure into the dedicated error kinds spec §4.6
/// calls for. Ubuntu-family kernels report `ENOSPC` and CentOS-family kernels
/// report `EINVAL` for the identical "user namespaces capped" condition, so
/// both are checked against the same sysctl.
fn translate_unshare_error(e: nix::Error) -> CoreBenchError {
    match e {
        nix::Error::EPERM => {
            if sysctl_value(SYSCTL_UNPRIVILEGED_USERNS_CLONE).as_deref() == Some("0") {
                CoreBenchError::UserNamespaceForbidden {
                    sysctl_path: SYSCTL_UNPRIVILEGED_USERNS_CLONE.to_string(),
                    required_value: "1".to_string(),
                }
            } else {
                CoreBenchError::AppArmorUserNamespaceRestriction
            }
        }
        nix::Error::ENOSPC | nix::Error::EINVAL => {
            if sysctl_value(SYSCTL_MAX_USER_NAMESPACES).as_deref() == Some("0") {
                CoreBenchError::UserNamespaceForbidden {
                    sysctl_path: SYSCTL_MAX_USER_NAMESPACES.to_string(),
                    required_value: "a positive number".to_string(),
                }
            } else {
                CoreBenchError::ContainerSetupFailure {
                    stage: "unshare".to_string(),
                    errno: e as i32,
                }
            }
        }
        other => CoreBenchError::ContainerSetupFailure {
            stage: "unshare".to_string(),
            errno: other as i32,
        },
    }
}

/// Unshares user/mount/uts/ipc/pid (and optionally net) namespaces in the
/// calling process.
pub fn unshare_namespaces(network_allowed: bool) -> Result<()> {
    unshare(namespace_flags(network_allowed)).map_err(translate_unshare_error)
}

/// Writes the UID or GID map for the current process's user namespace,
/// mapping a single host id to a single container id. `setgroups` must be
/// set to `deny` before an unprivileged `gid_map` write succeeds.
pub fn write_id_map(map_path: &str, host_id: u32, container_id: u32) -> Result<()> {
    if map_path.ends_with("gid_map") {
        let _ = fs::write("/proc/self/setgroups", "deny");
    }
    fs::write(map_path, format!("{container_id} {host_id} 1")).map_err(|e| {
        CoreBenchError::ContainerSetupFailure {
            stage: format!("write {map_path}"),
            errno: e.raw_os_error().unwrap_or(-1),
        }
    })
}

/// Identity-maps the current UID/GID into the new user namespace.
pub fn setup_identity_user_mapping() -> Result<()> {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    write_id_map("/proc/self/uid_map", uid, uid)?;
    write_id_map("/proc/self/gid_map", gid, gid)
}

/// Maps the host UID/GID to a fixed container UID/GID (system-config mode).
pub fn setup_system_config_user_mapping(container_uid: u32, container_gid: u32) -> Result<()> {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    write_id_map("/proc/self/uid_map", uid, container_uid)?;
    write_id_map("/proc/self/gid_map", gid, container_gid)
}

pub fn set_hostname(name: &str) -> Result<()> {
    nix::unistd::sethostname(name).map_err(|e| CoreBenchError::ContainerSetupFailure {
        stage: "sethostname".to_string(),
        errno: e as i32,
    })
}

/// Layout matches the kernel's `struct ifreq` for the flag-accessing union
/// members (`ifr_flags`): name, then a `c_short`, padded out to the union's
/// full size so the kernel doesn't read past the allocation.
#[repr(C)]
struct IfReqFlags {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

/// Brings up `lo`, equivalent to `ip link set lo up`: opens an `AF_INET`
/// socket, reads the interface's current flags, ORs in `IFF_UP`, and writes
/// them back via `SIOCSIFFLAGS`. Only needed for a run that got its own
/// fresh, isolated net namespace, whose loopback starts down.
pub fn bring_up_loopback() -> Result<()> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(CoreBenchError::ContainerSetupFailure {
            stage: "loopback.socket".to_string(),
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        });
    }

    let mut req = IfReqFlags { ifr_name: [0; libc::IFNAMSIZ], ifr_flags: 0, _padding: [0; 22] };
    for (dst, src) in req.ifr_name.iter_mut().zip(b"lo\0".iter()) {
        *dst = *src as libc::c_char;
    }

    let result = (|| {
        if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut req) } < 0 {
            return Err(("loopback.SIOCGIFFLAGS", std::io::Error::last_os_error()));
        }
        req.ifr_flags |= libc::IFF_UP as libc::c_short;
        if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &req) } < 0 {
            return Err(("loopback.SIOCSIFFLAGS", std::io::Error::last_os_error()));
        }
        Ok(())
    })();

    unsafe { libc::close(fd) };

    result.map_err(|(stage, e)| CoreBenchError::ContainerSetupFailure {
        stage: stage.to_string(),
        errno: e.raw_os_error().unwrap_or(-1),
    })?;
    debug!("loopback interface activated");
    Ok(())
}

/// Implements `unshare-self` (spec §4.6): the calling process unshares
/// everything except PID here, then forks; only the child ends up inside the
/// new PID namespace PID 1. The parent blocks until the child exits.
///
/// `child_fn` runs in the child, already inside the new PID namespace; its
/// return value becomes the child's exit code.
pub fn enter_via_unshare_self(child_fn: impl FnOnce() -> i32) -> Result<()> {
    match unsafe { fork() }.map_err(|e| CoreBenchError::ContainerSetupFailure {
        stage: "fork".to_string(),
        errno: e as i32,
    })? {
        ForkResult::Parent { child } => {
            reap(child)?;
            Ok(())
        }
        ForkResult::Child => {
            let code = child_fn();
            std::process::exit(code);
        }
    }
}

fn reap(child: Pid) -> Result<()> {
    match waitpid(child, None) {
        Ok(WaitStatus::Exited(_, code)) => {
            debug!(pid = child.as_raw(), code, "container init process exited");
            Ok(())
        }
        Ok(WaitStatus::Signaled(_, signal, _)) => {
            debug!(pid = child.as_raw(), ?signal, "container init process was signaled");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) => Err(CoreBenchError::ContainerSetupFailure {
            stage: "waitpid".to_string(),
            errno: e as i32,
        }),
    }
}
