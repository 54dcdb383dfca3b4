// src/container/seccomp.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Seccomp deny-list filter (spec §4.6 step 10), adapted from an
//! allow-by-default jailer filter: here the default action is Allow and a
//! fixed list of dangerous syscalls is blocked instead.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{CoreBenchError, Result};

/// Syscalls blocked unconditionally: they can re-open the very boundaries
/// the container just built (new mount namespaces, overlay teardown,
/// kernel-module loading, keyring manipulation).
const BLOCKED_SYSCALLS: &[&str] = &[
    "mount",
    "umount2",
    "pivot_root",
    "keyctl",
    "add_key",
    "request_key",
    "init_module",
    "finit_module",
    "delete_module",
    "ptrace",
];

/// Flag bits that make `clone`/`clone3` dangerous: re-entering a fresh set
/// of namespaces from inside the container would undo the isolation.
const CLONE_NS_FLAGS: u64 = (libc::CLONE_NEWUSER
    | libc::CLONE_NEWNS
    | libc::CLONE_NEWPID
    | libc::CLONE_NEWUTS
    | libc::CLONE_NEWNET
    | libc::CLONE_NEWIPC) as u64;

fn syscall_name_to_nr(name: &str) -> Option<i64> {
    match name {
        "mount" => Some(libc::SYS_mount),
        "umount2" => Some(libc::SYS_umount2),
        "pivot_root" => Some(libc::SYS_pivot_root),
        "keyctl" => Some(libc::SYS_keyctl),
        "add_key" => Some(libc::SYS_add_key),
        "request_key" => Some(libc::SYS_request_key),
        "init_module" => Some(libc::SYS_init_module),
        "finit_module" => Some(libc::SYS_finit_module),
        "delete_module" => Some(libc::SYS_delete_module),
        "ptrace" => Some(libc::SYS_ptrace),
        "clone" => Some(libc::SYS_clone),
        _ => None,
    }
}

#[cfg(target_arch = "x86_64")]
fn target_arch() -> seccompiler::TargetArch {
    seccompiler::TargetArch::x86_64
}

#[cfg(target_arch = "aarch64")]
fn target_arch() -> seccompiler::TargetArch {
    seccompiler::TargetArch::aarch64
}

/// Builds the BPF program implementing the deny-list.
pub fn build_filter() -> Result<seccompiler::BpfProgram> {
    use seccompiler::{SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter, SeccompRule};

    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    for &name in BLOCKED_SYSCALLS {
        if let Some(nr) = syscall_name_to_nr(name) {
            rules.insert(nr, vec![]);
        }
    }

    if let Some(clone_nr) = syscall_name_to_nr("clone") {
        let condition = SeccompCondition::new(
            0,
            SeccompCmpArgLen::Qword,
            SeccompCmpOp::MaskedEq(CLONE_NS_FLAGS),
            CLONE_NS_FLAGS,
        )
        .map_err(|_| CoreBenchError::ContainerSetupFailure {
            stage: "seccomp.clone_condition".to_string(),
            errno: -1,
        })?;
        let rule = SeccompRule::new(vec![condition]).map_err(|_| CoreBenchError::ContainerSetupFailure {
            stage: "seccomp.clone_rule".to_string(),
            errno: -1,
        })?;
        rules.insert(clone_nr, vec![rule]);
    }

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        target_arch(),
    )
    .map_err(|_| CoreBenchError::ContainerSetupFailure {
        stage: "seccomp.build_filter".to_string(),
        errno: -1,
    })?;

    filter.try_into().map_err(|_| CoreBenchError::ContainerSetupFailure {
        stage: "seccomp.compile_bpf".to_string(),
        errno: -1,
    })
}

/// Installs the filter in the calling thread.
pub fn apply_filter(program: &seccompiler::BpfProgram) -> Result<()> {
    seccompiler::apply_filter(program).map_err(|_| CoreBenchError::ContainerSetupFailure {
        stage: "seccomp.apply_filter".to_string(),
        errno: -1,
    })?;
    debug!("seccomp deny-list filter installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_blocked_syscall_has_a_number() {
        for &name in BLOCKED_SYSCALLS {
            assert!(syscall_name_to_nr(name).is_some(), "missing syscall number for {name}");
        }
    }

    #[test]
    fn clone_flags_cover_all_new_namespace_bits() {
        assert_ne!(CLONE_NS_FLAGS & (libc::CLONE_NEWUSER as u64), 0);
        assert_ne!(CLONE_NS_FLAGS & (libc::CLONE_NEWPID as u64), 0);
    }
}
