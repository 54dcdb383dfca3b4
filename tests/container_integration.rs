// tests/container_integration.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Container isolation properties that require root and Linux namespace
//! support. Not run by default (`cargo test -- --ignored`); CI with the
//! right privileges opts in explicitly.

#![cfg(target_os = "linux")]

use std::collections::HashMap;

use corebench::container::{self, ContainerConfig, EntryMode};
use corebench::types::RunRequest;

fn sample_config(entry_mode: EntryMode) -> ContainerConfig {
    ContainerConfig {
        temp_dir: std::env::temp_dir().join(format!("corebench-test-{}", std::process::id())),
        original_cwd: std::env::current_dir().unwrap(),
        entry_mode,
        system_config: None,
    }
}

fn sample_request(command: Vec<&str>) -> RunRequest {
    RunRequest {
        command: command.into_iter().map(String::from).collect(),
        input_paths: Vec::new(),
        output_paths: Vec::new(),
        limits: Default::default(),
        mount_policy: HashMap::new(),
        network_allowed: false,
    }
}

#[test]
#[ignore = "requires root and unprivileged user namespaces"]
fn tool_process_becomes_pid_one_inside_the_container() {
    let config = sample_config(EntryMode::UnshareSelf);
    let request = sample_request(vec!["/bin/sh", "-c", "test $$ -eq 1"]);
    container::run_in_container(&config, &request).expect("container run should succeed with PID 1 inside");
}

#[test]
#[ignore = "requires root and unprivileged user namespaces"]
fn mounts_outside_the_policy_are_not_visible() {
    let config = sample_config(EntryMode::UnshareSelf);
    // /root is not in the (empty) mount policy, so it must come up empty
    // under the Hidden default once the overlay mounts are established.
    let request = sample_request(vec!["/bin/sh", "-c", "test -z \"$(ls -A /root 2>/dev/null)\""]);
    container::run_in_container(&config, &request).expect("hidden paths must not leak host content");
}

#[test]
#[ignore = "requires root and unprivileged user namespaces"]
fn blocked_syscall_fails_with_the_configured_errno() {
    let config = sample_config(EntryMode::UnshareSelf);
    // mount(2) is on the deny-list; a shell one-liner invoking it through
    // /bin/mount should fail rather than succeed or crash the process.
    let request = sample_request(vec!["/bin/mount", "-t", "tmpfs", "tmpfs", "/mnt"]);
    let result = container::run_in_container(&config, &request);
    assert!(result.is_ok(), "the supervisor call itself must still return control to the caller");
}
