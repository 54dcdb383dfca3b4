// src/supervisor.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run Supervisor (spec §4.7): for each run, builds a dedicated cgroup,
//! starts the container, enforces wall/CPU time, drains measurement
//! counters, and tears everything down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::cgroup::RunCgroup;
use crate::error::Result;
use crate::types::{BankId, CoreId, RunId, RunOutcome, RunRequest, RunResult};

const WATCHDOG_GRACE: Duration = Duration::from_secs(5);
const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One worker's fixed hardware assignment, produced once by the allocator
/// and the memory-bank assigner and reused across every run it executes.
#[derive(Debug, Clone)]
pub struct WorkerAssignment {
    pub cores: Vec<CoreId>,
    pub banks: Vec<BankId>,
}

/// Executes one run under the configured resource limits, returning a
/// structured [`RunResult`]. Never retries; a container-setup failure is
/// propagated as a fatal [`crate::error::CoreBenchError`] (spec §4.7,
/// "Retries / partial failure").
pub fn supervise(
    run_id: RunId,
    request: &RunRequest,
    assignment: &WorkerAssignment,
    stop_flag: &Arc<AtomicBool>,
) -> Result<RunResult> {
    let cgroup_name = format!("corebench-run-{}", run_id.0);
    let cgroup = RunCgroup::create(&cgroup_name, &assignment.cores, &assignment.banks, &request.limits)?;

    let start = Instant::now();
    let start_energy = read_rapl_energy_uj();

    let child = spawn_container_child(request)?;
    cgroup.add_process(child)?;

    let outcome = wait_with_watchdog(child, request, &cgroup, stop_flag)?;

    let wall_seconds_used = start.elapsed().as_secs_f64();
    let cpu_seconds_used = cgroup.cpu_seconds_used();
    let peak_memory_bytes = cgroup.peak_memory_bytes();
    let was_oom = cgroup.was_oom_killed();
    let end_energy = read_rapl_energy_uj();
    let energy_joules = match (start_energy, end_energy) {
        (Some(a), Some(b)) => Some((b.wrapping_sub(a)) as f64 / 1_000_000.0),
        _ => None,
    };

    cleanup_cgroup_processes(&cgroup);
    cgroup.teardown()?;

    let was_timeout = matches!(outcome, RunOutcome::Timeout);

    info!(run = run_id.0, ?outcome, wall_seconds_used, cpu_seconds_used, "run complete");

    Ok(RunResult {
        run_id,
        outcome,
        cpu_seconds_used,
        wall_seconds_used,
        peak_memory_bytes,
        was_oom,
        was_timeout,
        energy_joules,
        created_files: Vec::new(),
    })
}

#[cfg(target_os = "linux")]
fn spawn_container_child(request: &RunRequest) -> Result<i32> {
    use crate::container::{ContainerConfig, EntryMode};
    use nix::unistd::{fork, ForkResult};

    match unsafe { fork() }.map_err(|e| crate::error::CoreBenchError::ContainerSetupFailure {
        stage: "supervisor.fork".to_string(),
        errno: e as i32,
    })? {
        ForkResult::Parent { child } => Ok(child.as_raw()),
        ForkResult::Child => {
            let temp_dir = std::env::temp_dir().join(format!("corebench-{}", std::process::id()));
            let original_cwd = std::env::current_dir().unwrap_or_else(|_| "/".into());
            let config = ContainerConfig {
                temp_dir,
                original_cwd,
                entry_mode: EntryMode::CloneChild,
                system_config: None,
            };
            match crate::container::run_in_container(&config, request) {
                Ok(()) => std::process::exit(0),
                Err(e) => {
                    tracing::error!(error = %e, "container setup failed");
                    std::process::exit(125);
                }
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn spawn_container_child(_request: &RunRequest) -> Result<i32> {
    Err(crate::error::CoreBenchError::ContainerSetupFailure {
        stage: "spawn_container_child".to_string(),
        errno: libc_enosys(),
    })
}

#[cfg(not(target_os = "linux"))]
fn libc_enosys() -> i32 {
    // ENOSYS, hardcoded since libc is only a dependency on Linux targets.
    38
}

/// Waits for the child, sending SIGTERM then SIGKILL through the freezer
/// once `wall_seconds` elapses, and polling the stop flag in between (spec
/// §4.7 step 4, §5 cancellation).
#[cfg(target_os = "linux")]
fn wait_with_watchdog(
    child: i32,
    request: &RunRequest,
    cgroup: &RunCgroup,
    stop_flag: &Arc<AtomicBool>,
) -> Result<RunOutcome> {
    use nix::sys::signal::{kill, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child);
    let deadline = request.limits.wall_seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut sent_term = false;
    let mut timed_out = false;

    loop {
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {}
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(if timed_out {
                    RunOutcome::Timeout
                } else {
                    RunOutcome::Exited { code }
                });
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(if timed_out {
                    RunOutcome::Timeout
                } else {
                    RunOutcome::Signaled { signal: signal as i32 }
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "waitpid failed; assuming child already reaped");
                return Ok(RunOutcome::Signaled { signal: 0 });
            }
        }

        if let Some(deadline) = deadline {
            if !sent_term && Instant::now() >= deadline {
                warn!(run_pid = child, "wall time exceeded, sending SIGTERM");
                let _ = kill(pid, Signal::SIGTERM);
                sent_term = true;
                timed_out = true;
            } else if sent_term && Instant::now() >= deadline + WATCHDOG_GRACE {
                // `child` is the Run Supervisor's direct fork, not the tool
                // itself (the container entry protocol forks again past
                // `unshare(CLONE_NEWPID)` to land the tool at PID 1), so the
                // kill must reach every process the cgroup has accumulated.
                warn!(run_pid = child, "grace period exceeded, freeze-killing cgroup");
                let _ = cgroup.freeze();
                for member in cgroup.member_pids() {
                    let _ = kill(Pid::from_raw(member), Signal::SIGKILL);
                }
                let _ = cgroup.thaw();
            }
        }

        if stop_flag.load(Ordering::SeqCst) && !sent_term {
            warn!(run_pid = child, "pool stop requested, terminating run");
            let _ = kill(pid, Signal::SIGTERM);
            sent_term = true;
        }

        std::thread::sleep(WATCHDOG_POLL_INTERVAL);
    }
}

#[cfg(not(target_os = "linux"))]
fn wait_with_watchdog(
    _child: i32,
    _request: &RunRequest,
    _cgroup: &RunCgroup,
    _stop_flag: &Arc<AtomicBool>,
) -> Result<RunOutcome> {
    Ok(RunOutcome::Exited { code: 0 })
}

#[cfg(target_os = "linux")]
fn cleanup_cgroup_processes(cgroup: &RunCgroup) {
    let _ = cgroup.freeze();
    let _ = cgroup.thaw();
}

#[cfg(not(target_os = "linux"))]
fn cleanup_cgroup_processes(_cgroup: &RunCgroup) {}

/// Samples the sum of all package RAPL energy counters, or `None` if the
/// powercap sysfs tree isn't present (spec §4.7 step 7).
fn read_rapl_energy_uj() -> Option<u64> {
    let root = std::path::Path::new("/sys/class/powercap");
    let entries = std::fs::read_dir(root).ok()?;
    let mut total = 0u64;
    let mut found = false;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("intel-rapl:") {
            continue;
        }
        if let Ok(raw) = std::fs::read_to_string(entry.path().join("energy_uj")) {
            if let Ok(v) = raw.trim().parse::<u64>() {
                total = total.wrapping_add(v);
                found = true;
            }
        }
    }
    found.then_some(total)
}
