// src/pool.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Worker Pool (spec §4.8, §5): a single-machine, FIFO scheduler over a
//! fixed set of pinned worker threads, one per allocated bundle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{info, warn};

use crate::error::{CoreBenchError, Result};
use crate::membank;
use crate::supervisor::{self, WorkerAssignment};
use crate::topology::Topology;
use crate::types::{Bundle, RunId, RunRequest, RunResult, SystemInfo};
use crate::{allocator, limits};

/// Fixed configuration for one pool run; analogous to the CLI options a
/// caller would otherwise parse (CLI parsing itself is out of scope here).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: u32,
    pub core_limit: u32,
    pub hyperthreading_allowed: bool,
    pub core_requirement: Option<u32>,
    /// Hard ceiling on in-flight-run drain time once a stop is requested.
    pub shutdown_grace: std::time::Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            workers: 1,
            core_limit: 1,
            hyperthreading_allowed: false,
            core_requirement: None,
            shutdown_grace: std::time::Duration::from_secs(10),
        }
    }
}

struct RunQueue {
    queue: Mutex<VecDeque<(RunId, RunRequest)>>,
    condvar: Condvar,
    closed: AtomicBool,
}

impl RunQueue {
    fn new() -> Self {
        RunQueue { queue: Mutex::new(VecDeque::new()), condvar: Condvar::new(), closed: AtomicBool::new(false) }
    }

    fn push(&self, item: (RunId, RunRequest)) {
        let mut guard = self.queue.lock().unwrap();
        guard.push_back(item);
        self.condvar.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    /// Blocks until a run is available, the queue is closed and empty, or a
    /// stop has been requested.
    fn pop(&self, stop_flag: &AtomicBool) -> Option<(RunId, RunRequest)> {
        let mut guard = self.queue.lock().unwrap();
        loop {
            if let Some(item) = guard.pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::SeqCst) || stop_flag.load(Ordering::SeqCst) {
                return None;
            }
            let (next, _timeout) = self
                .condvar
                .wait_timeout(guard, std::time::Duration::from_millis(200))
                .unwrap();
            guard = next;
        }
    }
}

/// A single-machine scheduler over `workers` pinned supervisor threads,
/// dispatching [`RunRequest`]s FIFO and collecting their [`RunResult`]s.
pub struct WorkerPool {
    config: PoolConfig,
    assignments: Vec<WorkerAssignment>,
    stop_flag: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Detects the machine's topology, allocates `workers` bundles of
    /// `core_limit` cores, assigns memory banks, and validates the memory
    /// budget against every run's worst case before accepting any work.
    pub fn start(config: PoolConfig, topology: &Topology, per_run_memory_bytes: Option<u64>) -> Result<Self> {
        let bundles: Vec<Bundle> = allocator::allocate(
            &topology.hierarchy,
            &topology.cores,
            config.core_limit,
            config.workers,
            config.hyperthreading_allowed,
            config.core_requirement,
        )?;

        let bank_assignments = membank::assign(&bundles, &topology.cores)?;

        if let Some(memory_bytes) = per_run_memory_bytes {
            limits::check_memory_size(memory_bytes, config.workers as usize, bank_assignments.as_deref())?;
        }

        let assignments: Vec<WorkerAssignment> = bundles
            .into_iter()
            .enumerate()
            .map(|(i, bundle)| WorkerAssignment {
                cores: bundle.cores,
                banks: bank_assignments.as_ref().map(|a| a[i].banks.clone()).unwrap_or_default(),
            })
            .collect();

        info!(workers = config.workers, core_limit = config.core_limit, "worker pool ready");

        Ok(WorkerPool { config, assignments, stop_flag: Arc::new(AtomicBool::new(false)) })
    }

    /// Reads the once-per-start system record (spec §6).
    pub fn system_info(&self) -> SystemInfo {
        read_system_info()
    }

    /// Runs every request in `requests` to completion, FIFO, distributing
    /// them across the pool's workers. Returns results in dispatch order.
    /// Registers SIGINT/SIGTERM/SIGQUIT for the duration of the call so an
    /// operator can request an early, graceful stop (spec §5, §9).
    pub fn run_all(&self, requests: Vec<RunRequest>) -> Result<Vec<RunResult>> {
        let queue = Arc::new(RunQueue::new());
        let next_id = Arc::new(AtomicU64::new(0));
        let results: Arc<Mutex<Vec<(RunId, RunResult)>>> = Arc::new(Mutex::new(Vec::new()));

        for request in &requests {
            let id = RunId(next_id.fetch_add(1, Ordering::SeqCst));
            queue.push((id, request.clone()));
        }
        queue.close();

        let _signal_guard = install_signal_handler(Arc::clone(&self.stop_flag));

        let mut handles = Vec::with_capacity(self.assignments.len());
        for assignment in self.assignments.clone() {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let stop_flag = Arc::clone(&self.stop_flag);
            handles.push(thread::spawn(move || {
                while let Some((run_id, request)) = queue.pop(&stop_flag) {
                    match supervisor::supervise(run_id, &request, &assignment, &stop_flag) {
                        Ok(result) => results.lock().unwrap().push((run_id, result)),
                        Err(e) => {
                            warn!(run = run_id.0, error = %e, "run-level setup failure, halting pool");
                            stop_flag.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.join();
        }

        let mut ordered = Arc::try_unwrap(results).unwrap().into_inner().unwrap();
        ordered.sort_by_key(|(id, _)| id.0);

        if self.stop_flag.load(Ordering::SeqCst) && ordered.len() < requests.len() {
            return Err(CoreBenchError::Interrupted);
        }

        Ok(ordered.into_iter().map(|(_, result)| result).collect())
    }
}

fn read_system_info() -> SystemInfo {
    let cpu_model = std::fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|raw| {
            raw.lines()
                .find(|l| l.starts_with("model name"))
                .and_then(|l| l.split(':').nth(1))
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let memory_bytes = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|raw| {
            raw.lines()
                .find(|l| l.starts_with("MemTotal:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map(|kb| kb * 1024)
        .unwrap_or(0);

    let kernel_version = uname_release().unwrap_or_else(|| "unknown".to_string());

    SystemInfo { cpu_model, core_count: num_cpus::get(), kernel_version, memory_bytes }
}

#[cfg(target_os = "linux")]
fn uname_release() -> Option<String> {
    nix::sys::utsname::uname().ok().map(|u| u.release().to_string_lossy().into_owned())
}

#[cfg(not(target_os = "linux"))]
fn uname_release() -> Option<String> {
    None
}

/// Installs a handler on SIGINT/SIGTERM/SIGQUIT that only ever flips
/// `stop_flag`; it never touches the allocator or the filesystem directly,
/// since signal-handler context is not a safe place to do either.
#[cfg(target_os = "linux")]
fn install_signal_handler(stop_flag: Arc<AtomicBool>) -> impl Drop {
    use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::flag;

    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {}
    }

    for signal in [SIGINT, SIGTERM, SIGQUIT] {
        let _ = flag::register(signal, Arc::clone(&stop_flag));
    }
    Guard
}

#[cfg(not(target_os = "linux"))]
fn install_signal_handler(_stop_flag: Arc<AtomicBool>) -> impl Drop {
    struct Guard;
    impl Drop for Guard {
        fn drop(&mut self) {}
    }
    Guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_queue_pop_returns_none_once_closed_and_drained() {
        let queue = RunQueue::new();
        let stop_flag = AtomicBool::new(false);
        queue.push((RunId(0), sample_request()));
        queue.close();
        assert!(queue.pop(&stop_flag).is_some());
        assert!(queue.pop(&stop_flag).is_none());
    }

    #[test]
    fn run_queue_pop_returns_none_when_stop_requested() {
        let queue = RunQueue::new();
        let stop_flag = AtomicBool::new(true);
        assert!(queue.pop(&stop_flag).is_none());
    }

    fn sample_request() -> RunRequest {
        RunRequest {
            command: vec!["/bin/true".to_string()],
            input_paths: Vec::new(),
            output_paths: Vec::new(),
            limits: crate::types::ResourceLimits::default(),
            mount_policy: std::collections::HashMap::new(),
            network_allowed: false,
        }
    }
}
