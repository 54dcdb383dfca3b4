// demos/run_isolated.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs a single command under full resource isolation: one worker, the
//! whole machine's core limit, a 30s wall-clock ceiling. Requires root and
//! Linux namespace support; prints the resulting `RunResult`.

use std::collections::HashMap;

use corebench::topology::Topology;
use corebench::{PoolConfig, ResourceLimits, RunRequest, WorkerPool};

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let command: Vec<String> = std::env::args().skip(1).collect();
    let command = if command.is_empty() {
        vec!["/bin/echo".to_string(), "hello from inside the container".to_string()]
    } else {
        command
    };

    let topology = Topology::detect(None).expect("topology detection failed");

    let config = PoolConfig {
        workers: 1,
        core_limit: 1,
        hyperthreading_allowed: false,
        core_requirement: None,
        shutdown_grace: std::time::Duration::from_secs(5),
    };

    let pool = WorkerPool::start(config, &topology, None).expect("failed to start pool");
    println!("system info: {:?}", pool.system_info());

    let request = RunRequest {
        command,
        input_paths: Vec::new(),
        output_paths: Vec::new(),
        limits: ResourceLimits { wall_seconds: Some(30), ..Default::default() },
        mount_policy: HashMap::new(),
        network_allowed: false,
    };

    match pool.run_all(vec![request]) {
        Ok(results) => {
            for result in results {
                println!("{result:?}");
            }
        }
        Err(e) => {
            eprintln!("run failed: {e}");
            std::process::exit(1);
        }
    }
}
