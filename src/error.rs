// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural error sum type (spec §7). Per-run tool outcomes are *not*
//! represented here — they live in [`crate::types::RunOutcome`] and are
//! reported through `RunResult`, since they never halt the pool.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreBenchError {
    #[error("failed to read topology from {path}: {source}")]
    TopologyReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("asymmetric topology: {detail}")]
    AsymmetricTopology { detail: String },

    #[error("infeasible allocation: {reason}{}", suggested_workers.map(|w| format!(" (try workers={w})")).unwrap_or_default())]
    InfeasibleAllocation {
        reason: String,
        suggested_workers: Option<u32>,
    },

    #[error("insufficient memory: limit is {limit_bytes} bytes, requested {requested_bytes} bytes")]
    InsufficientMemory {
        limit_bytes: u64,
        requested_bytes: u64,
    },

    #[error(
        "user namespaces are forbidden on this host: write '{required_value}' to {sysctl_path}"
    )]
    UserNamespaceForbidden {
        sysctl_path: String,
        required_value: String,
    },

    #[error("user namespace creation blocked by an AppArmor/LSM policy")]
    AppArmorUserNamespaceRestriction,

    #[error("container setup failed at stage '{stage}' (errno {errno})")]
    ContainerSetupFailure { stage: String, errno: i32 },

    #[error("an invalid core was requested: {0:?}")]
    InvalidCoreSet(Vec<u32>),

    #[error("pool was interrupted; remaining runs skipped")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, CoreBenchError>;
