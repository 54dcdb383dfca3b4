// src/container/capabilities.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability dropping and the no-new-privs / non-dumpable flags
//! (spec §4.6 step 9).

use caps::CapSet;
use tracing::debug;

use crate::error::{CoreBenchError, Result};

fn to_err(stage: &str) -> impl Fn(caps::errors::CapsError) -> CoreBenchError + '_ {
    move |_| CoreBenchError::ContainerSetupFailure { stage: stage.to_string(), errno: -1 }
}

/// Drops every ambient and inheritable capability, then clears the
/// effective and permitted sets so the tool runs with none at all.
pub fn drop_all_capabilities() -> Result<()> {
    caps::clear(None, CapSet::Ambient).map_err(to_err("caps.clear.ambient"))?;
    caps::clear(None, CapSet::Inheritable).map_err(to_err("caps.clear.inheritable"))?;
    caps::clear(None, CapSet::Effective).map_err(to_err("caps.clear.effective"))?;
    caps::clear(None, CapSet::Permitted).map_err(to_err("caps.clear.permitted"))?;
    debug!("dropped all capability sets");
    Ok(())
}

/// Sets `PR_SET_NO_NEW_PRIVS` so the tool can never regain privilege via
/// setuid/setgid/file capabilities, and `PR_SET_DUMPABLE` to 0 so its memory
/// can't be ptraced or core-dumped by another process in the same userns.
pub fn lock_down_process() -> Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(CoreBenchError::ContainerSetupFailure {
            stage: "prctl(PR_SET_NO_NEW_PRIVS)".to_string(),
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        });
    }
    let rc = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
    if rc != 0 {
        return Err(CoreBenchError::ContainerSetupFailure {
            stage: "prctl(PR_SET_DUMPABLE)".to_string(),
            errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(-1),
        });
    }
    Ok(())
}
