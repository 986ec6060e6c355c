//! One-shot heap snapshots.
//!
//! With the `jemalloc` feature the snapshot is a pprof heap profile dumped by
//! jemalloc's sampling profiler. The feature builds jemalloc with profiling
//! support; the application must still use it as the global allocator and
//! activate profiling (for example through
//! `malloc_conf = "prof:true,prof_active:true"`). Anything less is reported
//! as [`FacilityError::Unavailable`].
//!
//! Without it, the snapshot is a JSON summary of the process's memory as the
//! OS reports it, which is still enough to compare sessions.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::FacilityError;
use crate::facility::Snapshotter;

/// Writes a heap snapshot of the current process.
#[derive(Debug, Default)]
pub struct HeapSnapshotter;

impl HeapSnapshotter {
    /// Create a snapshotter.
    pub const fn new() -> Self {
        Self
    }
}

impl Snapshotter for HeapSnapshotter {
    fn write(&mut self, sink: &Path) -> Result<(), FacilityError> {
        // Captured before the sink exists so a failure leaves no empty profile.
        let snapshot = capture()?;
        let mut file = File::create(sink)?;
        file.write_all(&snapshot)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(feature = "jemalloc")]
fn capture() -> Result<Vec<u8>, FacilityError> {
    // `PROF_CTL` panics on first use unless jemalloc was built with profiling.
    match tikv_jemalloc_ctl::profiling::prof::read() {
        Ok(true) => {},
        Ok(false) => {
            return Err(FacilityError::Unavailable(
                "jemalloc profiling is disabled (set malloc_conf \"prof:true\")".into(),
            ));
        },
        Err(e) => {
            return Err(FacilityError::Unavailable(format!(
                "jemalloc profiling is not available: {e}"
            )));
        },
    }

    let mut prof_ctl = jemalloc_pprof::PROF_CTL
        .as_ref()
        .ok_or_else(|| FacilityError::Unavailable("jemalloc profiling is not available".into()))?
        .try_lock()
        .map_err(|_| FacilityError::Unavailable("jemalloc profiler is busy".into()))?;
    if !prof_ctl.activated() {
        return Err(FacilityError::Unavailable(
            "jemalloc profiling is not activated".into(),
        ));
    }
    prof_ctl
        .dump_pprof()
        .map_err(|e| FacilityError::Unavailable(format!("failed to dump jemalloc heap profile: {e}")))
}

#[cfg(not(feature = "jemalloc"))]
fn capture() -> Result<Vec<u8>, FacilityError> {
    let snapshot = MemorySnapshot::current()?;
    serde_json::to_vec_pretty(&snapshot)
        .map_err(|e| FacilityError::Unavailable(format!("failed to encode memory snapshot: {e}")))
}

/// Process memory as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Process id the figures belong to
    pub pid: u32,
    /// Resident set size in bytes
    pub resident_bytes: u64,
    /// Virtual memory size in bytes
    pub virtual_bytes: u64,
    /// When the figures were read
    pub captured_at: DateTime<Utc>,
}

impl MemorySnapshot {
    /// Read the current process's memory figures.
    pub fn current() -> Result<Self, FacilityError> {
        let raw_pid = std::process::id();
        let pid = Pid::from_u32(raw_pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::new().with_memory(),
        );

        let process = system.process(pid).ok_or_else(|| {
            FacilityError::Unavailable(format!("process {raw_pid} not visible to sysinfo"))
        })?;
        Ok(Self {
            pid: raw_pid,
            resident_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            captured_at: Utc::now(),
        })
    }
}
