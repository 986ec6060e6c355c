//! # proftoggle
//!
//! Toggle runtime profiling on and off. Each session writes three profiles
//! into a freshly created temporary directory:
//!
//! | File           | Facility                 | Format                        |
//! |----------------|--------------------------|-------------------------------|
//! | `trace`        | execution trace          | JSON lines from `tracing`     |
//! | `cpu-profile`  | CPU sampler (pprof)      | pprof protobuf                |
//! | `heap-profile` | heap snapshot, on stop   | jemalloc pprof or JSON summary|
//!
//! ## Architecture
//!
//! - **Session**: [`ProfilingSession`], the start/stop state machine with
//!   rollback on partial start failure
//! - **Facilities**: the [`Recorder`] and [`Snapshotter`] traits and their
//!   real implementations in [`cpu`], [`trace`] and [`heap`]
//! - **Configuration**: [`ProfilingConfig`], TOML plus `PROFTOGGLE_*` overrides
//! - **Logging**: [`logging::init_logging`] and the trace layer
//! - **Error Handling**: [`Error`] and [`FacilityError`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proftoggle::{logging, toggle_profiling, Toggled};
//!
//! logging::init_logging(&logging::LoggingConfig::default())?;
//!
//! // e.g. from a signal handler thread or a debug endpoint
//! match toggle_profiling()? {
//!     Toggled::Started(dir) => println!("profiling into {}", dir.display()),
//!     Toggled::Stopped(outcome) => {
//!         if let Some(err) = outcome.heap_error() {
//!             eprintln!("{err}");
//!         }
//!         println!("profiles kept in {:?}", outcome.directory());
//!     },
//! }
//! # Ok::<(), proftoggle::Error>(())
//! ```
//!
//! Directories returned by a stop are never deleted; cleaning them up is up
//! to the caller.

/// Configuration for session placement and CPU sampling
pub mod config;
/// CPU sampling through pprof
pub mod cpu;
/// Error types and result aliases
pub mod error;
/// Facility traits and the fixed output file names
pub mod facility;
/// Heap snapshots
pub mod heap;
/// Logging initialization
pub mod logging;
/// The profiling session state machine
pub mod session;
/// Recording doubles for the facility traits
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
/// Execution trace recording through `tracing`
pub mod trace;

use std::path::PathBuf;

use once_cell::sync::Lazy;

// Re-export commonly used types
pub use config::{CpuConfig, OutputConfig, ProfilingConfig};
pub use error::{Error, FacilityError, Result};
pub use facility::{
    CPU_PROFILE_FILE, Facilities, HEAP_PROFILE_FILE, Recorder, Snapshotter, TRACE_FILE,
};
pub use session::{ProfilingSession, StopOutcome, Toggled};
pub use trace::trace_layer;

static GLOBAL: Lazy<ProfilingSession> =
    Lazy::new(|| ProfilingSession::new(ProfilingConfig::from_env()));

/// The process-wide session behind the free functions.
///
/// Created on first use from [`ProfilingConfig::from_env`].
pub fn global() -> &'static ProfilingSession {
    &GLOBAL
}

/// True if the process-wide session is writing profiles.
pub fn profiling_in_progress() -> bool {
    GLOBAL.is_active()
}

/// Start writing profiles; returns the directory they go to.
///
/// See [`ProfilingSession::start`].
pub fn start_profiling() -> Result<PathBuf> {
    GLOBAL.start()
}

/// Stop writing profiles, dumping the heap first.
///
/// See [`ProfilingSession::stop`].
pub fn stop_profiling() -> StopOutcome {
    GLOBAL.stop()
}

/// Flip the process-wide session between running and stopped.
pub fn toggle_profiling() -> Result<Toggled> {
    GLOBAL.toggle()
}
