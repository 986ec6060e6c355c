//! Error types for profiling sessions and the facilities they drive.
//!
//! Two layers of errors exist:
//!
//! - [`FacilityError`]: a single profiling facility (CPU sampler, execution
//!   tracer, heap snapshotter) refused to start or to write its output.
//! - [`Error`]: what a [`ProfilingSession`](crate::ProfilingSession) operation
//!   reports to its caller. Facility failures are wrapped with the step that
//!   failed so callers can tell a tracer failure from a sampler failure.
//!
//! None of these errors are fatal to the process. A failed start has already
//! been rolled back by the time the caller sees the error.
//!
//! ```rust,no_run
//! use proftoggle::{Error, ProfilingSession};
//!
//! let session = ProfilingSession::default();
//! match session.start() {
//!     Ok(dir) => println!("profiling into {}", dir.display()),
//!     Err(Error::AlreadyRunning(dir)) => println!("already writing to {}", dir.display()),
//!     Err(e) => eprintln!("{} error: {e}", e.category()),
//! }
//! # let _ = session.stop();
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for profiling session operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A session is already active.
    ///
    /// Returned by `start` without touching the filesystem or any facility.
    /// Carries the directory the running session writes to.
    #[error("Cannot start profiling, since it's already writing to '{}'", .0.display())]
    AlreadyRunning(PathBuf),

    /// The temporary output directory could not be created.
    ///
    /// Nothing has been started when this is returned, so there is nothing
    /// to roll back.
    #[error("Failed to create profiles directory: {0}")]
    DirectoryCreation(#[source] std::io::Error),

    /// The execution tracer refused to start.
    ///
    /// The CPU sampler was never attempted and the directory has been removed.
    #[error("Failed to start execution trace: {0}")]
    TracerStart(#[source] FacilityError),

    /// The CPU sampler refused to start.
    ///
    /// The tracer started before it has been stopped again and the directory
    /// has been removed.
    #[error("Failed to start CPU profile: {0}")]
    SamplerStart(#[source] FacilityError),

    /// The heap snapshot could not be written during `stop`.
    ///
    /// Only ever surfaced inside a
    /// [`StopOutcome::HeapSnapshotFailed`](crate::StopOutcome::HeapSnapshotFailed);
    /// the rest of the stop sequence still ran.
    #[error("Failed to write heap profile: {0}")]
    HeapSnapshot(#[source] FacilityError),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The global tracing subscriber could not be installed.
    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl Error {
    /// Get the error category as a string identifier.
    ///
    /// Useful as a structured field when logging:
    ///
    /// ```rust
    /// use proftoggle::Error;
    ///
    /// let err = Error::Config("cpu.frequency must be positive".into());
    /// tracing::warn!(category = err.category(), "{err}");
    /// assert_eq!(err.category(), "config");
    /// ```
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::AlreadyRunning(_) => "already_running",
            Self::DirectoryCreation(_) => "directory",
            Self::TracerStart(_) => "tracer",
            Self::SamplerStart(_) => "sampler",
            Self::HeapSnapshot(_) => "heap",
            Self::Config(_) => "config",
            Self::Logging(_) => "logging",
        }
    }
}

/// Failure reported by a single profiling facility.
#[derive(Error, Debug)]
pub enum FacilityError {
    /// The sink file could not be created or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The pprof CPU profiler rejected the request.
    ///
    /// Most commonly because another `ProfilerGuard` is alive in the process.
    #[error("pprof error: {0}")]
    Pprof(#[from] pprof::Error),

    /// This facility is already recording.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// The facility cannot operate in this process.
    #[error("{0}")]
    Unavailable(String),
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
