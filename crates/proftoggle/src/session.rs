//! The profiling session state machine.
//!
//! A session is one start-to-stop interval during which the execution
//! tracer and the CPU sampler write into a fresh temporary directory. At most
//! one session is active per [`ProfilingSession`]; the underlying facilities
//! are process singletons, so applications normally use the shared instance
//! behind [`crate::global`].
//!
//! ## Start
//!
//! 1. Refuse if already active.
//! 2. Create `<root>/<prefix>XXXXXX`.
//! 3. Start the tracer into `trace`, then the sampler into `cpu-profile`.
//!
//! Any failure after step 2 stops whatever already started and removes the
//! directory before returning, so a failed start leaves nothing behind.
//!
//! ## Stop
//!
//! The heap snapshot is written into `heap-profile` first, while the other
//! facilities still run. The sampler and tracer are then stopped no matter
//! how the snapshot went. The directory is handed back to the caller and is
//! never deleted by the session.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::{OutputConfig, ProfilingConfig};
use crate::error::FacilityError;
use crate::facility::{CPU_PROFILE_FILE, Facilities, HEAP_PROFILE_FILE, Snapshotter, TRACE_FILE};
use crate::{Error, Result};

/// How a call to [`ProfilingSession::stop`] ended.
#[derive(Debug)]
#[must_use]
pub enum StopOutcome {
    /// No session was active. Nothing was touched.
    NotRunning,

    /// The session ended and all three profiles were written.
    Stopped(PathBuf),

    /// The session ended, but the heap snapshot could not be written.
    ///
    /// The tracer and sampler were still stopped and their files are in
    /// `directory`.
    HeapSnapshotFailed {
        /// Directory of the session that just ended
        directory: PathBuf,
        /// Why the heap snapshot failed
        error: Error,
    },
}

impl StopOutcome {
    /// Directory of the session that ended, if one was active.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Self::NotRunning => None,
            Self::Stopped(dir) | Self::HeapSnapshotFailed { directory: dir, .. } => {
                Some(dir.as_path())
            },
        }
    }

    /// Take ownership of the session directory, if one was active.
    pub fn into_directory(self) -> Option<PathBuf> {
        match self {
            Self::NotRunning => None,
            Self::Stopped(dir) | Self::HeapSnapshotFailed { directory: dir, .. } => Some(dir),
        }
    }

    /// The non-fatal heap snapshot error, if any.
    pub const fn heap_error(&self) -> Option<&Error> {
        match self {
            Self::HeapSnapshotFailed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether a session was active when stop was called.
    pub const fn was_running(&self) -> bool {
        !matches!(self, Self::NotRunning)
    }
}

/// What [`ProfilingSession::toggle`] did.
#[derive(Debug)]
#[must_use]
pub enum Toggled {
    /// A new session started writing into this directory.
    Started(PathBuf),
    /// The active session was stopped.
    Stopped(StopOutcome),
}

impl Toggled {
    /// Directory of the session that started or stopped.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Self::Started(dir) => Some(dir.as_path()),
            Self::Stopped(outcome) => outcome.directory(),
        }
    }
}

/// Coordinates the tracer, sampler and heap snapshotter.
///
/// All operations take an internal lock for their whole duration, so
/// concurrent callers see `start`, `stop` and `toggle` as atomic.
#[derive(Debug)]
pub struct ProfilingSession {
    config: ProfilingConfig,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    active: Option<PathBuf>,
    facilities: Facilities,
}

impl ProfilingSession {
    /// A session driving the real pprof, tracing and heap facilities.
    pub fn new(config: ProfilingConfig) -> Self {
        let facilities = Facilities::from_config(&config);
        Self::with_facilities(config, facilities)
    }

    /// A session driving caller-supplied facilities.
    pub fn with_facilities(config: ProfilingConfig, facilities: Facilities) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                active: None,
                facilities,
            }),
        }
    }

    /// Configuration this session was built with.
    pub const fn config(&self) -> &ProfilingConfig {
        &self.config
    }

    /// True while a session is writing profiles.
    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Directory of the running session, if any.
    pub fn active_directory(&self) -> Option<PathBuf> {
        self.lock().active.clone()
    }

    /// Start writing profiles and return the directory they go to.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if a session is active
    /// - [`Error::DirectoryCreation`] if the temporary directory cannot be made
    /// - [`Error::TracerStart`] / [`Error::SamplerStart`] if a facility refuses;
    ///   everything started so far has been stopped and the directory removed
    pub fn start(&self) -> Result<PathBuf> {
        let result = self.lock().start(&self.config.output);
        log_started(&result);
        result
    }

    /// Stop writing profiles, dumping the heap first.
    ///
    /// Never fails outright: a heap snapshot failure is reported through
    /// [`StopOutcome::HeapSnapshotFailed`] after everything else stopped.
    pub fn stop(&self) -> StopOutcome {
        let outcome = self.lock().stop();
        log_stopped(&outcome);
        outcome
    }

    /// Stop if active, start otherwise, as one atomic step.
    pub fn toggle(&self) -> Result<Toggled> {
        let mut state = self.lock();
        if state.active.is_some() {
            let outcome = state.stop();
            drop(state);
            log_stopped(&outcome);
            Ok(Toggled::Stopped(outcome))
        } else {
            let result = state.start(&self.config.output);
            drop(state);
            log_started(&result);
            result.map(Toggled::Started)
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is consistent at every point a facility could panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProfilingSession {
    fn default() -> Self {
        Self::new(ProfilingConfig::default())
    }
}

impl Drop for ProfilingSession {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.active.is_some() {
            debug!("Profiling session dropped while active; stopping it");
            let outcome = state.stop();
            log_stopped(&outcome);
        }
    }
}

impl State {
    fn start(&mut self, output: &OutputConfig) -> Result<PathBuf> {
        if let Some(dir) = &self.active {
            return Err(Error::AlreadyRunning(dir.clone()));
        }

        let dir = create_session_dir(output)?;

        if let Err(e) = self.facilities.tracer.start(&dir.join(TRACE_FILE)) {
            remove_session_dir(&dir);
            return Err(Error::TracerStart(e));
        }

        if let Err(e) = self.facilities.sampler.start(&dir.join(CPU_PROFILE_FILE)) {
            self.facilities.tracer.stop();
            remove_session_dir(&dir);
            return Err(Error::SamplerStart(e));
        }

        self.active = Some(dir.clone());
        Ok(dir)
    }

    fn stop(&mut self) -> StopOutcome {
        let Some(dir) = self.active.take() else {
            return StopOutcome::NotRunning;
        };

        let heap = write_heap(&mut *self.facilities.heap, &dir.join(HEAP_PROFILE_FILE));
        if let Err(e) = &heap {
            warn!("Failed to write heap profile: {e}");
        }

        self.facilities.sampler.stop();
        self.facilities.tracer.stop();

        match heap {
            Ok(()) => StopOutcome::Stopped(dir),
            Err(e) => StopOutcome::HeapSnapshotFailed {
                directory: dir,
                error: Error::HeapSnapshot(e),
            },
        }
    }
}

/// Run the heap snapshot, turning a panic into an error so the rest of the
/// stop sequence still runs.
fn write_heap(heap: &mut dyn Snapshotter, sink: &Path) -> std::result::Result<(), FacilityError> {
    panic::catch_unwind(AssertUnwindSafe(|| heap.write(sink))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(FacilityError::Unavailable(format!(
            "heap snapshot panicked: {message}"
        )))
    })
}

fn create_session_dir(output: &OutputConfig) -> Result<PathBuf> {
    tempfile::Builder::new()
        .prefix(&output.prefix)
        .tempdir_in(output.parent_dir())
        .map(tempfile::TempDir::keep)
        .map_err(Error::DirectoryCreation)
}

fn remove_session_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("Failed to remove profiles directory '{}': {e}", dir.display());
    }
}

fn log_started(result: &Result<PathBuf>) {
    match result {
        Ok(dir) => info!("Start writing profiles to '{}'", dir.display()),
        Err(e) => warn!(category = e.category(), "Failed to start writing profiles: {e}"),
    }
}

fn log_stopped(outcome: &StopOutcome) {
    if let Some(dir) = outcome.directory() {
        info!("Stop writing profiles to '{}'", dir.display());
    }
}
