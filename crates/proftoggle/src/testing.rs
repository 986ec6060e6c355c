//! Recording doubles for the facility traits.
//!
//! These let a [`ProfilingSession`](crate::ProfilingSession) be driven
//! without touching pprof, the global trace sink or the allocator, and let
//! tests inject a failure at any step. Only compiled for this crate's own
//! tests or with the `test-support` feature.
//!
//! ```rust
//! use proftoggle::testing::{Call, CallLog, FailurePlan};
//! use proftoggle::{ProfilingConfig, ProfilingSession};
//!
//! let log = CallLog::default();
//! let session = ProfilingSession::with_facilities(
//!     ProfilingConfig::default(),
//!     log.facilities(FailurePlan::default()),
//! );
//!
//! let dir = session.start()?;
//! let outcome = session.stop();
//! assert_eq!(outcome.directory(), Some(dir.as_path()));
//! assert!(matches!(log.calls().last(), Some(Call::Stopped { .. })));
//! # std::fs::remove_dir_all(&dir).ok();
//! # Ok::<(), proftoggle::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::FacilityError;
use crate::facility::{Facilities, Recorder, Snapshotter};

/// Name the recording tracer reports.
pub const TRACER: &str = "test tracer";
/// Name the recording sampler reports.
pub const SAMPLER: &str = "test sampler";

/// One call made into a recording double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `Recorder::start` was called, whether or not it succeeded.
    Started {
        /// Recorder name
        facility: &'static str,
        /// Sink passed in
        sink: PathBuf,
    },
    /// `Recorder::stop` was called.
    Stopped {
        /// Recorder name
        facility: &'static str,
    },
    /// `Snapshotter::write` was called, whether or not it succeeded.
    Snapshot {
        /// Sink passed in
        sink: PathBuf,
    },
}

/// Which steps should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    /// Tracer `start` returns an error
    pub tracer_start: bool,
    /// Sampler `start` returns an error
    pub sampler_start: bool,
    /// Heap `write` returns an error
    pub heap_write: bool,
}

/// Shared, ordered record of every call made into a set of doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Call>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, call: Call) {
        self.lock().push(call);
    }

    /// Snapshot of the calls so far, oldest first.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of `start` calls on the named recorder.
    pub fn starts(&self, facility: &str) -> usize {
        self.lock()
            .iter()
            .filter(|c| matches!(c, Call::Started { facility: f, .. } if *f == facility))
            .count()
    }

    /// Number of `stop` calls on the named recorder.
    pub fn stops(&self, facility: &str) -> usize {
        self.lock()
            .iter()
            .filter(|c| matches!(c, Call::Stopped { facility: f } if *f == facility))
            .count()
    }

    /// Number of heap snapshot writes.
    pub fn snapshots(&self) -> usize {
        self.lock()
            .iter()
            .filter(|c| matches!(c, Call::Snapshot { .. }))
            .count()
    }

    /// Sink passed to the first `start` of the named recorder.
    pub fn first_sink(&self, facility: &str) -> Option<PathBuf> {
        self.lock().iter().find_map(|c| match c {
            Call::Started { facility: f, sink } if *f == facility => Some(sink.clone()),
            _ => None,
        })
    }

    /// Doubles for all three facilities, sharing this log.
    pub fn facilities(&self, plan: FailurePlan) -> Facilities {
        Facilities {
            tracer: Box::new(RecordingRecorder::new(TRACER, self.clone(), plan.tracer_start)),
            sampler: Box::new(RecordingRecorder::new(SAMPLER, self.clone(), plan.sampler_start)),
            heap: Box::new(RecordingSnapshotter::new(self.clone(), plan.heap_write)),
        }
    }
}

/// A [`Recorder`] that logs its calls and optionally refuses to start.
#[derive(Debug)]
pub struct RecordingRecorder {
    name: &'static str,
    log: CallLog,
    fail_start: bool,
}

impl RecordingRecorder {
    /// Create a double named `name` recording into `log`.
    pub const fn new(name: &'static str, log: CallLog, fail_start: bool) -> Self {
        Self {
            name,
            log,
            fail_start,
        }
    }
}

impl Recorder for RecordingRecorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&mut self, sink: &Path) -> Result<(), FacilityError> {
        self.log.push(Call::Started {
            facility: self.name,
            sink: sink.to_path_buf(),
        });
        if self.fail_start {
            return Err(FacilityError::Unavailable(format!("{} refused to start", self.name)));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.log.push(Call::Stopped {
            facility: self.name,
        });
    }
}

/// A [`Snapshotter`] that logs its calls and optionally fails.
#[derive(Debug)]
pub struct RecordingSnapshotter {
    log: CallLog,
    fail: bool,
}

impl RecordingSnapshotter {
    /// Create a double recording into `log`.
    pub const fn new(log: CallLog, fail: bool) -> Self {
        Self { log, fail }
    }
}

impl Snapshotter for RecordingSnapshotter {
    fn write(&mut self, sink: &Path) -> Result<(), FacilityError> {
        self.log.push(Call::Snapshot {
            sink: sink.to_path_buf(),
        });
        if self.fail {
            return Err(FacilityError::Unavailable("heap snapshot refused".into()));
        }
        Ok(())
    }
}
