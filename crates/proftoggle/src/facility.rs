//! Capability traits for the profiling facilities a session drives.
//!
//! A [`ProfilingSession`](crate::ProfilingSession) never talks to pprof,
//! tracing or the allocator directly. It sequences calls through these traits,
//! so the real facilities in [`cpu`](crate::cpu), [`trace`](crate::trace) and
//! [`heap`](crate::heap) can be swapped for test doubles (see the `testing`
//! module, enabled by the `test-support` feature).

use std::path::Path;

use crate::error::FacilityError;
use crate::{ProfilingConfig, cpu::CpuSampler, heap::HeapSnapshotter, trace::ExecutionTracer};

/// File the execution tracer writes inside the session directory.
pub const TRACE_FILE: &str = "trace";
/// File the CPU sampler writes inside the session directory.
pub const CPU_PROFILE_FILE: &str = "cpu-profile";
/// File the heap snapshotter writes inside the session directory.
pub const HEAP_PROFILE_FILE: &str = "heap-profile";

/// A facility that records continuously between `start` and `stop`.
pub trait Recorder: Send {
    /// Short human-readable name used in log lines and errors.
    fn name(&self) -> &'static str;

    /// Begin recording into the file at `sink`.
    ///
    /// Must leave nothing running when it returns an error.
    fn start(&mut self, sink: &Path) -> Result<(), FacilityError>;

    /// Stop recording and flush output.
    ///
    /// Infallible from the session's point of view: implementations log
    /// their own failures. Calling it when not recording is a no-op.
    fn stop(&mut self);
}

/// A facility that dumps a one-shot snapshot.
pub trait Snapshotter: Send {
    /// Write a snapshot into the file at `sink`.
    fn write(&mut self, sink: &Path) -> Result<(), FacilityError>;
}

/// The three facilities a session coordinates.
pub struct Facilities {
    /// Records the execution trace into [`TRACE_FILE`].
    pub tracer: Box<dyn Recorder>,
    /// Samples CPU usage into [`CPU_PROFILE_FILE`].
    pub sampler: Box<dyn Recorder>,
    /// Dumps the heap into [`HEAP_PROFILE_FILE`].
    pub heap: Box<dyn Snapshotter>,
}

impl Facilities {
    /// Build the real facilities, tuned by `config`.
    pub fn from_config(config: &ProfilingConfig) -> Self {
        Self {
            tracer: Box::new(ExecutionTracer::new()),
            sampler: Box::new(CpuSampler::from_config(&config.cpu)),
            heap: Box::new(HeapSnapshotter::new()),
        }
    }
}

impl std::fmt::Debug for Facilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facilities")
            .field("tracer", &self.tracer.name())
            .field("sampler", &self.sampler.name())
            .finish_non_exhaustive()
    }
}
