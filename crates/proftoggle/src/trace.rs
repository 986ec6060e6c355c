//! Execution tracing on top of `tracing`.
//!
//! The trace is the stream of spans and events the process emits while a
//! session is active, written as JSON lines. Two pieces cooperate:
//!
//! - [`trace_layer`] is installed once in the application's subscriber (see
//!   [`init_logging`](crate::logging::init_logging)). It is disabled by its
//!   own filter whenever no trace is running, so it costs one atomic load per
//!   callsite check.
//! - [`ExecutionTracer`] attaches and detaches the process-wide sink the
//!   layer writes to.
//!
//! Without the layer installed a trace still starts and stops cleanly; the
//! file is simply left empty.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{Subscriber, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::registry::LookupSpan;

use crate::error::FacilityError;
use crate::facility::Recorder;

const NAME: &str = "execution trace";

static TRACE_SINK: Mutex<Option<BufWriter<File>>> = Mutex::new(None);
static TRACE_ACTIVE: AtomicBool = AtomicBool::new(false);

fn lock_sink() -> MutexGuard<'static, Option<BufWriter<File>>> {
    TRACE_SINK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether an execution trace is currently being written.
pub fn is_tracing() -> bool {
    TRACE_ACTIVE.load(Ordering::Acquire)
}

/// A `tracing` layer that records into the active execution trace.
///
/// Emits one JSON object per event, plus span open/close records, each with
/// the current span stack and thread ids.
pub fn trace_layer<S>() -> impl Layer<S> + Send + Sync
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_writer(TraceWriter)
        .with_filter(filter_fn(|_| is_tracing()))
}

/// `MakeWriter` forwarding to the active trace sink, or discarding.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceWriter;

impl Write for TraceWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match lock_sink().as_mut() {
            Some(sink) => sink.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        lock_sink().as_mut().map_or(Ok(()), Write::flush)
    }
}

impl<'a> MakeWriter<'a> for TraceWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        *self
    }
}

/// Attaches the process-wide trace sink for the duration of a session.
///
/// The sink is a process singleton: a second tracer cannot start while any
/// tracer is running.
#[derive(Debug, Default)]
pub struct ExecutionTracer {
    owns_sink: bool,
}

impl ExecutionTracer {
    /// A tracer that is not yet running.
    pub const fn new() -> Self {
        Self { owns_sink: false }
    }
}

impl Recorder for ExecutionTracer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start(&mut self, sink: &Path) -> Result<(), FacilityError> {
        {
            let mut slot = lock_sink();
            if slot.is_some() {
                return Err(FacilityError::AlreadyRunning(NAME));
            }
            *slot = Some(BufWriter::new(File::create(sink)?));
        }
        self.owns_sink = true;
        TRACE_ACTIVE.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        if !std::mem::take(&mut self.owns_sink) {
            return;
        }
        TRACE_ACTIVE.store(false, Ordering::Release);
        // Detach before flushing: the warn! below must not re-enter the lock.
        let detached = lock_sink().take();
        if let Some(mut writer) = detached {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush execution trace: {e}");
            }
        }
    }
}

impl Drop for ExecutionTracer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    // The sink is process-wide, so everything touching it lives in one test.
    #[test]
    fn test_tracer_lifecycle_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("trace");
        let second = dir.path().join("trace-2");
        let subscriber = tracing_subscriber::registry().with(trace_layer());

        tracing::subscriber::with_default(subscriber, || {
            // Given: No trace running, writes and events are dropped
            assert_eq!(TraceWriter.write(b"dropped").unwrap(), 7);
            tracing::info!("before-trace");

            // When: A tracer starts and the process emits spans and events
            let mut tracer = ExecutionTracer::new();
            tracer.start(&first).unwrap();
            assert!(is_tracing());
            {
                let span = tracing::info_span!("work", unit = 7);
                let _entered = span.enter();
                tracing::info!(answer = 42, "inside-trace");
            }

            // Then: A second tracer is refused while the first runs
            let mut other = ExecutionTracer::new();
            let err = other.start(&second).unwrap_err();
            assert!(matches!(err, FacilityError::AlreadyRunning(_)));
            assert!(!second.exists());

            // And: Stopping detaches the sink
            other.stop();
            assert!(is_tracing(), "a tracer that never started must not stop the trace");
            tracer.stop();
            assert!(!is_tracing());
            tracing::info!("after-trace");
        });

        let contents = std::fs::read_to_string(&first).unwrap();
        assert!(contents.contains("inside-trace"));
        assert!(contents.contains("\"answer\":42"));
        assert!(contents.contains("\"work\""));
        assert!(!contents.contains("before-trace"));
        assert!(!contents.contains("after-trace"));
        assert!(!contents.contains("dropped"));
        for line in contents.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
}
