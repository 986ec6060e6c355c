//! End-to-end run against the real pprof, tracing and heap facilities.
//!
//! pprof and the trace sink are process singletons, so this binary holds a
//! single test.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::fs;
use std::hint::black_box;
use std::time::{Duration, Instant};

use pprof::protos::{Message, Profile};
use proftoggle::cpu::CpuSampler;
use proftoggle::{
    CPU_PROFILE_FILE, CpuConfig, FacilityError, HEAP_PROFILE_FILE, OutputConfig,
    ProfilingConfig, ProfilingSession, Recorder, StopOutcome, TRACE_FILE, trace_layer,
};
use tracing_subscriber::layer::SubscriberExt;

fn busy_work(duration: Duration) -> u64 {
    let deadline = Instant::now() + duration;
    let mut acc = 0u64;
    while Instant::now() < deadline {
        for i in 0..10_000u64 {
            acc = acc.wrapping_add(black_box(i).wrapping_mul(i));
        }
    }
    acc
}

#[test]
fn test_real_facilities_write_all_profiles() {
    // Given: A session rooted in a scratch directory, with the trace layer installed
    let root = tempfile::tempdir().unwrap();
    let config = ProfilingConfig {
        output: OutputConfig {
            root: Some(root.path().to_path_buf()),
            prefix: "e2e".into(),
        },
        cpu: CpuConfig {
            flamegraph: true,
            ..CpuConfig::default()
        },
    };
    let subscriber = tracing_subscriber::registry().with(trace_layer());

    tracing::subscriber::with_default(subscriber, || {
        let session = ProfilingSession::new(config);

        // When: Profiling some work
        let dir = session.start().unwrap();
        assert!(session.is_active());
        assert!(matches!(
            session.start(),
            Err(proftoggle::Error::AlreadyRunning(_))
        ));

        // And: A second pprof guard is refused while the session samples
        let scratch = tempfile::tempdir().unwrap();
        let other_sink = scratch.path().join(CPU_PROFILE_FILE);
        let err = CpuSampler::default().start(&other_sink).unwrap_err();
        assert!(matches!(err, FacilityError::Pprof(pprof::Error::Running)));
        assert!(!other_sink.exists());

        {
            let span = tracing::info_span!("busy");
            let _entered = span.enter();
            let total = busy_work(Duration::from_millis(300));
            tracing::info!(total, "busy-loop-done");
        }
        let outcome = session.stop();

        // Then: All three files are in the returned directory, which is kept
        assert!(!session.is_active());
        assert_eq!(outcome.directory(), Some(dir.as_path()));
        assert!(dir.is_dir());

        let bytes = fs::read(dir.join(CPU_PROFILE_FILE)).unwrap();
        let profile = Profile::decode(bytes.as_slice()).unwrap();
        assert!(!profile.sample.is_empty(), "CPU profile should hold samples");
        let svg = fs::read_to_string(dir.join(CPU_PROFILE_FILE).with_extension("svg")).unwrap();
        assert!(svg.contains("<svg"));

        let trace = fs::read_to_string(dir.join(TRACE_FILE)).unwrap();
        assert!(trace.contains("busy-loop-done"));
        assert!(trace.contains("Start writing profiles to"));

        #[cfg(not(feature = "jemalloc"))]
        {
            assert!(matches!(outcome, StopOutcome::Stopped(_)));
            let heap = fs::read_to_string(dir.join(HEAP_PROFILE_FILE)).unwrap();
            let summary: serde_json::Value = serde_json::from_str(&heap).unwrap();
            assert_eq!(summary["pid"], u64::from(std::process::id()));
        }
        #[cfg(feature = "jemalloc")]
        {
            assert!(matches!(
                outcome,
                StopOutcome::Stopped(_) | StopOutcome::HeapSnapshotFailed { .. }
            ));
            let _ = HEAP_PROFILE_FILE;
        }

        // And: A new session can start once the previous one stopped
        let second = session.start().unwrap();
        assert_ne!(second, dir);
        assert!(session.stop().was_running());
    });

    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 2);
}
