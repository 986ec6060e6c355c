//! Random start/stop/toggle sequences checked against a two-state model.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::fs;
use std::path::Path;

use proftoggle::testing::{CallLog, FailurePlan, SAMPLER, TRACER};
use proftoggle::{
    Error, OutputConfig, ProfilingConfig, ProfilingSession, StopOutcome, Toggled,
};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Toggle,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Start), Just(Op::Stop), Just(Op::Toggle)]
}

fn plan() -> impl Strategy<Value = FailurePlan> {
    (
        proptest::bool::weighted(0.2),
        proptest::bool::weighted(0.2),
        proptest::bool::weighted(0.3),
    )
        .prop_map(|(tracer_start, sampler_start, heap_write)| FailurePlan {
            tracer_start,
            sampler_start,
            heap_write,
        })
}

/// What the session should look like after each operation.
#[derive(Debug, Default)]
struct Model {
    active: bool,
    sessions: usize,
    tracer_starts: usize,
    tracer_stops: usize,
    sampler_starts: usize,
    sampler_stops: usize,
    snapshots: usize,
}

impl Model {
    fn start(&mut self, plan: FailurePlan, result: &Result<std::path::PathBuf, Error>) {
        if self.active {
            assert!(matches!(result, Err(Error::AlreadyRunning(_))));
            return;
        }
        self.tracer_starts += 1;
        if plan.tracer_start {
            assert!(matches!(result, Err(Error::TracerStart(_))));
            return;
        }
        self.sampler_starts += 1;
        if plan.sampler_start {
            self.tracer_stops += 1;
            assert!(matches!(result, Err(Error::SamplerStart(_))));
            return;
        }
        assert!(result.is_ok());
        self.sessions += 1;
        self.active = true;
    }

    fn stop(&mut self, plan: FailurePlan, outcome: &StopOutcome) {
        if !self.active {
            assert!(matches!(outcome, StopOutcome::NotRunning));
            return;
        }
        self.snapshots += 1;
        self.sampler_stops += 1;
        self.tracer_stops += 1;
        self.active = false;
        if plan.heap_write {
            assert!(matches!(outcome, StopOutcome::HeapSnapshotFailed { .. }));
        } else {
            assert!(matches!(outcome, StopOutcome::Stopped(_)));
        }
    }

    fn check(&self, session: &ProfilingSession, log: &CallLog, root: &Path) {
        assert_eq!(session.is_active(), self.active);
        assert_eq!(session.active_directory().is_some(), self.active);
        assert_eq!(log.starts(TRACER), self.tracer_starts);
        assert_eq!(log.stops(TRACER), self.tracer_stops);
        assert_eq!(log.starts(SAMPLER), self.sampler_starts);
        assert_eq!(log.stops(SAMPLER), self.sampler_stops);
        assert_eq!(log.snapshots(), self.snapshots);
        assert_eq!(fs::read_dir(root).unwrap().count(), self.sessions);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_session_follows_model(plan in plan(), ops in prop::collection::vec(op(), 1..24)) {
        let root = tempfile::tempdir().unwrap();
        let config = ProfilingConfig {
            output: OutputConfig {
                root: Some(root.path().to_path_buf()),
                ..OutputConfig::default()
            },
            ..ProfilingConfig::default()
        };
        let log = CallLog::default();
        let session = ProfilingSession::with_facilities(config, log.facilities(plan));
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Start => model.start(plan, &session.start()),
                Op::Stop => model.stop(plan, &session.stop()),
                Op::Toggle => match session.toggle() {
                    Ok(Toggled::Started(dir)) => model.start(plan, &Ok(dir)),
                    Ok(Toggled::Stopped(outcome)) => model.stop(plan, &outcome),
                    Err(e) => model.start(plan, &Err(e)),
                },
            }
            model.check(&session, &log, root.path());
        }
    }
}
