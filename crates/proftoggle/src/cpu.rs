//! CPU sampling through pprof.
//!
//! The sink file is created when sampling starts so an unusable sink fails
//! fast. The profile is only encoded (pprof protobuf) and written when
//! sampling stops.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use pprof::protos::Message;
use pprof::{ProfilerGuard, ProfilerGuardBuilder};
use tracing::{debug, warn};

use crate::config::CpuConfig;
use crate::error::FacilityError;
use crate::facility::Recorder;

const NAME: &str = "CPU profile";

/// Samples CPU stacks into a pprof protobuf file.
pub struct CpuSampler {
    frequency: i32,
    blocklist: Vec<String>,
    flamegraph: bool,
    running: Option<Running>,
}

struct Running {
    guard: ProfilerGuard<'static>,
    sink: File,
    path: PathBuf,
}

impl CpuSampler {
    /// Build a sampler using the given tuning.
    pub fn from_config(config: &CpuConfig) -> Self {
        Self {
            frequency: config.frequency,
            blocklist: config.blocklist.clone(),
            flamegraph: config.flamegraph,
            running: None,
        }
    }

    /// Whether a pprof guard is currently held.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn write_report(&self, running: Running) -> Result<(), FacilityError> {
        let Running {
            guard,
            mut sink,
            path,
        } = running;
        let report = guard.report().build()?;
        drop(guard);

        let profile = report.pprof()?;
        sink.write_all(&profile.encode_to_vec())?;
        sink.flush()?;

        if self.flamegraph {
            let svg = path.with_extension("svg");
            let file = File::create(&svg)?;
            report.flamegraph(file)?;
            debug!("Flamegraph saved to '{}'", svg.display());
        }
        Ok(())
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::from_config(&CpuConfig::default())
    }
}

impl Recorder for CpuSampler {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start(&mut self, sink: &Path) -> Result<(), FacilityError> {
        if self.running.is_some() {
            return Err(FacilityError::AlreadyRunning(NAME));
        }
        let file = File::create(sink)?;
        let guard = match ProfilerGuardBuilder::default()
            .frequency(self.frequency)
            .blocklist(self.blocklist.as_slice())
            .build()
        {
            Ok(guard) => guard,
            Err(e) => {
                drop(file);
                if let Err(rm) = fs::remove_file(sink) {
                    debug!("Failed to remove unused CPU profile '{}': {rm}", sink.display());
                }
                return Err(e.into());
            },
        };
        self.running = Some(Running {
            guard,
            sink: file,
            path: sink.to_path_buf(),
        });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let path = running.path.clone();
        if let Err(e) = self.write_report(running) {
            warn!("Failed to write CPU profile to '{}': {e}", path.display());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_uses_config() {
        let config = CpuConfig {
            frequency: 99,
            blocklist: vec!["vdso".into()],
            flamegraph: true,
        };
        let sampler = CpuSampler::from_config(&config);
        assert_eq!(sampler.frequency, 99);
        assert_eq!(sampler.blocklist, vec!["vdso".to_string()]);
        assert!(sampler.flamegraph);
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_start_with_unusable_sink_fails_without_guard() {
        // Given: A sink inside a directory that does not exist
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("missing").join("cpu-profile");
        let mut sampler = CpuSampler::default();

        // When: Starting
        let err = sampler.start(&sink).unwrap_err();

        // Then: The file error is reported and nothing keeps running
        assert!(matches!(err, FacilityError::Io(_)));
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut sampler = CpuSampler::default();
        sampler.stop();
        assert!(!sampler.is_running());
    }
}
