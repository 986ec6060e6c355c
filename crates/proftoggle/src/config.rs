//! Configuration for profiling sessions.
//!
//! Settings are stored in TOML and can be overridden from the environment.
//! Every field has a default, so an empty file (or no file at all) is valid.
//!
//! ## Configuration Sources
//!
//! 1. **Defaults**: see [`ProfilingConfig::default`]
//! 2. **Config file**: `profiling.toml` in the platform config directory
//! 3. **Environment variables**: `PROFTOGGLE_*` prefix
//!
//! ## Example Configuration File
//!
//! ```toml
//! [output]
//! root = "/var/tmp"
//! prefix = "profiles"
//!
//! [cpu]
//! frequency = 1000
//! blocklist = ["libc", "libgcc", "pthread", "vdso"]
//! flamegraph = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable overriding [`OutputConfig::root`].
pub const ENV_ROOT: &str = "PROFTOGGLE_ROOT";
/// Environment variable overriding [`OutputConfig::prefix`].
pub const ENV_PREFIX: &str = "PROFTOGGLE_PREFIX";
/// Environment variable overriding [`CpuConfig::frequency`].
pub const ENV_CPU_FREQUENCY: &str = "PROFTOGGLE_CPU_FREQUENCY";
/// Environment variable overriding [`CpuConfig::flamegraph`].
pub const ENV_FLAMEGRAPH: &str = "PROFTOGGLE_FLAMEGRAPH";

/// Top-level profiling configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Where session directories are created
    pub output: OutputConfig,
    /// CPU sampler tuning
    pub cpu: CpuConfig,
}

/// Placement of the per-session temporary directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Parent directory for session directories.
    ///
    /// `None` uses the system temporary directory.
    pub root: Option<PathBuf>,

    /// Name prefix of each session directory.
    ///
    /// A random suffix is appended, so concurrent processes never collide.
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: "profiles".to_string(),
        }
    }
}

impl OutputConfig {
    /// Directory under which session directories are created.
    pub fn parent_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// CPU sampler tuning passed through to pprof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Sampling frequency in Hz.
    pub frequency: i32,

    /// Shared objects whose frames are skipped while sampling.
    ///
    /// Unwinding through these is unreliable and can deadlock inside the
    /// signal handler.
    pub blocklist: Vec<String>,

    /// Also render `cpu-profile.svg` next to the protobuf profile on stop.
    pub flamegraph: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            frequency: 1000,
            blocklist: ["libc", "libgcc", "pthread", "vdso"]
                .into_iter()
                .map(String::from)
                .collect(),
            flamegraph: false,
        }
    }
}

impl ProfilingConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, is not valid
    /// TOML, or fails [`validate`](Self::validate).
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults.
    ///
    /// The file is `profiling.toml` under, for example,
    /// `~/.config/proftoggle/` on Linux. A missing file is not an error.
    pub fn load_default() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;
        Ok(())
    }

    /// Defaults, then the default config file, then environment overrides.
    ///
    /// Used by the process-wide session. Problems are logged and the
    /// offending layer is skipped rather than failing.
    pub fn from_env() -> Self {
        let mut config = Self::load_default().unwrap_or_else(|e| {
            tracing::warn!("Ignoring profiling config file: {e}");
            Self::default()
        });
        let fallback = config.clone();
        if let Err(e) = config.apply_env_overrides(|key| std::env::var(key).ok()) {
            tracing::warn!("Ignoring profiling environment overrides: {e}");
            return fallback;
        }
        config
    }

    /// Apply `PROFTOGGLE_*` overrides read through `lookup`.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a value does not parse or the result
    /// fails validation.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.is_empty()) {
            self.output.root = Some(PathBuf::from(root));
        }
        if let Some(prefix) = lookup(ENV_PREFIX) {
            self.output.prefix = prefix;
        }
        if let Some(freq) = lookup(ENV_CPU_FREQUENCY) {
            self.cpu.frequency = freq.trim().parse().map_err(|e| {
                Error::Config(format!("{ENV_CPU_FREQUENCY}={freq:?} is not an integer: {e}"))
            })?;
        }
        if let Some(flag) = lookup(ENV_FLAMEGRAPH) {
            self.cpu.flamegraph = parse_bool(&flag).ok_or_else(|| {
                Error::Config(format!("{ENV_FLAMEGRAPH}={flag:?} is not a boolean"))
            })?;
        }
        self.validate()
    }

    /// Check values that would otherwise fail later, mid-start.
    pub fn validate(&self) -> Result<()> {
        if self.cpu.frequency <= 0 {
            return Err(Error::Config(format!(
                "cpu.frequency must be positive, got {}",
                self.cpu.frequency
            )));
        }
        if self.output.prefix.is_empty() {
            return Err(Error::Config("output.prefix must not be empty".into()));
        }
        if self.output.prefix.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "output.prefix must not contain path separators: {:?}",
                self.output.prefix
            )));
        }
        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "outfitter", "proftoggle")
            .map(|dirs| dirs.config_dir().join("profiling.toml"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
