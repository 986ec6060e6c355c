//! Logging initialization.
//!
//! Session status lines go through `tracing`. Applications that already own
//! a subscriber only need to add [`trace_layer`] to it; everyone else can call
//! [`init_logging`], which installs a stderr formatter plus that layer.

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::trace::trace_layer;
use crate::{Error, Result};

/// Output format for the stderr log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Settings for [`init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default directive, e.g. `"info"` or `"proftoggle=debug,warn"`.
    ///
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// stderr output format
    pub format: LogFormat,
    /// Install the execution-trace layer so sessions record a trace.
    pub capture_trace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
            capture_trace: true,
        }
    }
}

impl LoggingConfig {
    /// The stderr filter: `RUST_LOG` if set and valid, else `level`.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse(&self.level)
            .map_err(|e| Error::Logging(format!("invalid log level {:?}: {e}", self.level)))
    }
}

/// Install the global subscriber.
///
/// The stderr layer is filtered by [`LoggingConfig::env_filter`]; the trace
/// layer has its own filter and records every level while a session runs.
///
/// # Errors
///
/// Returns [`Error::Logging`] if the level is invalid or a global subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let stderr: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(stderr.with_filter(filter))
        .with(config.capture_trace.then(trace_layer))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
