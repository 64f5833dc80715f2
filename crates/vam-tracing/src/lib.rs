//! Shared tracing setup for the VAM runtime and its tools.
//!
//! Tests, benchmarks and host programs install their `tracing` subscriber
//! through this crate so that every entry point filters and formats runtime
//! events the same way. The filter is taken from explicit directives, then
//! `RUST_LOG`, then the configured default directive.
//!
//! ```no_run
//! use vam_tracing::{init_global_tracing, TracingConfig};
//!
//! init_global_tracing(&TracingConfig::from_env()).expect("no subscriber installed yet");
//! ```

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::io;
#[doc(hidden)]
pub use tracing;
pub use tracing::{debug, error, info, trace, warn};

use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// How the shared subscriber filters and formats events.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Filter directives such as `vam_runtime=debug,info`.
    pub directives: Option<String>,
    /// Used when neither `directives` nor `RUST_LOG` resolve.
    pub default_directive: String,
    pub include_targets: bool,
    /// Ignored for JSON output.
    pub ansi: bool,
    pub span_events: FmtSpan,
    pub output: TracingOutput,
    /// Route output through the libtest capture writer.
    pub test_writer: bool,
    /// When false, performance spans are still created but never report.
    pub enable_performance_tracing: bool,
    /// Minimum duration in microseconds before a performance span reports.
    pub performance_threshold_us: Option<u64>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    fn preset(default_directive: &str, output: TracingOutput) -> Self {
        Self {
            directives: None,
            default_directive: default_directive.to_string(),
            include_targets: true,
            ansi: !matches!(output, TracingOutput::Json),
            span_events: FmtSpan::NONE,
            output,
            test_writer: false,
            enable_performance_tracing: false,
            performance_threshold_us: None,
        }
    }

    /// Pretty, coloured output for interactive use.
    pub fn for_local() -> Self {
        Self {
            enable_performance_tracing: cfg!(debug_assertions),
            ..Self::preset("info", TracingOutput::Pretty)
        }
    }

    /// JSON lines for log collection.
    pub fn for_ci() -> Self {
        Self::preset("info", TracingOutput::Json)
    }

    /// Compact output captured by the test harness.
    ///
    /// Defaults to `warn` so passing tests stay quiet; `RUST_LOG` still wins.
    pub fn for_tests() -> Self {
        Self {
            ansi: false,
            test_writer: true,
            enable_performance_tracing: true,
            ..Self::preset("warn", TracingOutput::Compact)
        }
    }

    /// Start from the profile named by `VAM_TRACING_PROFILE` and apply the
    /// remaining overrides.
    ///
    /// # Environment Variables
    ///
    /// - `VAM_TRACING_PROFILE` - `local` (default), `ci` or `test`
    /// - `VAM_TRACING_DIRECTIVES` - filter directives
    /// - `VAM_TRACING_FORMAT` - `pretty`, `compact` or `json`
    /// - `VAM_PERF_TRACING` - `true`/`1`/`yes` enables performance spans
    /// - `VAM_PERF_THRESHOLD_US` - minimum span duration to report
    pub fn from_env() -> Self {
        let mut config = match env_value("VAM_TRACING_PROFILE").as_deref().map(str::to_ascii_lowercase) {
            Some(profile) if profile == "ci" => Self::for_ci(),
            Some(profile) if profile == "test" => Self::for_tests(),
            _ => Self::for_local(),
        };

        config.directives = env_value("VAM_TRACING_DIRECTIVES").or(config.directives);

        if let Some(output) = env_value("VAM_TRACING_FORMAT").and_then(|v| TracingOutput::parse(&v)) {
            config.ansi &= output != TracingOutput::Json;
            config.output = output;
        }
        if let Some(flag) = env_value("VAM_PERF_TRACING") {
            config.enable_performance_tracing = matches!(flag.to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Some(threshold) = env_value("VAM_PERF_THRESHOLD_US").and_then(|v| v.parse().ok()) {
            config.performance_threshold_us = Some(threshold);
        }

        config
    }

    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        match &self.directives {
            Some(directives) => {
                EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
            }
            None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))),
        }
    }

    fn writer(&self) -> BoxMakeWriter {
        if self.test_writer {
            BoxMakeWriter::new(TestWriter::default())
        } else {
            BoxMakeWriter::new(io::stderr)
        }
    }
}

/// Non-empty environment variable
fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Formatter layer flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Failure to install the shared subscriber.
#[derive(Debug, Error)]
pub enum TracingSetupError {
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// Usually because a global subscriber is already set.
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
}

/// Build a subscriber for `config` without installing it.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let filter = config.resolve_filter()?;
    Ok(Registry::default().with(format_layer(config)).with(filter))
}

fn format_layer(config: &TracingConfig) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_fmt::layer()
        .with_target(config.include_targets)
        .with_span_events(config.span_events.clone())
        .with_writer(config.writer());

    match config.output {
        TracingOutput::Compact => Box::new(layer.compact().with_ansi(config.ansi)),
        TracingOutput::Pretty => Box::new(layer.pretty().with_ansi(config.ansi)),
        TracingOutput::Json => Box::new(layer.json().with_ansi(false)),
    }
}

/// Install the configured subscriber as the process-wide default.
///
/// Also applies the performance settings of `config` to
/// [`performance::PerformanceSpan`].
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    performance::configure(config.enable_performance_tracing, config.performance_threshold_us);
    build_subscriber(config)?.try_init()?;
    Ok(())
}

/// Install the test subscriber unless one is already installed.
///
/// Safe to call from every test; only the first call in a process takes
/// effect.
pub fn try_init_for_tests() {
    let _ = init_global_tracing(&TracingConfig::for_tests());
}
