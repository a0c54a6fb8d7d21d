//! Tracing setup shared by the session library and the peer CLI.
//!
//! All output goes to stderr so that a peer can print reply bodies on stdout
//! without log lines mixed in.
//!
//! ```ignore
//! use zmap_remote_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::cli_debug())?;
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Target prefix every crate in this workspace logs under.
pub const LOG_TARGET_PREFIX: &str = "zmap_remote";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to set global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("failed to parse log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Multi-line, for reading a single session closely.
    Pretty,
    #[default]
    Compact,
    /// One JSON object per event, for long running listeners.
    Json,
}

/// What `init_tracing` installs.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for `zmap_remote*` targets when no filter is given.
    pub level: Level,
    pub format: TracingOutputFormat,
    /// Show file, line and target of each event.
    pub show_source: bool,
    pub timestamps: bool,
    /// Log span open and close.
    pub span_events: bool,
    /// Filter directive. Overrides both `level` and `RUST_LOG`.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: TracingOutputFormat::Compact,
            show_source: false,
            timestamps: true,
            span_events: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// `--debug` runs of the CLI: everything from our crates, no clock.
    #[must_use]
    pub fn cli_debug() -> Self {
        Self {
            level: Level::DEBUG,
            show_source: true,
            timestamps: false,
            ..Self::default()
        }
    }

    /// A peer left running as a listener, logging JSON for collection.
    #[must_use]
    pub fn listener() -> Self {
        Self {
            level: Level::INFO,
            format: TracingOutputFormat::Json,
            show_source: true,
            span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, directive: impl Into<String>) -> Self {
        self.filter = Some(directive.into());
        self
    }

    /// Directive used when neither `filter` nor `RUST_LOG` is set.
    pub fn default_directive(&self) -> String {
        format!("{LOG_TARGET_PREFIX}={}", self.level)
    }

    fn build_filter(&self) -> Result<EnvFilter, TracingError> {
        match &self.filter {
            Some(directive) => Ok(EnvFilter::try_new(directive)?),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.default_directive()))),
        }
    }

    fn output_layer(&self) -> Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(self.show_source)
            .with_line_number(self.show_source)
            .with_target(self.show_source)
            .with_span_events(spans);

        match (self.format, self.timestamps) {
            (TracingOutputFormat::Pretty, true) => layer.pretty().boxed(),
            (TracingOutputFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (TracingOutputFormat::Compact, true) => layer.compact().boxed(),
            (TracingOutputFormat::Compact, false) => layer.compact().without_time().boxed(),
            (TracingOutputFormat::Json, _) => layer.json().boxed(),
        }
    }
}

/// Installs the global subscriber described by `config`.
///
/// Fails if a global subscriber is already installed or the filter
/// directive does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let subscriber = tracing_subscriber::registry()
        .with(config.build_filter()?)
        .with(config.output_layer());
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
