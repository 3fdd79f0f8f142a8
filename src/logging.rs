//! Tracing setup for the scan runner.
//!
//! Wraps `tracing-subscriber` with the output formats the CLI offers:
//! `pretty` for a terminal, `compact` single lines for log files and `json`
//! lines for aggregation. `RUST_LOG` takes precedence over the configured
//! level, so `RUST_LOG=daq_experiment=trace` follows one crate only.
//!
//! ```no_run
//! use rust_daq::logging::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Compact))?;
//! tracing::info!(channel = 0, "Scan started");
//! # Ok(())
//! # }
//! ```

use crate::config::ScanConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One line per event, no colors
    Compact,
    /// One JSON object per event
    Json,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Maximum level when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: OutputFormat,
    /// Emit an event when a span closes, with its busy/idle time. Phase and
    /// channel spans then double as a coarse profile of the scan.
    pub span_timings: bool,
    /// File and line of each event
    pub source_locations: bool,
    /// Colors in `pretty` output
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            span_timings: false,
            source_locations: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Pretty output at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level and format of the `application` section.
    pub fn from_scan_config(config: &ScanConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?)
            .with_format(config.application.log_format))
    }

    /// Use another line layout.
    pub fn with_format(self, format: OutputFormat) -> Self {
        Self { format, ..self }
    }

    /// Report busy/idle time when spans close.
    pub fn with_span_timings(self, span_timings: bool) -> Self {
        Self {
            span_timings,
            ..self
        }
    }

    fn layer(&self) -> BoxedLayer {
        let span_events = if self.span_timings {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        // Readout and analysis run on named threads
        let base = fmt::layer()
            .with_thread_names(true)
            .with_file(self.source_locations)
            .with_line_number(self.source_locations)
            .with_span_events(span_events);

        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().with_ansi(false).boxed(),
        }
    }
}

/// Initialize tracing from the `application` section of a scan config.
pub fn init_from_config(config: &ScanConfig) -> Result<(), String> {
    init(TracingConfig::from_scan_config(config)?)
}

/// Install the global subscriber.
///
/// A subscriber installed earlier (a second call, a test harness, an
/// embedding application) is left in place and `Ok(())` is returned.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

    match tracing_subscriber::registry()
        .with(config.layer().with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {}", e)),
    }
}

/// Parse a configured level name, case-insensitive.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match Level::from_str(level) {
        // Numeric levels ("1".."5") are accepted by tracing but not documented for the config
        Ok(parsed) if !level.trim().starts_with(|c: char| c.is_ascii_digit()) => Ok(parsed),
        _ => Err(format!(
            "Unknown log level '{}', expected trace, debug, info, warn or error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert_eq!(parse_log_level("Error"), Ok(Level::ERROR));
        assert!(parse_log_level("verbose").is_err());
        assert!(parse_log_level("3").is_err());
    }

    #[test]
    fn test_from_application_section() {
        let mut config = ScanConfig::default();
        config.application.log_level = "debug".into();
        config.application.log_format = OutputFormat::Json;

        let tracing_config = TracingConfig::from_scan_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, OutputFormat::Json);
        assert!(!tracing_config.span_timings);
    }

    #[test]
    fn test_second_init_keeps_first_subscriber() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Compact)
            .with_span_timings(true);
        assert!(init(config.clone()).is_ok());
        assert!(init(config.with_format(OutputFormat::Json)).is_ok());
    }
}
