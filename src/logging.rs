//! Structured logging utilities for xlab
//!
//! All logs use structured fields and are written to standard error, so a
//! driver's standard output stays reserved for probe answers.
//!
//! # Log Format Conventions
//!
//! - `operation`: The operation being performed (e.g., "assign", "complete")
//! - `status`: The result status ("success", "hit", "error")
//! - `fingerprint`: Cache key (hex-encoded)
//! - `dir`: Run directory
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! let fingerprint = "0e6a...";
//! info!(
//!     operation = "lookup",
//!     status = "hit",
//!     fingerprint = %fingerprint,
//!     "using cached run"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "xlab" instead of the full module path
struct XlabFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for XlabFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(xlab)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(xlab): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without colors (for CI and captured logs)
    Compact,
    /// JSON lines (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (XLAB_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(
            &std::env::var("XLAB_LOG_FORMAT").unwrap_or_default(),
            std::env::var("CI").is_ok(),
        )
    }

    fn parse(value: &str, ci: bool) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "info", "warn")
/// - `XLAB_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// Calling it more than once is harmless; later calls keep the first subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(XlabFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(XlabFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const ASSIGN: &str = "assign";
    pub const COMPLETE: &str = "complete";
    pub const MERGE: &str = "merge";
    pub const ENTER: &str = "enter";
    pub const QUERY: &str = "query";
    pub const RUN: &str = "run";
    pub const PROBE: &str = "probe";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const HIT: &str = "hit";
    pub const MISS: &str = "miss";
    pub const BUSY: &str = "busy";
    pub const ERROR: &str = "error";
}
