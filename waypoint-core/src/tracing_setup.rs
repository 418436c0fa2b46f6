//! Tracing setup for Waypoint
//!
//! Console output at the level the operator picks, plus a full trace of the
//! current run on disk.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run log file inside the logs directory.
pub const LOG_FILE_NAME: &str = "waypoint-last-run.log";

/// Initialize tracing with dual output: console (user level) + file (full trace)
///
/// `RUST_LOG` overrides the console level when set. The file at
/// `{logs_dir}/waypoint-last-run.log` (default `./logs`) is truncated on every
/// run and always captures `trace`.
///
/// # Errors
///
/// - `std::io::Error` - If the logs directory cannot be created or the log file cannot be opened
/// - `tracing_subscriber::util::TryInitError` - If a global subscriber is already installed
pub fn init_tracing(
    console_level: CliLogLevel,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(LOG_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.console_directive()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Tracing initialized: console={:?}, debug_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    Info,
    /// Debug and above
    Debug,
    /// All messages including per-shipment tick tracing
    Trace,
}

/// Crates whose events the console level applies to; everything else is
/// capped at `warn` unless the operator asks for `trace`.
const WAYPOINT_TARGETS: [&str; 4] = ["waypoint_core", "waypoint_web", "waypoint_sim", "waypoint"];

impl CliLogLevel {
    fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }

    /// `EnvFilter` directive for the console layer.
    ///
    /// Redis, sqlx and HTTP client chatter stays at `warn` so per-tick
    /// debugging does not drown in connection pool events.
    ///
    /// # Examples
    /// ```
    /// use waypoint_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(
    ///     CliLogLevel::Debug.console_directive(),
    ///     "warn,waypoint_core=debug,waypoint_web=debug,waypoint_sim=debug,waypoint=debug"
    /// );
    /// ```
    pub fn console_directive(self) -> String {
        let level = self.as_tracing_level().as_str().to_lowercase();
        let base = match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Trace => "trace",
            _ => "warn",
        };
        WAYPOINT_TARGETS
            .iter()
            .fold(base.to_string(), |directive, target| {
                format!("{directive},{target}={level}")
            })
    }
}
