//! Generic logger utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::Local;
use colored::{ColoredString, Colorize};
use fern;
use log::{self, info};
use std::path::PathBuf;

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, thiserror::Error)]
pub enum LoggerInitError {
    #[error("Cannot create the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("Cannot apply the logger configuration: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// Logs to stdout, and additionally to `log_file_path` if one is given.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(
    min_level: LevelFilter,
    log_file_path: Option<PathBuf>,
) -> Result<(), LoggerInitError> {
    // Setup the logger using fern's builder pattern
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            // If debug or trace include the target, otherwise don't include it
            if record.level() > log::Level::Info {
                out.finish(format_args!(
                    "[{} {}] {}: {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    level_to_str(record.level()),
                    record.target(),
                    message
                ))
            } else {
                out.finish(format_args!(
                    "[{} {}] {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    level_to_str(record.level()),
                    message
                ))
            }
        })
        .level(min_level)
        .chain(std::io::stdout());

    if let Some(ref path) = log_file_path {
        dispatch = dispatch.chain(
            fern::log_file(path).map_err(LoggerInitError::LogFileInitError)?,
        );
    }

    dispatch.apply().map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Log level: {:?}", min_level);
    if let Some(path) = log_file_path {
        info!("    Log file path: {:?}", path);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the string representation of a log level
fn level_to_str(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info => "INF".normal(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold(),
    }
}
