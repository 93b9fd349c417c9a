//! Logging system initialization
//!
//! Optional helper for host applications: sets up tracing-based logging with
//! file output to `%APPDATA%\<app_name>\app.log`, rotating the previous
//! session's log to `app.log.1` on startup. Library code only emits
//! `tracing` events and never installs a subscriber on its own.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the logging system for a host application
///
/// Log level defaults to INFO but can be configured via the `RUST_LOG`
/// environment variable. The previous session's log is preserved as
/// `app.log.1`.
pub fn init_logging(app_name: &str) -> Result<()> {
    let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
    let log_dir = PathBuf::from(appdata).join(app_name);
    std::fs::create_dir_all(&log_dir)?;

    rotate_previous_log(&log_dir.join("app.log"))?;

    // Rotation is handled above, once per session
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix("app")
        .filename_suffix("log")
        .build(log_dir)
        .map_err(|e| crate::error::AppLifecycleError::Platform(Box::new(e)))?;

    let subscriber = fmt()
        .with_writer(file_appender)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false) // Disable ANSI colors for file output
        .with_target(true)
        .with_thread_ids(true) // Observer callbacks run off-thread; ids matter here
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| crate::error::AppLifecycleError::Platform(Box::new(e)))?;

    tracing::info!("applifecycle v{} logging initialized", env!("CARGO_PKG_VERSION"));

    Ok(())
}

/// Keep the previous session's log as `app.log.1`
///
/// Called once on startup; the replaced `app.log.1` from two sessions ago
/// is dropped.
fn rotate_previous_log(log_path: &Path) -> Result<()> {
    if !log_path.exists() {
        return Ok(());
    }

    let mut rotated = log_path.as_os_str().to_owned();
    rotated.push(".1");
    std::fs::rename(log_path, PathBuf::from(rotated))?;
    Ok(())
}
