//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_FILE: &str = "sensorhub.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/sensorhub/logs/`, never to stdout
/// which carries the bus.
/// Log level is controlled by `SENSORHUB_LOG` environment variable.
///
/// # Examples
/// ```bash
/// SENSORHUB_LOG=debug sensorhub
/// SENSORHUB_LOG=sensorhub_app=trace sensorhub
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE);

    let env_filter = EnvFilter::try_from_env("SENSORHUB_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("sensorhub starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Filter used when `SENSORHUB_LOG` is unset
fn default_filter() -> &'static str {
    "sensorhub=info,sensorhub_core=info,sensorhub_io=info,sensorhub_app=info,warn"
}

fn get_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("sensorhub").join("logs")
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> PathBuf {
    get_log_directory().join(LOG_FILE)
}
