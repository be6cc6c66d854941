use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;

use crate::domain::reservation_pool::utils::statistics::POOL_ANALYTICS_TARGET;

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "pool.log";

/// Initializes the global logger.
///
/// Call once at the beginning of `main`. The level is taken from `RUST_LOG`
/// (`RUST_LOG=debug`, `RUST_LOG=warn`, ...) and defaults to `info`.
///
/// Lifecycle messages go to stderr (colored) and to `logs/pool.log`. Per-tick
/// analytics records are only written to the file.
pub fn init() {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory at '{}': {}", LOG_DIR, e);
    }

    let log_file_path = format!("{}/{}", LOG_DIR, LOG_FILE);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new().level(log_level_filter).level_for("serde", LevelFilter::Warn).level_for("uuid", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .filter(|metadata| metadata.target() != POOL_ANALYTICS_TARGET)
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_config = match fern::log_file(&log_file_path) {
        Ok(file) => Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
            })
            .chain(file),
        Err(e) => {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            Dispatch::new()
        }
    };

    base_config.chain(console_config).chain(file_config).apply().unwrap_or_else(|e| {
        eprintln!("Failed to apply logger configuration: {}", e);
    });

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}
