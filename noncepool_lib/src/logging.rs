// Copyright (C) 2025 NoncePool Developers (see AUTHORS)
//
// This file is part of NoncePool
//
// NoncePool is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// NoncePool is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// NoncePool. If not, see <https://www.gnu.org/licenses/>.

use crate::config::LoggingConfig;
use std::error::Error;
use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILENAME: &str = "noncepool.log";

/// Split a configured log file path into the directory and file name the
/// rolling appender wants.
fn log_file_location(file_path: &str) -> (&Path, &str) {
    let file_path = Path::new(file_path);
    let directory = file_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let filename = file_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILENAME);
    (directory, filename)
}

/// Sets up logging according to the logging configuration
///
/// Hold on to the returned guard, dropping it stops the file writer.
pub fn setup_logging(
    logging_config: &LoggingConfig,
) -> Result<Option<non_blocking::WorkerGuard>, Box<dyn Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging_config.level));

    let console_layer = if logging_config.console.unwrap_or(true) {
        Some(fmt::layer())
    } else {
        None
    };

    let (file_layer, guard) = if let Some(file_path) = &logging_config.file {
        let (directory, filename) = log_file_location(file_path);
        std::fs::create_dir_all(directory)?;

        let file_appender = RollingFileAppender::new(Rotation::DAILY, directory, filename);
        let (non_blocking_appender, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false);

        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(file_path) = &logging_config.file {
        info!("File logging is enabled, writing to: {}", file_path);
    }
    Ok(guard)
}
