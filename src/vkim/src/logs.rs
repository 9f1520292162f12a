/*
 * vKIM mail gateway
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vkim_common::re::anyhow;
use vkim_config::{Config, LogFormat};

/// Install the global subscriber: stdout, and a file rotated daily when
/// `logs.filepath` is set. `RUST_LOG` takes precedence over `logs.level`.
///
/// The returned guard must be held until the end of the program, the file
/// is flushed when it is dropped.
///
/// # Errors
///
/// * `logs.level` is not a valid filter
/// * a global subscriber is already installed
pub fn initialize(
    config: &Config,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logs.level))?;

    let (writer, guard) = match &config.logs.filepath {
        Some(filepath) => {
            let directory = filepath
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."));
            let prefix = filepath
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("'{}' is not a file", filepath.display()))?;

            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, prefix));
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let json = config.logs.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with(
            writer
                .clone()
                .filter(|_| !json)
                .map(|writer| tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
        )
        .with(
            writer
                .filter(|_| json)
                .map(|writer| tracing_subscriber::fmt::layer().json().with_writer(writer)),
        )
        .try_init()?;

    Ok(guard)
}
