// Copyright 2025 Tarabridge Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Log setup from the `app.logging` config section.
//!
//! Always logs to stdout; optionally also to a daily-rotated file. The
//! `RUST_LOG` environment variable, when set, overrides the configured level.

use std::path::Path;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tarabridge_core::config::LoggingConfig;

/// Installs the global subscriber.
///
/// Returns the guard keeping the file writer alive; hold it for the life of
/// the process.
pub fn init(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let (filter, bad_level) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, false),
        Err(_) => match EnvFilter::try_new(&cfg.level) {
            Ok(filter) => (filter, false),
            Err(_) => (EnvFilter::new("debug"), true),
        },
    };

    let mut guard = None;
    let file_layer = if cfg.file_logging_enabled {
        let path = Path::new(&cfg.filename);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let name = path
            .file_name()
            .map_or_else(|| "tarabridge.log".to_owned(), |n| n.to_string_lossy().into_owned());

        let appender =
            tracing_appender::rolling::daily(dir.unwrap_or_else(|| Path::new(".")), name);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        guard = Some(worker_guard);

        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if bad_level {
        warn!(level = %cfg.level, "unknown log level, defaulting to debug");
    }
    if cfg.syslog_enabled {
        warn!("syslog output is not supported by this build, ignoring syslog_enabled");
    }
    if cfg.file_logging_enabled {
        // Rotation here is time-based; size/backup limits are advisory.
        tracing::debug!(
            file = %cfg.filename,
            max_size_mb = cfg.max_size,
            max_backups = cfg.max_backups,
            max_age_days = cfg.max_age,
            "file logging enabled with daily rotation"
        );
    }

    guard
}
