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

//! YAML configuration of the replicator.
//!
//! All timeouts are integer milliseconds. Every field that has a sensible
//! default gets one, so a minimal config only names the connections and the
//! table mappings.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rule::CastDirective;
use crate::value::Value;

const DEFAULT_DATA_FILE: &str = "/etc/tarabridge/state.info";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9100";
const DEFAULT_LOG_LEVEL: &str = "debug";
const DEFAULT_LOG_FILENAME: &str = "/var/log/tarabridge.log";
const DEFAULT_LOG_FILE_MAX_SIZE: u64 = 256; // megabytes
const DEFAULT_LOG_FILE_MAX_BACKUPS: u32 = 3;
const DEFAULT_LOG_FILE_MAX_AGE: u32 = 5; // days
const DEFAULT_DUMP_EXEC_PATH: &str = "/usr/bin/mysqldump";
const DEFAULT_CHARSET: &str = "utf8mb4_unicode_ci";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 1000;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid YAML or misses required fields.
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    pub replication: ReplicationConfig,
}

impl Config {
    /// Reads and parses a YAML config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] on unreadable or malformed files.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path of the checkpoint file.
    pub data_file: String,
    /// Address the metrics endpoint listens on.
    pub listen_addr: String,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_file: DEFAULT_DATA_FILE.to_owned(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            health: HealthConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Health thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Replica lag above which the pipeline logs a health warning.
    pub seconds_behind_master: Option<u32>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub syslog_enabled: bool,
    #[serde(rename = "file_enabled")]
    pub file_logging_enabled: bool,
    #[serde(rename = "file_name")]
    pub filename: String,
    /// Megabytes per log file before rotation.
    #[serde(rename = "file_max_size")]
    pub max_size: u64,
    /// Rotated files kept.
    #[serde(rename = "file_max_backups")]
    pub max_backups: u32,
    /// Days a rotated file is kept.
    #[serde(rename = "file_max_age")]
    pub max_age: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_owned(),
            syslog_enabled: false,
            file_logging_enabled: false,
            filename: DEFAULT_LOG_FILENAME.to_owned(),
            max_size: DEFAULT_LOG_FILE_MAX_SIZE,
            max_backups: DEFAULT_LOG_FILE_MAX_BACKUPS,
            max_age: DEFAULT_LOG_FILE_MAX_AGE,
        }
    }
}

/// Replication topology and mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Unique replica ID in the MySQL cluster; omit to auto-generate.
    #[serde(default)]
    pub server_id: Option<u32>,
    /// GTID-based replication when `true`, binlog file position otherwise.
    #[serde(default = "default_gtid_mode")]
    pub gtid_mode: bool,
    /// Source connection.
    pub mysql: SourceConnectConfig,
    /// Destination connection.
    pub tarantool: DestConnectConfig,
    /// Table-to-space mappings.
    pub mappings: Vec<Mapping>,
}

const fn default_gtid_mode() -> bool {
    true
}

/// MySQL connection and dump settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConnectConfig {
    pub addr: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_charset")]
    pub charset: String,
    #[serde(default)]
    pub dump: DumpConfig,
}

fn default_charset() -> String {
    DEFAULT_CHARSET.to_owned()
}

/// Initial-dump settings handed to the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Absolute path of the mysqldump binary.
    #[serde(rename = "dump_exec_path")]
    pub exec_path: String,
    /// Set when the replication user may not use `--master-data`.
    pub skip_master_data: bool,
    /// Extra command-line options passed through to mysqldump.
    pub extra_options: Vec<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            exec_path: DEFAULT_DUMP_EXEC_PATH.to_owned(),
            skip_master_data: false,
            extra_options: Vec::new(),
        }
    }
}

/// Tarantool connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestConnectConfig {
    pub addr: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Retry budget of the destination client; 0 means the built-in default.
    #[serde(default)]
    pub max_retries: usize,
    /// Connect timeout, milliseconds.
    #[serde(default = "default_connect_timeout", rename = "connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Per-request timeout, milliseconds.
    #[serde(default = "default_request_timeout", rename = "request_timeout")]
    pub request_timeout_ms: u64,
}

const fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl DestConnectConfig {
    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// One source-table-to-space binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub source: SourceMapping,
    pub dest: DestMapping,
}

/// Source side of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMapping {
    pub schema: String,
    pub table: String,
    /// Explicit primary-key columns; empty means "use the table's key".
    #[serde(default)]
    pub pks: Vec<String>,
    /// Non-key columns to replicate, in destination tuple order.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Destination side of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestMapping {
    pub space: String,
    /// Per-column cast and on-null overrides, keyed by column name.
    #[serde(default)]
    pub column: HashMap<String, ColumnOverride>,
}

/// Per-column override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnOverride {
    pub cast: CastDirective,
    pub on_null: Option<Value>,
}
