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

//! JSONL replay source.
//!
//! Reads a captured replication log, one JSON record per line, and drives
//! the pipeline exactly like a live reader would. Table schemas must appear
//! in the file before the first event touching them; by convention captures
//! start with all schemas, then a `dump_done` marker, then the event stream.
//!
//! ```text
//! {"type":"schema","schema":{"schema":"city","table":"users","columns":[...],"pk_columns":[0]}}
//! {"type":"dump_done"}
//! {"type":"row","action":"insert","schema":"city","table":"users","rows":[[1,"alice"]]}
//! {"type":"pos_synced","file":"mysql-bin.000001","pos":120,"gtid":"a:1","force":true}
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use tarabridge_core::event::{Action, RowsEvent};
use tarabridge_core::schema::TableSchema;
use tarabridge_core::source::{BinlogSource, ObserverError, ReplicationObserver, SourceError};
use tarabridge_core::state::{GtidSet, Position};
use tarabridge_core::value::Value;

/// One line of a replay capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    /// Table shape; must precede events for the table.
    Schema { schema: TableSchema },
    /// End of the initial dump.
    DumpDone,
    /// A rows event.
    Row {
        action: Action,
        schema: String,
        table: String,
        rows: Vec<Vec<Value>>,
    },
    /// A GTID event.
    Gtid { set: String },
    /// A synced-position advance.
    PosSynced {
        file: String,
        pos: u32,
        #[serde(default)]
        gtid: Option<String>,
        #[serde(default)]
        force: bool,
    },
    /// Binlog rotation.
    Rotate { file: String },
    /// Schema change notice.
    TableChanged { schema: String, table: String },
    /// Replicated DDL statement.
    Ddl,
    /// Transaction commit.
    Xid,
}

/// A [`BinlogSource`] that replays a captured JSONL event log.
#[derive(Debug)]
pub struct ReplaySource {
    schemas: Vec<TableSchema>,
    records: Mutex<Vec<ReplayRecord>>,
    stopped: AtomicBool,
    dump_done_tx: watch::Sender<bool>,
    dump_done_rx: watch::Receiver<bool>,
}

impl ReplaySource {
    /// Loads a capture file, eagerly parsing every line.
    ///
    /// # Errors
    ///
    /// [`SourceError::Io`] for unreadable files and [`SourceError::Stream`]
    /// for malformed records, with the offending line number.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(&path)?;
        let source = Self::from_str(&raw)?;
        info!(
            path = %path.as_ref().display(),
            schemas = source.schemas.len(),
            "loaded replay capture"
        );
        Ok(source)
    }

    /// Parses a capture from memory; lines are JSON records, blanks skipped.
    ///
    /// # Errors
    ///
    /// [`SourceError::Stream`] for malformed records.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self, SourceError> {
        let mut schemas: Vec<TableSchema> = Vec::new();
        let mut records = Vec::new();

        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let record: ReplayRecord = serde_json::from_str(line).map_err(|err| {
                SourceError::Stream(format!("replay line {}: {err}", lineno + 1))
            })?;

            match record {
                ReplayRecord::Schema { schema } => {
                    schemas.retain(|s| !(s.schema == schema.schema && s.table == schema.table));
                    schemas.push(schema);
                }
                other => records.push(other),
            }
        }

        let (dump_done_tx, dump_done_rx) = watch::channel(false);
        Ok(Self {
            schemas,
            records: Mutex::new(records),
            stopped: AtomicBool::new(false),
            dump_done_tx,
            dump_done_rx,
        })
    }

    /// Number of events (non-schema records) left to play.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl BinlogSource for ReplaySource {
    async fn table_schema(&self, schema: &str, table: &str) -> Result<TableSchema, SourceError> {
        self.schemas
            .iter()
            .find(|s| s.schema == schema && s.table == table)
            .cloned()
            .ok_or_else(|| SourceError::TableNotFound {
                schema: schema.to_owned(),
                table: table.to_owned(),
            })
    }

    async fn check_row_image(&self, _required: &str) -> Result<(), SourceError> {
        // Captures carry full row images by construction.
        Ok(())
    }

    fn delay(&self) -> u32 {
        0
    }

    async fn wait_dump_done(&self) {
        let mut rx = self.dump_done_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn run(
        &self,
        start: Position,
        observer: Arc<dyn ReplicationObserver>,
    ) -> Result<(), SourceError> {
        debug!(position = %start, "replaying capture");

        let records: Vec<ReplayRecord> = self.records.lock().unwrap().drain(..).collect();
        for record in records {
            if self.stopped.load(Ordering::Acquire) {
                return Ok(());
            }

            let result = match record {
                ReplayRecord::Schema { .. } => Ok(()),
                ReplayRecord::DumpDone => {
                    let _ = self.dump_done_tx.send(true);
                    Ok(())
                }
                ReplayRecord::Row {
                    action,
                    schema,
                    table,
                    rows,
                } => {
                    observer
                        .on_row(RowsEvent::new(action, schema, table, rows))
                        .await
                }
                ReplayRecord::Gtid { set } => observer.on_gtid(GtidSet::new(set)).await,
                ReplayRecord::PosSynced {
                    file,
                    pos,
                    gtid,
                    force,
                } => {
                    observer
                        .on_pos_synced(&file, pos, gtid.map(GtidSet::new), force)
                        .await
                }
                ReplayRecord::Rotate { file } => observer.on_rotate(&file).await,
                ReplayRecord::TableChanged { schema, table } => {
                    observer.on_table_changed(&schema, &table).await
                }
                ReplayRecord::Ddl => observer.on_ddl().await,
                ReplayRecord::Xid => observer.on_xid().await,
            };

            match result {
                Ok(()) => {}
                Err(ObserverError::Cancelled) => return Ok(()),
                Err(err) => return Err(SourceError::Stream(err.to_string())),
            }
        }

        info!("replay capture exhausted");
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
