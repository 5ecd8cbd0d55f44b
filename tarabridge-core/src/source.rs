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

//! The binlog-reader seam.
//!
//! [`BinlogSource`] is the contract of the external replication reader: it
//! dumps, streams, tracks lag, and surfaces change events through the
//! [`ReplicationObserver`] callbacks in source order. The pipeline never
//! parses binlog bytes itself: a production deployment links a driver
//! adapter implementing this trait, the binary ships a JSONL replay adapter,
//! and tests use [`ScriptedSource`].
//!
//! Callback errors make the reader unwind; returning
//! [`ObserverError::Cancelled`] is the normal shutdown path.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::event::RowsEvent;
use crate::request::RequestError;
use crate::rule::RuleError;
use crate::schema::TableSchema;
use crate::state::{GtidSet, Position};

/// Errors raised by the replication reader.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A mapped table does not exist on the source.
    #[error("table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    /// The source is not configured with the required row image.
    #[error("binlog_row_image must be {required}, source reports {actual}")]
    RowImage { required: String, actual: String },

    /// The replication stream failed.
    #[error("replication stream error: {0}")]
    Stream(String),

    /// Reading replay input or other driver I/O failed.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned from observer callbacks back into the reader.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// The pipeline was cancelled; the reader should unwind quietly.
    #[error("pipeline cancelled")]
    Cancelled,

    /// Translating a rows event failed; the pipeline has been cancelled.
    #[error("sync {action} request, what: {source}")]
    Build {
        action: &'static str,
        #[source]
        source: RequestError,
    },

    /// Refreshing a rule after a schema change failed.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// Fetching a schema snapshot from the reader failed.
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Callback surface the replication reader drives, in source order.
///
/// The no-op callbacks exist so the reader can probe pipeline liveness
/// between events.
#[async_trait]
pub trait ReplicationObserver: Send + Sync {
    /// Binlog rotated to a new file.
    async fn on_rotate(&self, next_file: &str) -> Result<(), ObserverError>;

    /// A DDL statement was replicated.
    async fn on_ddl(&self) -> Result<(), ObserverError>;

    /// A transaction committed on the source.
    async fn on_xid(&self) -> Result<(), ObserverError>;

    /// The reader noticed a schema change on a table.
    async fn on_table_changed(&self, schema: &str, table: &str) -> Result<(), ObserverError>;

    /// A rows event was decoded.
    async fn on_row(&self, event: RowsEvent) -> Result<(), ObserverError>;

    /// A GTID event was observed (GTID mode only has meaning).
    async fn on_gtid(&self, set: GtidSet) -> Result<(), ObserverError>;

    /// The reader advanced its own notion of the synced position.
    async fn on_pos_synced(
        &self,
        file: &str,
        pos: u32,
        gtid: Option<GtidSet>,
        force: bool,
    ) -> Result<(), ObserverError>;
}

/// Contract of the external binlog reader.
///
/// Implementations are constructed from the same replication config as the
/// bridge and restrict both the initial dump and the streamed tables to the
/// configured mappings. Starting from an empty position engages the dump.
#[async_trait]
pub trait BinlogSource: Send + Sync + 'static {
    /// Fetches a live schema snapshot for a source table.
    ///
    /// # Errors
    ///
    /// [`SourceError::TableNotFound`] for unknown tables, or a stream error.
    async fn table_schema(&self, schema: &str, table: &str) -> Result<TableSchema, SourceError>;

    /// Verifies the source's `binlog_row_image` setting.
    ///
    /// # Errors
    ///
    /// [`SourceError::RowImage`] when the source reports anything else.
    async fn check_row_image(&self, required: &str) -> Result<(), SourceError>;

    /// Current replica lag in seconds, as the reader measures it.
    fn delay(&self) -> u32;

    /// Resolves once the initial dump has completed.
    async fn wait_dump_done(&self);

    /// Streams replication events from `start`, invoking `observer` for each,
    /// until the stream ends, a callback fails, or [`BinlogSource::stop`].
    ///
    /// # Errors
    ///
    /// Terminal reader failures; a cancelled observer is a clean stop.
    async fn run(
        &self,
        start: Position,
        observer: Arc<dyn ReplicationObserver>,
    ) -> Result<(), SourceError>;

    /// Asks a running stream to unwind; idempotent.
    fn stop(&self);
}

/// One scripted reader step, driven in order by [`ScriptedSource::run`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Rotate(String),
    Ddl,
    Xid,
    TableChanged { schema: String, table: String },
    Row(RowsEvent),
    Gtid(GtidSet),
    PosSynced {
        file: String,
        pos: u32,
        gtid: Option<GtidSet>,
        force: bool,
    },
    /// Marks the end of the initial dump.
    DumpDone,
    /// Terminal reader failure.
    Fail(String),
}

/// An in-memory [`BinlogSource`] for tests.
///
/// Plays a fixed list of [`ScriptStep`]s against the observer and records the
/// start position it was given. By default `run` returns once the script is
/// exhausted, which makes shutdown deterministic in tests.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    inner: Arc<ScriptedInner>,
}

#[derive(Debug)]
struct ScriptedInner {
    schemas: Mutex<Vec<TableSchema>>,
    steps: Mutex<Vec<ScriptStep>>,
    row_image: Mutex<String>,
    delay: AtomicU32,
    stopped: AtomicBool,
    started_from: Mutex<Option<Position>>,
    dump_done_tx: watch::Sender<bool>,
    dump_done_rx: watch::Receiver<bool>,
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSource {
    /// Creates a source with no schemas and an empty script.
    #[must_use]
    pub fn new() -> Self {
        let (dump_done_tx, dump_done_rx) = watch::channel(false);
        Self {
            inner: Arc::new(ScriptedInner {
                schemas: Mutex::new(Vec::new()),
                steps: Mutex::new(Vec::new()),
                row_image: Mutex::new("FULL".to_owned()),
                delay: AtomicU32::new(0),
                stopped: AtomicBool::new(false),
                started_from: Mutex::new(None),
                dump_done_tx,
                dump_done_rx,
            }),
        }
    }

    /// Registers a table schema the source will serve.
    #[must_use]
    pub fn with_schema(self, schema: TableSchema) -> Self {
        self.inner.schemas.lock().unwrap().push(schema);
        self
    }

    /// Appends steps to the script.
    #[must_use]
    pub fn with_steps(self, steps: Vec<ScriptStep>) -> Self {
        self.inner.steps.lock().unwrap().extend(steps);
        self
    }

    /// Overrides the reported `binlog_row_image` value.
    #[must_use]
    pub fn with_row_image(self, image: impl Into<String>) -> Self {
        *self.inner.row_image.lock().unwrap() = image.into();
        self
    }

    /// Sets the reported replica lag.
    pub fn set_delay(&self, seconds: u32) {
        self.inner.delay.store(seconds, Ordering::Relaxed);
    }

    /// Replaces a registered schema, as a real reader would after DDL.
    pub fn replace_schema(&self, schema: TableSchema) {
        let mut schemas = self.inner.schemas.lock().unwrap();
        schemas.retain(|s| !(s.schema == schema.schema && s.table == schema.table));
        schemas.push(schema);
    }

    /// The position `run` was started from, once running.
    #[must_use]
    pub fn started_from(&self) -> Option<Position> {
        self.inner.started_from.lock().unwrap().clone()
    }
}

#[async_trait]
impl BinlogSource for ScriptedSource {
    async fn table_schema(&self, schema: &str, table: &str) -> Result<TableSchema, SourceError> {
        self.inner
            .schemas
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.schema == schema && s.table == table)
            .cloned()
            .ok_or_else(|| SourceError::TableNotFound {
                schema: schema.to_owned(),
                table: table.to_owned(),
            })
    }

    async fn check_row_image(&self, required: &str) -> Result<(), SourceError> {
        let actual = self.inner.row_image.lock().unwrap().clone();
        if actual == required {
            Ok(())
        } else {
            Err(SourceError::RowImage {
                required: required.to_owned(),
                actual,
            })
        }
    }

    fn delay(&self) -> u32 {
        self.inner.delay.load(Ordering::Relaxed)
    }

    async fn wait_dump_done(&self) {
        let mut rx = self.inner.dump_done_rx.clone();
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
        *self.inner.started_from.lock().unwrap() = Some(start);

        let steps: Vec<ScriptStep> = self.inner.steps.lock().unwrap().drain(..).collect();
        for step in steps {
            if self.inner.stopped.load(Ordering::Acquire) {
                return Ok(());
            }

            let result = match step {
                ScriptStep::Rotate(file) => observer.on_rotate(&file).await,
                ScriptStep::Ddl => observer.on_ddl().await,
                ScriptStep::Xid => observer.on_xid().await,
                ScriptStep::TableChanged { schema, table } => {
                    observer.on_table_changed(&schema, &table).await
                }
                ScriptStep::Row(event) => observer.on_row(event).await,
                ScriptStep::Gtid(set) => observer.on_gtid(set).await,
                ScriptStep::PosSynced {
                    file,
                    pos,
                    gtid,
                    force,
                } => observer.on_pos_synced(&file, pos, gtid, force).await,
                ScriptStep::DumpDone => {
                    let _ = self.inner.dump_done_tx.send(true);
                    Ok(())
                }
                ScriptStep::Fail(message) => return Err(SourceError::Stream(message)),
            };

            match result {
                Ok(()) => {}
                // A cancelled pipeline is a clean stop from the reader's side.
                Err(ObserverError::Cancelled) => return Ok(()),
                Err(err) => return Err(SourceError::Stream(err.to_string())),
            }
        }

        Ok(())
    }

    fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnKind};

    fn schema() -> TableSchema {
        TableSchema {
            schema: "city".to_owned(),
            table: "users".to_owned(),
            columns: vec![Column::new("id", ColumnKind::Number, true)],
            pk_columns: vec![0],
        }
    }

    struct CountingObserver {
        rows: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ReplicationObserver for CountingObserver {
        async fn on_rotate(&self, _next_file: &str) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn on_ddl(&self) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn on_xid(&self) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn on_table_changed(&self, _s: &str, _t: &str) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn on_row(&self, _event: RowsEvent) -> Result<(), ObserverError> {
            self.rows.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn on_gtid(&self, _set: GtidSet) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn on_pos_synced(
            &self,
            _file: &str,
            _pos: u32,
            _gtid: Option<GtidSet>,
            _force: bool,
        ) -> Result<(), ObserverError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn scripted_source_serves_schemas() {
        let source = ScriptedSource::new().with_schema(schema());
        assert!(source.table_schema("city", "users").await.is_ok());
        assert!(matches!(
            source.table_schema("city", "missing").await,
            Err(SourceError::TableNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn scripted_source_checks_row_image() {
        let source = ScriptedSource::new();
        assert!(source.check_row_image("FULL").await.is_ok());

        let minimal = ScriptedSource::new().with_row_image("MINIMAL");
        assert!(matches!(
            minimal.check_row_image("FULL").await,
            Err(SourceError::RowImage { .. })
        ));
    }

    #[tokio::test]
    async fn scripted_source_plays_steps_and_records_start() {
        use crate::event::Action;

        let source = ScriptedSource::new().with_steps(vec![
            ScriptStep::DumpDone,
            ScriptStep::Row(RowsEvent::new(Action::Insert, "city", "users", vec![])),
            ScriptStep::Row(RowsEvent::new(Action::Insert, "city", "users", vec![])),
        ]);
        let observer = Arc::new(CountingObserver {
            rows: std::sync::atomic::AtomicUsize::new(0),
        });

        let start = Position::file("mysql-bin.000001", 4);
        source.run(start.clone(), observer.clone()).await.unwrap();

        assert_eq!(source.started_from(), Some(start));
        assert_eq!(observer.rows.load(Ordering::Relaxed), 2);
        // Dump-done latch observed without blocking.
        source.wait_dump_done().await;
    }

    #[tokio::test]
    async fn scripted_source_surfaces_failure() {
        let source = ScriptedSource::new().with_steps(vec![ScriptStep::Fail("gone".into())]);
        let observer = Arc::new(CountingObserver {
            rows: std::sync::atomic::AtomicUsize::new(0),
        });

        assert!(matches!(
            source.run(Position::gtid(GtidSet::empty()), observer).await,
            Err(SourceError::Stream(msg)) if msg == "gone"
        ));
    }
}
