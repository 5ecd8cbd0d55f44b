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

//! Adapter between reader callbacks and the sync channel.
//!
//! [`EventHandler`] implements [`ReplicationObserver`]: it resolves rules,
//! translates rows events into batches and enqueues them, and converts
//! position callbacks into checkpoint messages. It never touches the
//! destination or the checkpoint store itself; the sync loop is the single
//! consumer of everything produced here.
//!
//! Enqueueing blocks when the sync channel is full; that blocking is the
//! pipeline's backpressure. Every enqueue races the cancellation token so a
//! full channel cannot wedge a pipeline that is shutting down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::RowsEvent;
use crate::pipeline::SyncMessage;
use crate::request::make_batch;
use crate::rule::{RuleCatalog, RuleError};
use crate::source::{BinlogSource, ObserverError, ReplicationObserver};
use crate::state::{GtidSet, Position};

/// The pipeline's [`ReplicationObserver`] implementation.
pub struct EventHandler<S> {
    rules: Arc<RwLock<RuleCatalog>>,
    source: Arc<S>,
    sync_tx: mpsc::Sender<SyncMessage>,
    cancel: CancellationToken,
    gtid_mode: bool,
}

impl<S: BinlogSource> EventHandler<S> {
    /// Wires a handler over the bridge's shared state.
    #[must_use]
    pub fn new(
        rules: Arc<RwLock<RuleCatalog>>,
        source: Arc<S>,
        sync_tx: mpsc::Sender<SyncMessage>,
        cancel: CancellationToken,
        gtid_mode: bool,
    ) -> Self {
        Self {
            rules,
            source,
            sync_tx,
            cancel,
            gtid_mode,
        }
    }

    fn liveness(&self) -> Result<(), ObserverError> {
        if self.cancel.is_cancelled() {
            Err(ObserverError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn enqueue(&self, msg: SyncMessage) -> Result<(), ObserverError> {
        tokio::select! {
            res = self.sync_tx.send(msg) => res.map_err(|_| ObserverError::Cancelled),
            () = self.cancel.cancelled() => Err(ObserverError::Cancelled),
        }
    }
}

#[async_trait]
impl<S: BinlogSource> ReplicationObserver for EventHandler<S> {
    async fn on_rotate(&self, next_file: &str) -> Result<(), ObserverError> {
        trace!(next_file, "binlog rotated");
        self.liveness()
    }

    async fn on_ddl(&self) -> Result<(), ObserverError> {
        self.liveness()
    }

    async fn on_xid(&self) -> Result<(), ObserverError> {
        self.liveness()
    }

    async fn on_table_changed(&self, schema: &str, table: &str) -> Result<(), ObserverError> {
        // Unmapped tables are none of our business.
        if self.rules.read().await.get(schema, table).is_none() {
            return Ok(());
        }

        let table_info = self.source.table_schema(schema, table).await?;
        debug!(schema, table, "refreshing rule after schema change");

        match self.rules.write().await.refresh(schema, table, table_info) {
            Ok(()) | Err(RuleError::RuleNotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn on_row(&self, event: RowsEvent) -> Result<(), ObserverError> {
        let batch = {
            let rules = self.rules.read().await;
            let Some(rule) = rules.get(&event.schema, &event.table) else {
                trace!(
                    schema = %event.schema,
                    table = %event.table,
                    "dropping rows event for unmapped table"
                );
                return Ok(());
            };

            match make_batch(rule, event.action, &event.rows) {
                Ok(batch) => batch,
                Err(err) => {
                    // A malformed event poisons the stream; stop everything.
                    self.cancel.cancel();
                    return Err(ObserverError::Build {
                        action: event.action.as_str(),
                        source: err,
                    });
                }
            }
        };

        self.enqueue(SyncMessage::Batch(batch)).await?;
        self.liveness()
    }

    async fn on_gtid(&self, set: GtidSet) -> Result<(), ObserverError> {
        if self.gtid_mode {
            self.enqueue(SyncMessage::Save {
                pos: Position::gtid(set),
                force: false,
            })
            .await?;
        }

        self.liveness()
    }

    async fn on_pos_synced(
        &self,
        file: &str,
        pos: u32,
        gtid: Option<GtidSet>,
        force: bool,
    ) -> Result<(), ObserverError> {
        if self.gtid_mode {
            if force {
                if let Some(set) = gtid.filter(|set| !set.is_empty()) {
                    self.enqueue(SyncMessage::Save {
                        pos: Position::gtid(set),
                        force,
                    })
                    .await?;
                }
            }
        } else {
            self.enqueue(SyncMessage::Save {
                pos: Position::file(file, pos),
                force,
            })
            .await?;
        }

        self.liveness()
    }
}
