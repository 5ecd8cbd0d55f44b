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

//! The bridge: wiring, lifecycle and the sync loop.
//!
//! [`Bridge`] owns every other component: the rule catalog, the checkpoint
//! store, the retrying destination client and the reader handle. Its life
//! cycle is `Init → Dumping → Running → Stopped`; the initial dump is driven
//! by the reader and flows through the same pipeline as streamed events.
//!
//! The sync loop is the single consumer of the bounded sync channel and the
//! only mutator of the destination and the checkpoint after startup. Batches
//! apply sequentially; a checkpoint message is only ever enqueued after the
//! events it covers, so a position is never durably recorded ahead of its
//! data. The channel holds at most [`SYNC_CHANNEL_CAPACITY`] messages and
//! blocks producers when full; that bound is what keeps memory flat while
//! the destination is slow.
//!
//! Delivery is at-least-once: a crash between applying a batch and
//! persisting its position replays the tail of the binlog on restart, and a
//! batch interrupted mid-way stays partially applied until the replay
//! converges it.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::destination::{Client, Connector, DestinationError};
use crate::handler::EventHandler;
use crate::metrics::{self, ReplState};
use crate::query::encode_requests;
use crate::request::Batch;
use crate::rule::{Rule, RuleCatalog, RuleError};
use crate::source::{BinlogSource, SourceError};
use crate::state::{GtidSet, Position, PositionStore, StateError};

/// Bound of the sync channel; producers block when it is full.
pub const SYNC_CHANNEL_CAPACITY: usize = 4096;

/// Capacity of the run-errors channel handed to the caller.
const MAX_RUN_ERRORS: usize = 3;

/// The row image the source must be configured with.
const REQUIRED_ROW_IMAGE: &str = "FULL";

/// Message consumed by the sync loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Advance the checkpoint.
    Save { pos: Position, force: bool },
    /// Apply one translated rows event.
    Batch(Batch),
}

/// Terminal failures of the sync loop.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The checkpoint store could not persist a position.
    #[error(transparent)]
    Checkpoint(#[from] StateError),

    /// The destination rejected a query or stayed unreachable.
    #[error(transparent)]
    Destination(#[from] DestinationError),
}

/// Errors surfaced by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Invalid or inconsistent configuration; fatal at init.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rule construction or refresh failed.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// The reader failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The checkpoint store failed outside the sync loop.
    #[error(transparent)]
    State(#[from] StateError),

    /// The sync loop terminated with an error.
    #[error("sync loop error: {0}")]
    Sync(#[from] SyncError),
}

/// The replication bridge from one MySQL server to one Tarantool instance.
///
/// Generic over the reader, connector and checkpoint-store seams; see the
/// crate docs for the wiring. Constructed with [`Bridge::new`], driven with
/// [`Bridge::run`], shut down with [`Bridge::close`].
#[derive(Debug)]
pub struct Bridge<S, C, P> {
    source: Arc<S>,
    client: Arc<Client<C>>,
    store: Arc<P>,
    rules: Arc<RwLock<RuleCatalog>>,

    cancel: CancellationToken,
    sync_tx: mpsc::Sender<SyncMessage>,
    sync_rx: Mutex<Option<mpsc::Receiver<SyncMessage>>>,

    gtid_mode: bool,
    lag_warn_threshold: Option<u32>,

    dumping: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    synced_at: Arc<AtomicI64>,
    closed: AtomicBool,
}

impl<S, C, P> Bridge<S, C, P>
where
    S: BinlogSource,
    C: Connector + Send + Sync + 'static,
    P: PositionStore + 'static,
{
    /// Builds the bridge: loads the checkpoint, resolves every mapping into a
    /// rule against the live source schema, and verifies the row image.
    ///
    /// # Errors
    ///
    /// Any rule, checkpoint or source failure here is fatal; the caller must
    /// not start a half-configured pipeline.
    pub async fn new(
        cfg: &Config,
        source: S,
        connector: C,
        store: P,
    ) -> Result<Self, BridgeError> {
        let loaded = store.load().await?;
        if let Some(pos) = &loaded {
            info!(position = %pos, "resuming from saved checkpoint");
        }

        let source = Arc::new(source);

        let mut catalog = RuleCatalog::new();
        for mapping in &cfg.replication.mappings {
            let table_info = source
                .table_schema(&mapping.source.schema, &mapping.source.table)
                .await?;
            let rule = Rule::from_mapping(mapping, table_info)?;
            debug!(
                schema = rule.schema(),
                table = rule.table(),
                space = rule.space(),
                "registered replication rule"
            );
            catalog.insert(rule);
        }

        source.check_row_image(REQUIRED_ROW_IMAGE).await?;

        let (sync_tx, sync_rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);

        Ok(Self {
            source,
            client: Arc::new(Client::new(
                connector,
                cfg.replication.tarantool.max_retries,
            )),
            store: Arc::new(store),
            rules: Arc::new(RwLock::new(catalog)),
            cancel: CancellationToken::new(),
            sync_tx,
            sync_rx: Mutex::new(Some(sync_rx)),
            gtid_mode: cfg.replication.gtid_mode,
            lag_warn_threshold: cfg.app.health.seconds_behind_master,
            dumping: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            synced_at: Arc::new(AtomicI64::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Replicates from the last checkpoint until closed or a terminal error.
    ///
    /// Blocks for the lifetime of the stream and returns a closed channel
    /// carrying every terminal error (empty on a clean shutdown). The caller
    /// logs them and invokes [`Bridge::close`].
    pub async fn run(&self) -> mpsc::Receiver<BridgeError> {
        let (err_tx, err_rx) = mpsc::channel(MAX_RUN_ERRORS);

        let Some(sync_rx) = self.sync_rx.lock().await.take() else {
            let _ = err_tx
                .send(BridgeError::Config("bridge already ran".to_owned()))
                .await;
            return err_rx;
        };

        self.spawn_telemetry_tickers();

        // The sync loop cleans up after itself on error so the reader
        // unwinds instead of filling the channel forever.
        let sync_handle = {
            let store = Arc::clone(&self.store);
            let client = Arc::clone(&self.client);
            let cancel = self.cancel.clone();
            let synced_at = Arc::clone(&self.synced_at);
            let err_tx = err_tx.clone();
            let source = Arc::clone(&self.source);
            tokio::spawn(async move {
                if let Err(err) = sync_loop(sync_rx, store, client, cancel.clone(), synced_at).await
                {
                    let _ = err_tx.send(BridgeError::Sync(err)).await;
                    cancel.cancel();
                    source.stop();
                }
            })
        };

        self.set_dumping(true);
        {
            let source = Arc::clone(&self.source);
            let cancel = self.cancel.clone();
            let dumping = Arc::clone(&self.dumping);
            let running = Arc::clone(&self.running);
            tokio::spawn(async move {
                tokio::select! {
                    () = source.wait_dump_done() => {
                        info!("initial dump done, streaming");
                        dumping.store(false, Ordering::Release);
                        running.store(true, Ordering::Release);
                        metrics::set_state(ReplState::Running);
                    }
                    () = cancel.cancelled() => {}
                }
            });
        }

        match self.start_position().await {
            Ok(start) => {
                info!(position = %start, gtid_mode = self.gtid_mode, "starting replication");
                let handler = Arc::new(EventHandler::new(
                    Arc::clone(&self.rules),
                    Arc::clone(&self.source),
                    self.sync_tx.clone(),
                    self.cancel.clone(),
                    self.gtid_mode,
                ));
                if let Err(err) = self.source.run(start, handler).await {
                    let _ = err_tx.send(BridgeError::Source(err)).await;
                }
            }
            Err(err) => {
                let _ = err_tx.send(err).await;
            }
        }

        // Stream finished: stop the loop, drain it, report how it ended.
        self.cancel.cancel();
        if let Err(err) = sync_handle.await {
            error!(error = %err, "sync loop task panicked");
        }
        self.set_running(false);

        drop(err_tx);
        err_rx
    }

    /// Resolves the stream start position from the checkpoint.
    ///
    /// An empty checkpoint starts from the beginning in the configured mode,
    /// which is what engages the initial dump. A checkpoint of the wrong
    /// variant for the configured mode is fatal.
    async fn start_position(&self) -> Result<Position, BridgeError> {
        match self.store.position().await {
            Some(pos) if pos.is_gtid() == self.gtid_mode => Ok(pos),
            Some(pos) => Err(BridgeError::Config(format!(
                "unsupported master position: checkpoint is {} but gtid_mode={}",
                pos.mode_name(),
                self.gtid_mode
            ))),
            None if self.gtid_mode => Ok(Position::gtid(GtidSet::empty())),
            None => Ok(Position::file("", 0)),
        }
    }

    /// Stops the pipeline and flushes the checkpoint. Idempotent; only the
    /// first call does any work.
    ///
    /// # Errors
    ///
    /// Returns the final checkpoint flush failure, if any.
    pub async fn close(&self) -> Result<(), BridgeError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("closing bridge");
        self.source.stop();
        self.cancel.cancel();
        self.store.close().await?;
        self.set_running(false);

        Ok(())
    }

    /// Replica lag in seconds as reported by the reader.
    #[must_use]
    pub fn delay(&self) -> u32 {
        self.source.delay()
    }

    /// Whether the bridge is streaming.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the initial dump is still in flight.
    #[must_use]
    pub fn dumping(&self) -> bool {
        self.dumping.load(Ordering::Acquire)
    }

    fn set_running(&self, v: bool) {
        self.running.store(v, Ordering::Release);
        self.dumping.store(false, Ordering::Release);
        metrics::set_state(if v {
            ReplState::Running
        } else {
            ReplState::Stopped
        });
    }

    fn set_dumping(&self, v: bool) {
        self.dumping.store(v, Ordering::Release);
        if v {
            metrics::set_state(ReplState::Dumping);
        }
    }

    fn spawn_telemetry_tickers(&self) {
        {
            let source = Arc::clone(&self.source);
            let cancel = self.cancel.clone();
            let threshold = self.lag_warn_threshold;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                let mut lagging = false;
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let delay = source.delay();
                            metrics::set_seconds_behind(delay);
                            if let Some(max) = threshold {
                                if delay > max && !lagging {
                                    warn!(delay, max, "replica lag above health threshold");
                                }
                                lagging = delay > max;
                            }
                        }
                        () = cancel.cancelled() => return,
                    }
                }
            });
        }

        {
            let synced_at = Arc::clone(&self.synced_at);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(1));
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            let at = synced_at.load(Ordering::Relaxed);
                            if at > 0 {
                                metrics::set_synced_seconds_ago(unix_now() - at);
                            }
                        }
                        () = cancel.cancelled() => return,
                    }
                }
            });
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The single-consumer loop applying batches and checkpoints in order.
///
/// Pending messages drain before a cancellation is observed; new messages
/// after cancellation are not waited for.
async fn sync_loop<C, P>(
    mut rx: mpsc::Receiver<SyncMessage>,
    store: Arc<P>,
    client: Arc<Client<C>>,
    cancel: CancellationToken,
    synced_at: Arc<AtomicI64>,
) -> Result<(), SyncError>
where
    C: Connector,
    P: PositionStore,
{
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(SyncMessage::Save { pos, force }) => {
                    store.save(pos, force).await?;
                    synced_at.store(unix_now(), Ordering::Relaxed);
                }
                Some(SyncMessage::Batch(batch)) => {
                    match apply_batch(&client, &cancel, &batch).await {
                        Ok(()) => {}
                        // Cancellation mid-batch is a clean shutdown; the
                        // unapplied tail replays after restart.
                        Err(DestinationError::Cancelled) => return Ok(()),
                        Err(err) => return Err(err.into()),
                    }
                    synced_at.store(unix_now(), Ordering::Relaxed);
                }
                None => return Ok(()),
            },
            () = cancel.cancelled() => return Ok(()),
        }
    }
}

/// Applies one batch, query by query, in order.
///
/// Partial application on failure is deliberate; replay from the previous
/// checkpoint makes up the difference.
async fn apply_batch<C: Connector>(
    client: &Client<C>,
    cancel: &CancellationToken,
    batch: &Batch,
) -> Result<(), DestinationError> {
    for query in encode_requests(&batch.requests) {
        if let Err(err) = client.exec(cancel, &query).await {
            if !matches!(err, DestinationError::Cancelled) {
                error!(query = %query, error = %err, "could not exec destination query");
            }
            return Err(err);
        }
    }

    Ok(())
}
