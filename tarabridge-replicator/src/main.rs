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

//! The tarabridge daemon.
//!
//! Loads the YAML config, installs logging and the Prometheus exporter,
//! wires the bridge and runs it until SIGINT/SIGTERM or a terminal error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use tarabridge_core::config::Config;
use tarabridge_core::metrics;
use tarabridge_core::pipeline::Bridge;
use tarabridge_replicator::dryrun::DryRunConnector;
use tarabridge_replicator::logging;
use tarabridge_replicator::replay::ReplaySource;
use tarabridge_stores::FileStore;

#[derive(Debug, Parser)]
#[command(name = "tarabridge", about = "MySQL to Tarantool replication bridge")]
struct Cli {
    /// Config file path.
    #[arg(long)]
    config: PathBuf,

    /// Replay a captured JSONL event log instead of streaming from MySQL.
    #[arg(long, value_name = "EVENTS_FILE")]
    replay: Option<PathBuf>,

    /// Log destination queries instead of executing them.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = Config::from_file(&cli.config)
        .with_context(|| format!("failed to read config {}", cli.config.display()))?;

    let _log_guard = logging::init(&cfg.app.logging);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "starting replicator"
    );

    metrics::init_metrics();
    let listen_addr: SocketAddr = cfg
        .app
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr {}", cfg.app.listen_addr))?;
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(%listen_addr, "metrics endpoint listening");

    let store = FileStore::new(&cfg.app.data_file, cfg.replication.gtid_mode)
        .context("failed to open checkpoint store")?;

    // The streaming MySQL reader and the Tarantool wire driver are linked in
    // by the deployment; this build bundles the replay and dry-run adapters.
    let source = match &cli.replay {
        Some(path) => ReplaySource::from_file(path)
            .with_context(|| format!("failed to load replay capture {}", path.display()))?,
        None => anyhow::bail!(
            "no binlog reader in this build: pass --replay <events.jsonl> \
             or link a streaming MySQL driver"
        ),
    };
    if !cli.dry_run {
        anyhow::bail!(
            "no Tarantool driver in this build: pass --dry-run or link a destination driver"
        );
    }
    let connector = DryRunConnector::new();

    let bridge = Arc::new(
        Bridge::new(&cfg, source, connector, store)
            .await
            .context("could not establish bridge from MySQL to Tarantool")?,
    );

    let mut runner = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let mut errors = bridge.run().await;
            while let Some(err) = errors.recv().await {
                error!(error = %err, "got sync error");
            }
            if let Err(err) = bridge.close().await {
                error!(error = %err, "failed to stop replicator");
            }
        })
    };

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down replicator"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down replicator"),
        _ = &mut runner => info!("replication finished"),
    }

    if let Err(err) = bridge.close().await {
        error!(error = %err, "failed to stop replicator");
    }
    if !runner.is_finished() {
        let _ = runner.await;
    }

    info!("replicator stopped");
    Ok(())
}
