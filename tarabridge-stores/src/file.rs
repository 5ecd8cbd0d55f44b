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

//! Durable checkpoint file.
//!
//! Persists the last-applied position as a single JSON record. Writes are
//! throttled: the in-memory position always advances, but disk is touched at
//! most once per threshold window unless the save is forced. Persistence is
//! crash-safe: the record lands in a temp file in the same directory, is
//! fsynced, then renamed over the target, so a reader never observes a torn
//! record.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use tarabridge_core::state::{Position, PositionStore, StateError};

/// Disk writes are skipped while the last persist is younger than this,
/// unless forced.
pub const SAVE_THRESHOLD: Duration = Duration::from_secs(60);

/// File-backed [`PositionStore`].
pub struct FileStore {
    path: PathBuf,
    gtid_mode: bool,
    threshold: Duration,
    inner: RwLock<Inner>,
}

struct Inner {
    pos: Option<Position>,
    persisted_at: Instant,
}

impl FileStore {
    /// Creates a store backed by `path`, creating the parent directory
    /// (mode 0755) when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn new(path: impl Into<PathBuf>, gtid_mode: bool) -> Result<Self, StateError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            create_state_dir(dir)?;
        }

        Ok(Self {
            path,
            gtid_mode,
            threshold: SAVE_THRESHOLD,
            inner: RwLock::new(Inner {
                pos: None,
                persisted_at: Instant::now(),
            }),
        })
    }

    /// Overrides the throttling window; mainly for tests.
    #[must_use]
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, pos: &Position) -> Result<(), StateError> {
        let payload = serde_json::to_vec(pos)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        trace!(path = %self.path.display(), position = %pos, "checkpoint persisted");

        Ok(())
    }
}

fn create_state_dir(dir: &Path) -> Result<(), StateError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(dir)?;
    }
    #[cfg(not(unix))]
    std::fs::create_dir_all(dir)?;

    Ok(())
}

#[async_trait]
impl PositionStore for FileStore {
    async fn load(&self) -> Result<Option<Position>, StateError> {
        let mut inner = self.inner.write().await;

        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no checkpoint file, starting empty");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let pos: Position = serde_json::from_slice(&raw)?;
        if pos.is_gtid() != self.gtid_mode {
            return Err(StateError::ModeMismatch {
                expected: if self.gtid_mode { "gtid" } else { "file" },
                found: pos.mode_name(),
            });
        }

        inner.pos = Some(pos.clone());
        Ok(Some(pos))
    }

    async fn save(&self, pos: Position, force: bool) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        inner.pos = Some(pos.clone());

        if !force && inner.persisted_at.elapsed() < self.threshold {
            return Ok(());
        }
        inner.persisted_at = Instant::now();

        self.persist(&pos).await
    }

    async fn position(&self) -> Option<Position> {
        self.inner.read().await.pos.clone()
    }

    async fn close(&self) -> Result<(), StateError> {
        let pos = self.position().await;
        match pos {
            Some(pos) => self.save(pos, true).await,
            None => Ok(()),
        }
    }
}
