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

//! In-memory checkpoint store.
//!
//! Nothing survives a restart; use [`crate::FileStore`] in production. The
//! memory store exists for tests and local development, and additionally
//! counts saves so tests can assert on checkpoint traffic.

use async_trait::async_trait;
use tokio::sync::RwLock;

use tarabridge_core::state::{Position, PositionStore, StateError};

/// Volatile [`PositionStore`] with save accounting.
///
/// Clones share state.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: std::sync::Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    pos: Option<Position>,
    saves: usize,
    forced_saves: usize,
    history: Vec<Position>,
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: std::sync::Arc::clone(&self.inner),
        }
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with a position, as if loaded from disk.
    #[must_use]
    pub fn with_position(pos: Position) -> Self {
        let store = Self::new();
        store
            .inner
            .try_write()
            .expect("fresh store is uncontended")
            .pos = Some(pos);
        store
    }

    /// Total number of `save` calls observed.
    pub async fn saves(&self) -> usize {
        self.inner.read().await.saves
    }

    /// Number of forced `save` calls observed.
    pub async fn forced_saves(&self) -> usize {
        self.inner.read().await.forced_saves
    }

    /// Every position handed to `save`, in order.
    pub async fn history(&self) -> Vec<Position> {
        self.inner.read().await.history.clone()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load(&self) -> Result<Option<Position>, StateError> {
        Ok(self.inner.read().await.pos.clone())
    }

    async fn save(&self, pos: Position, force: bool) -> Result<(), StateError> {
        let mut inner = self.inner.write().await;
        inner.saves += 1;
        if force {
            inner.forced_saves += 1;
        }
        inner.history.push(pos.clone());
        inner.pos = Some(pos);
        Ok(())
    }

    async fn position(&self) -> Option<Position> {
        self.inner.read().await.pos.clone()
    }

    async fn close(&self) -> Result<(), StateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarabridge_core::state::GtidSet;

    #[tokio::test]
    async fn starts_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.position().await, None);
    }

    #[tokio::test]
    async fn save_updates_position_and_counters() {
        let store = MemoryStore::new();

        store
            .save(Position::gtid(GtidSet::new("a:1")), false)
            .await
            .unwrap();
        store
            .save(Position::gtid(GtidSet::new("a:1-2")), true)
            .await
            .unwrap();

        assert_eq!(
            store.position().await,
            Some(Position::gtid(GtidSet::new("a:1-2")))
        );
        assert_eq!(store.saves().await, 2);
        assert_eq!(store.forced_saves().await, 1);
        assert_eq!(store.history().await.len(), 2);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let view = store.clone();

        store
            .save(Position::file("mysql-bin.000001", 4), false)
            .await
            .unwrap();

        assert_eq!(
            view.position().await,
            Some(Position::file("mysql-bin.000001", 4))
        );
    }

    #[tokio::test]
    async fn seeded_store_loads_its_position() {
        let store = MemoryStore::with_position(Position::file("mysql-bin.000009", 42));
        assert_eq!(
            store.load().await.unwrap(),
            Some(Position::file("mysql-bin.000009", 42))
        );
    }
}
