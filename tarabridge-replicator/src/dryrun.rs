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

//! Dry-run destination connector.
//!
//! Accepts every query, logs it, and writes nothing. Used to validate a
//! configuration or replay a capture without touching Tarantool.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use tarabridge_core::destination::{Connector, DestinationError, ExecResult};
use tarabridge_core::query::Query;

/// A [`Connector`] that only counts and logs.
#[derive(Debug, Default)]
pub struct DryRunConnector {
    executed: AtomicU64,
}

impl DryRunConnector {
    /// Creates a dry-run connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queries accepted so far.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for DryRunConnector {
    async fn exec(&self, query: &Query) -> Result<ExecResult, DestinationError> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        info!(query = %query, "dry-run: skipping destination write");
        Ok(ExecResult::default())
    }

    async fn reset(&self) {}

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarabridge_core::value::Value;

    #[tokio::test]
    async fn accepts_and_counts_queries() {
        let connector = DryRunConnector::new();
        let query = Query::Delete {
            space: "users".to_owned(),
            key: vec![Value::Uint(1)],
        };

        connector.exec(&query).await.unwrap();
        connector.exec(&query).await.unwrap();

        assert_eq!(connector.executed(), 2);
    }
}
