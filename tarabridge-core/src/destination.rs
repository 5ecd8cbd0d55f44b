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

//! Destination execution: the connector seam and the retrying client.
//!
//! The [`Connector`] trait is the contract of the underlying Tarantool
//! driver: it dials lazily, caches its connection, enforces the configured
//! connect/request timeouts, and reports failures with a classified
//! [`DestinationError`]. [`Client`] wraps a connector with the retry policy:
//! transient errors (no connection, timeout) drop the cached connection and
//! retry up to the configured attempt budget; anything else is terminal and
//! aborts the sync loop.
//!
//! [`MockConnector`] is the in-tree implementation used by tests; the binary
//! ships a dry-run connector, and production deployments link a driver
//! adapter implementing [`Connector`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::query::Query;
use crate::value::Value;

/// Default retry count: up to three attempts per query.
pub const DEFAULT_RETRIES: usize = 2;

/// Classified destination failure.
///
/// Only [`DestinationError::NoConnection`] and [`DestinationError::Timeout`]
/// are retryable; every other variant terminates the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DestinationError {
    /// No live connection and dialing failed.
    #[error("no connection: {message}")]
    NoConnection { message: String },

    /// The dial or the request exceeded its deadline.
    #[error("request timed out: {message}")]
    Timeout { message: String },

    /// The destination rejected the operation (constraint violation,
    /// unknown space, access denied, ...).
    #[error("query rejected, code {code}: {message}")]
    Rejected { code: u32, message: String },

    /// Pipeline cancellation observed between attempts.
    #[error("execution cancelled")]
    Cancelled,

    /// Driver-specific failure that fits no other class.
    #[error("destination error: {message}")]
    Other { message: String },
}

impl DestinationError {
    /// Creates a no-connection error.
    #[must_use]
    pub fn no_connection(message: impl Into<String>) -> Self {
        Self::NoConnection {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a rejection carrying the destination's error code.
    #[must_use]
    pub fn rejected(code: u32, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Creates an unclassified error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Returns `true` when a fresh connection may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoConnection { .. } | Self::Timeout { .. })
    }
}

/// Result of one executed query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    /// Tuples returned by the destination, if any.
    pub data: Vec<Vec<Value>>,
}

/// Contract of the underlying destination driver.
///
/// Implementations are internally thread-safe, dial lazily on the first
/// `exec`, and keep the connection cached until [`Connector::reset`] or
/// [`Connector::close`]. Connect and per-request timeouts are the
/// implementation's responsibility, configured at construction.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Executes one query, dialing first if there is no cached connection.
    ///
    /// # Errors
    ///
    /// Returns a classified [`DestinationError`]; the client decides whether
    /// to retry.
    async fn exec(&self, query: &Query) -> Result<ExecResult, DestinationError>;

    /// Drops the cached connection so the next `exec` redials.
    async fn reset(&self);

    /// Closes the cached connection and stops dialing.
    async fn close(&self);
}

/// Retrying executor in front of a [`Connector`].
#[derive(Debug)]
pub struct Client<C> {
    connector: C,
    retries: usize,
}

impl<C: Connector> Client<C> {
    /// Wraps `connector` with an attempt budget of `retries + 1`.
    ///
    /// A zero retry count falls back to [`DEFAULT_RETRIES`].
    #[must_use]
    pub fn new(connector: C, retries: usize) -> Self {
        let retries = if retries == 0 { DEFAULT_RETRIES } else { retries };
        Self { connector, retries }
    }

    /// Executes a query, retrying transient failures on a fresh connection.
    ///
    /// The first attempt always runs so a batch already being applied during
    /// shutdown completes; cancellation short-circuits between retries.
    ///
    /// # Errors
    ///
    /// [`DestinationError::Cancelled`] when the pipeline token fires between
    /// attempts; otherwise the last error observed once the attempt budget is
    /// exhausted, or the first non-retryable error.
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        query: &Query,
    ) -> Result<ExecResult, DestinationError> {
        let mut last = DestinationError::other("no attempts made");

        for attempt in 0..=self.retries {
            if attempt > 0 && cancel.is_cancelled() {
                return Err(DestinationError::Cancelled);
            }

            match self.connector.exec(query).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(attempt, query = %query, "query succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) if err.is_retryable() => {
                    warn!(attempt, query = %query, error = %err, "retryable destination error");
                    self.connector.reset().await;
                    last = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last)
    }

    /// Closes the underlying connector.
    pub async fn close(&self) {
        self.connector.close().await;
    }

    /// The underlying connector, for inspection in tests.
    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }
}

/// A recording connector for tests.
///
/// Stores every executed query and can be scripted to fail: a finite number
/// of leading transient failures, or a terminal rejection on every call.
/// Clones share state, so a test can keep a handle while the pipeline owns
/// another.
///
/// # Examples
///
/// ```rust
/// use tarabridge_core::destination::{Client, Connector, MockConnector};
/// use tarabridge_core::query::Query;
/// use tarabridge_core::value::Value;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let connector = MockConnector::new().fail_transient(1);
/// let client = Client::new(connector.clone(), 2);
///
/// let query = Query::Delete { space: "users".into(), key: vec![Value::Uint(1)] };
/// client.exec(&CancellationToken::new(), &query).await.unwrap();
///
/// assert_eq!(connector.executed().len(), 1);
/// assert_eq!(connector.resets(), 1);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    executed: Vec<Query>,
    transient_failures: usize,
    terminal: Option<DestinationError>,
    resets: usize,
    closed: bool,
}

impl MockConnector {
    /// Creates a connector that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` executions fail with a transient error.
    #[must_use]
    pub fn fail_transient(self, count: usize) -> Self {
        self.state.lock().unwrap().transient_failures = count;
        self
    }

    /// Makes every execution fail with the given terminal error.
    #[must_use]
    pub fn fail_terminal(self, err: DestinationError) -> Self {
        self.state.lock().unwrap().terminal = Some(err);
        self
    }

    /// Queries executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<Query> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Number of [`Connector::reset`] calls observed.
    #[must_use]
    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    /// Whether [`Connector::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn exec(&self, query: &Query) -> Result<ExecResult, DestinationError> {
        let mut state = self.state.lock().unwrap();

        if let Some(err) = &state.terminal {
            return Err(err.clone());
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(DestinationError::no_connection("mock transient failure"));
        }

        state.executed.push(query.clone());
        Ok(ExecResult::default())
    }

    async fn reset(&self) {
        self.state.lock().unwrap().resets += 1;
    }

    async fn close(&self) {
        self.state.lock().unwrap().closed = true;
    }
}
