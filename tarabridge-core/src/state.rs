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

//! Replication positions and the checkpoint-store contract.
//!
//! The [`PositionStore`] trait abstracts durable persistence of the
//! last-applied replication position. The sync loop is the only writer after
//! startup; anything else only ever reads a cloned snapshot. Store
//! implementations live in the `tarabridge-stores` crate.
//!
//! A position is either a GTID set or a binlog file offset. The two never mix
//! within one deployment: the mode is fixed by configuration and a checkpoint
//! of the other shape is rejected at load time.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the backing storage failed.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored record could not be encoded or decoded.
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The stored record does not match the configured replication mode.
    #[error("checkpoint mode mismatch: expected {expected} position, found {found}")]
    ModeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Implementation-specific failure.
    #[error("checkpoint store error: {0}")]
    Other(String),
}

/// An opaque GTID set, printable and comparable but never interpreted here.
///
/// Parsing and ordering of GTID sets belong to the binlog reader; the
/// pipeline only needs equality, emptiness and the string form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GtidSet {
    set: String,
}

impl GtidSet {
    /// Wraps a flavor-specific GTID set string.
    #[must_use]
    pub fn new(set: impl Into<String>) -> Self {
        Self { set: set.into() }
    }

    /// The empty GTID set, meaning "from the beginning".
    #[must_use]
    pub fn empty() -> Self {
        Self { set: String::new() }
    }

    /// Returns `true` for the empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// String form as produced by the source flavor.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.set
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.set)
    }
}

/// Last-applied replication position, in one of the two source modes.
///
/// The JSON forms are part of the checkpoint-file contract:
/// `{"gtid":"<set>"}` and `{"name":"<binlog file>","pos":<offset>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Gtid { gtid: GtidSet },
    File { name: String, pos: u32 },
}

impl Position {
    /// Wraps a GTID set.
    #[must_use]
    pub fn gtid(set: GtidSet) -> Self {
        Self::Gtid { gtid: set }
    }

    /// Wraps a binlog file offset.
    #[must_use]
    pub fn file(name: impl Into<String>, pos: u32) -> Self {
        Self::File {
            name: name.into(),
            pos,
        }
    }

    /// Mode name used in logs and mode-mismatch errors.
    #[must_use]
    pub const fn mode_name(&self) -> &'static str {
        match self {
            Self::Gtid { .. } => "gtid",
            Self::File { .. } => "file",
        }
    }

    /// Returns `true` for a GTID-mode position.
    #[must_use]
    pub const fn is_gtid(&self) -> bool {
        matches!(self, Self::Gtid { .. })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gtid { gtid } => write!(f, "{gtid}"),
            Self::File { name, pos } => write!(f, "({name}, {pos})"),
        }
    }
}

/// Durable storage for the last-applied replication position.
///
/// Implementations must serialize `save` across callers and hand out cloned
/// snapshots from `position`; callers may hold a snapshot across concurrent
/// updates. `save` with `force` must persist immediately; without it the
/// store may throttle persistence but must still update the in-memory
/// position.
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Loads the persisted position; a missing record is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable or malformed records.
    async fn load(&self) -> Result<Option<Position>, StateError>;

    /// Records a new position, persisting per the store's throttling policy.
    ///
    /// # Errors
    ///
    /// Returns an error when persistence was attempted and failed; the
    /// pipeline treats that as fatal.
    async fn save(&self, pos: Position, force: bool) -> Result<(), StateError>;

    /// Returns a snapshot of the current in-memory position.
    async fn position(&self) -> Option<Position>;

    /// Force-flushes the current position and releases resources.
    ///
    /// # Errors
    ///
    /// Returns an error when the final flush fails.
    async fn close(&self) -> Result<(), StateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gtid_position_json_round_trip() {
        let pos = Position::gtid(GtidSet::new("de30b9a0-0000-11eb-8b1c-0242ac120002:1-5"));
        let json = serde_json::to_string(&pos).unwrap();
        assert_eq!(
            json,
            r#"{"gtid":"de30b9a0-0000-11eb-8b1c-0242ac120002:1-5"}"#
        );
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }

    #[test]
    fn file_position_json_round_trip() {
        let pos = Position::file("mysql-bin.000003", 1234);
        let json = serde_json::to_string(&pos).unwrap();
        assert_eq!(json, r#"{"name":"mysql-bin.000003","pos":1234}"#);
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pos);
    }

    #[test]
    fn empty_gtid_set_is_detected() {
        assert!(GtidSet::empty().is_empty());
        assert!(!GtidSet::new("a:1").is_empty());
    }

    #[test]
    fn mode_names() {
        assert_eq!(Position::gtid(GtidSet::empty()).mode_name(), "gtid");
        assert_eq!(Position::file("f", 0).mode_name(), "file");
    }
}
