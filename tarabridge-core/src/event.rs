//! Row change events as delivered by the binlog reader.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Kind of mutation carried by a rows event, a request, or a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One binlog rows event: a burst of row images for a single table.
///
/// Insert and delete events carry one image per changed row. Update events
/// carry `(before, after)` pairs back to back, which requires
/// `binlog_row_image=FULL` on the source so every column is present in both
/// images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowsEvent {
    pub action: Action,
    pub schema: String,
    pub table: String,
    pub rows: Vec<Vec<Value>>,
}

impl RowsEvent {
    /// Creates a rows event; mostly a convenience for tests and replay input.
    #[must_use]
    pub fn new(
        action: Action,
        schema: impl Into<String>,
        table: impl Into<String>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            action,
            schema: schema.into(),
            table: table.into(),
            rows,
        }
    }
}
