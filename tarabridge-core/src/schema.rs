//! Source table schema snapshots.
//!
//! The binlog reader owns schema discovery; the pipeline only keeps a cached
//! snapshot per mapped table so attribute lookups survive between schema
//! refreshes. Snapshots bind by column *name*, so a rename upstream is a
//! user-visible breakage, not a silent remap.

use serde::{Deserialize, Serialize};

/// MySQL column type tag, as classified by the binlog reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Number,
    Float,
    Enum,
    Set,
    String,
    Datetime,
    Timestamp,
    Date,
    Time,
    Bit,
    Json,
    Decimal,
    MediumInt,
    Binary,
    Point,
}

/// One column of a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
    /// Whether the column is declared UNSIGNED in the source DDL.
    #[serde(default)]
    pub unsigned: bool,
}

impl Column {
    /// Convenience constructor used mostly by tests and the replay driver.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ColumnKind, unsigned: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            unsigned,
        }
    }
}

/// Snapshot of one source table's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub table: String,
    /// Columns in source declaration order; row images follow this order.
    pub columns: Vec<Column>,
    /// Indices into `columns` naming the primary key, in key order.
    pub pk_columns: Vec<usize>,
}

impl TableSchema {
    /// Returns the index of the named column, if present.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns `true` when the named column is part of the primary key.
    #[must_use]
    pub fn is_pk_column(&self, name: &str) -> bool {
        self.find_column(name)
            .is_some_and(|idx| self.pk_columns.contains(&idx))
    }

    /// Fully qualified `schema.table` name for logs.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableSchema {
        TableSchema {
            schema: "city".to_owned(),
            table: "users".to_owned(),
            columns: vec![
                Column::new("id", ColumnKind::Number, true),
                Column::new("username", ColumnKind::String, false),
                Column::new("password", ColumnKind::String, false),
            ],
            pk_columns: vec![0],
        }
    }

    #[test]
    fn find_column_by_name() {
        let schema = users();
        assert_eq!(schema.find_column("password"), Some(2));
        assert_eq!(schema.find_column("missing"), None);
    }

    #[test]
    fn pk_membership() {
        let schema = users();
        assert!(schema.is_pk_column("id"));
        assert!(!schema.is_pk_column("username"));
        assert!(!schema.is_pk_column("missing"));
    }
}
