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

//! Replication rules: how one MySQL table maps onto one Tarantool space.
//!
//! A [`Rule`] binds a `(schema, table)` pair to a destination space through an
//! ordered list of [`Attribute`]s. Primary-key attributes occupy tuple
//! positions `0..pk_len`; configured non-key columns follow. The
//! [`RuleCatalog`] indexes rules by `"schema:table"` and is the only shared
//! structure the event handler reads on the hot path, so it sits behind a
//! reader-writer lock owned by the bridge.
//!
//! # Nullability and casts
//!
//! A NULL cell short-circuits attribute fetching: the configured `on_null`
//! replacement (or NULL itself) is returned and the cast directive is never
//! applied. A nullable column with `cast: unsigned` therefore still produces
//! NULLs downstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ColumnOverride, Mapping};
use crate::schema::{ColumnKind, TableSchema};
use crate::value::{to_uint64, Value};

/// Errors raised while fetching an attribute value out of a row image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The row image has fewer cells than the attribute's column index.
    #[error("column `{column}` index {index} out of range for row of {len} cells")]
    RowShape {
        column: String,
        index: usize,
        len: usize,
    },

    /// The column disappeared from the source table in a schema refresh.
    #[error("column `{column}` is no longer present in the source table")]
    DetachedColumn { column: String },

    /// An unsigned cast was requested for a value that is not an integer.
    #[error("cannot cast {kind} value to uint64")]
    Coercion { kind: &'static str },
}

/// Errors raised while building or refreshing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A configured column does not exist in the source table.
    #[error("column not found: schema: {schema}, table: {table}, name: {column}")]
    ColumnNotFound {
        schema: String,
        table: String,
        column: String,
    },

    /// Neither the mapping nor the source schema yields a primary key.
    #[error("no primary keys found, schema: {schema}, table: {table}")]
    NoPrimaryKey { schema: String, table: String },

    /// Lookup of an unmapped table; callers decide whether this is fatal.
    #[error("rule does not exist: {key}")]
    RuleNotFound { key: String },
}

/// Explicit cast applied to an attribute before it reaches the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastDirective {
    /// Pass the decoded value through unchanged.
    #[default]
    None,
    /// Reinterpret the integer as an unsigned 64-bit value.
    Unsigned,
}

/// One source column bound to one destination tuple position.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Column position in the source row image; `None` once the column has
    /// vanished from the refreshed schema snapshot.
    col: Option<usize>,
    /// Position of this attribute in the destination tuple.
    tup_index: u64,
    name: String,
    kind: ColumnKind,
    cast: CastDirective,
    unsigned: bool,
    on_null: Option<Value>,
}

impl Attribute {
    /// Resolves the named column in `table` and binds it to `tup_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::ColumnNotFound`] when the column is absent.
    pub fn resolve(table: &TableSchema, tup_index: u64, name: &str) -> Result<Self, RuleError> {
        let idx = table
            .find_column(name)
            .ok_or_else(|| RuleError::ColumnNotFound {
                schema: table.schema.clone(),
                table: table.table.clone(),
                column: name.to_owned(),
            })?;
        let col = &table.columns[idx];

        Ok(Self {
            col: Some(idx),
            tup_index,
            name: col.name.clone(),
            kind: col.kind,
            cast: CastDirective::None,
            unsigned: col.unsigned,
            on_null: None,
        })
    }

    /// Builds the primary-key attributes of `table` in key order.
    #[must_use]
    pub fn from_primary_keys(table: &TableSchema) -> Vec<Self> {
        table
            .pk_columns
            .iter()
            .enumerate()
            .map(|(tup_index, &idx)| {
                let col = &table.columns[idx];
                Self {
                    col: Some(idx),
                    tup_index: tup_index as u64,
                    name: col.name.clone(),
                    kind: col.kind,
                    cast: CastDirective::None,
                    unsigned: col.unsigned,
                    on_null: None,
                }
            })
            .collect()
    }

    fn apply_override(&mut self, over: &ColumnOverride) {
        self.cast = over.cast;
        if over.on_null.is_some() {
            self.on_null = over.on_null.clone();
        }
    }

    /// Attribute (column) name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination tuple position.
    #[must_use]
    pub const fn tup_index(&self) -> u64 {
        self.tup_index
    }

    /// Extracts this attribute's value from a row image.
    ///
    /// NULL cells return the `on_null` replacement (or NULL) without ever
    /// touching the cast. Non-null cells are coerced to `u64` when the cast
    /// directive says so, or when the source column is an unsigned NUMBER /
    /// MEDIUMINT.
    ///
    /// # Errors
    ///
    /// [`FetchError::RowShape`] for an out-of-shape row,
    /// [`FetchError::DetachedColumn`] after the column vanished upstream, and
    /// [`FetchError::Coercion`] when an unsigned cast meets a non-integer.
    pub fn fetch_value(&self, row: &[Value]) -> Result<Value, FetchError> {
        let index = self.col.ok_or_else(|| FetchError::DetachedColumn {
            column: self.name.clone(),
        })?;
        let value = row.get(index).ok_or_else(|| FetchError::RowShape {
            column: self.name.clone(),
            index,
            len: row.len(),
        })?;

        if value.is_null() {
            return Ok(self.on_null.clone().unwrap_or(Value::Null));
        }

        if self.wants_unsigned() {
            return to_uint64(value).map(Value::Uint);
        }

        Ok(value.clone())
    }

    const fn wants_unsigned(&self) -> bool {
        matches!(self.cast, CastDirective::Unsigned)
            || (self.unsigned && matches!(self.kind, ColumnKind::Number | ColumnKind::MediumInt))
    }

    /// Re-resolves the column by name against a refreshed schema snapshot.
    ///
    /// A renamed or dropped column detaches the attribute instead of silently
    /// remapping it; the breakage surfaces on the next fetch.
    fn rebind(&mut self, table: &TableSchema) {
        match table.find_column(&self.name) {
            Some(idx) => {
                let col = &table.columns[idx];
                self.col = Some(idx);
                self.kind = col.kind;
                self.unsigned = col.unsigned;
            }
            None => self.col = None,
        }
    }
}

/// Catalog key for a source table.
#[must_use]
pub fn rule_key(schema: &str, table: &str) -> String {
    let mut key = String::with_capacity(schema.len() + table.len() + 1);
    key.push_str(schema);
    key.push(':');
    key.push_str(table);
    key
}

/// Binding between one source table and one destination space.
#[derive(Debug, Clone)]
pub struct Rule {
    schema: String,
    table: String,
    pks: Vec<Attribute>,
    attrs: Vec<Attribute>,
    space: String,
    table_info: TableSchema,
}

impl Rule {
    /// Builds a rule from a mapping and a live schema snapshot.
    ///
    /// Primary keys come from the mapping's explicit `pks` list when present,
    /// otherwise from the schema in declared key order. Non-key columns get
    /// tuple positions after the key prefix; a column listed in both places
    /// is kept only as a key.
    ///
    /// # Errors
    ///
    /// [`RuleError::NoPrimaryKey`] when no key can be derived and
    /// [`RuleError::ColumnNotFound`] for unknown configured columns.
    pub fn from_mapping(mapping: &Mapping, table_info: TableSchema) -> Result<Self, RuleError> {
        let source = &mapping.source;
        let overrides = &mapping.dest.column;

        let mut pks = if source.pks.is_empty() {
            Attribute::from_primary_keys(&table_info)
        } else {
            source
                .pks
                .iter()
                .enumerate()
                .map(|(i, name)| Attribute::resolve(&table_info, i as u64, name))
                .collect::<Result<Vec<_>, _>>()?
        };
        if pks.is_empty() {
            return Err(RuleError::NoPrimaryKey {
                schema: source.schema.clone(),
                table: source.table.clone(),
            });
        }
        for pk in &mut pks {
            if let Some(over) = overrides.get(pk.name()) {
                pk.apply_override(over);
            }
        }

        let mut attrs = Vec::with_capacity(source.columns.len());
        for name in &source.columns {
            if pks.iter().any(|pk| pk.name() == name.as_str()) {
                continue;
            }

            let tup_index = (pks.len() + attrs.len()) as u64;
            let mut attr = Attribute::resolve(&table_info, tup_index, name)?;
            if let Some(over) = overrides.get(name.as_str()) {
                attr.apply_override(over);
            }
            attrs.push(attr);
        }

        Ok(Self {
            schema: source.schema.clone(),
            table: source.table.clone(),
            pks,
            attrs,
            space: mapping.dest.space.clone(),
            table_info,
        })
    }

    /// Source schema name.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Source table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Destination space name.
    #[must_use]
    pub fn space(&self) -> &str {
        &self.space
    }

    /// Primary-key attributes, in tuple order.
    #[must_use]
    pub fn pks(&self) -> &[Attribute] {
        &self.pks
    }

    /// Non-key attributes, in tuple order.
    #[must_use]
    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    /// Cached source schema snapshot.
    #[must_use]
    pub const fn table_info(&self) -> &TableSchema {
        &self.table_info
    }

    /// Catalog key of this rule.
    #[must_use]
    pub fn key(&self) -> String {
        rule_key(&self.schema, &self.table)
    }

    /// Swaps in a refreshed schema snapshot, rebinding attributes by name.
    pub fn refresh(&mut self, table_info: TableSchema) {
        for pk in &mut self.pks {
            pk.rebind(&table_info);
        }
        for attr in &mut self.attrs {
            attr.rebind(&table_info);
        }
        self.table_info = table_info;
    }
}

/// All configured rules, keyed by [`rule_key`].
#[derive(Debug, Default)]
pub struct RuleCatalog {
    rules: HashMap<String, Rule>,
}

impl RuleCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule under its table key, replacing any previous binding.
    pub fn insert(&mut self, rule: Rule) {
        self.rules.insert(rule.key(), rule);
    }

    /// Looks up the rule for a source table.
    #[must_use]
    pub fn get(&self, schema: &str, table: &str) -> Option<&Rule> {
        self.rules.get(&rule_key(schema, table))
    }

    /// Refreshes the schema snapshot of one rule.
    ///
    /// # Errors
    ///
    /// [`RuleError::RuleNotFound`] when the table is not mapped; callers on
    /// the schema-change path ignore that case.
    pub fn refresh(
        &mut self,
        schema: &str,
        table: &str,
        table_info: TableSchema,
    ) -> Result<(), RuleError> {
        let key = rule_key(schema, table);
        match self.rules.get_mut(&key) {
            Some(rule) => {
                rule.refresh(table_info);
                Ok(())
            }
            None => Err(RuleError::RuleNotFound { key }),
        }
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` when no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over the registered rules in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestMapping, SourceMapping};
    use crate::schema::Column;

    fn attribute(
        col: usize,
        tup_index: u64,
        name: &str,
        kind: ColumnKind,
        cast: CastDirective,
        unsigned: bool,
    ) -> Attribute {
        Attribute {
            col: Some(col),
            tup_index,
            name: name.to_owned(),
            kind,
            cast,
            unsigned,
            on_null: None,
        }
    }

    fn users_schema() -> TableSchema {
        TableSchema {
            schema: "city".to_owned(),
            table: "users".to_owned(),
            columns: vec![
                Column::new("id", ColumnKind::Number, true),
                Column::new("username", ColumnKind::String, false),
                Column::new("password", ColumnKind::String, false),
                Column::new("email", ColumnKind::String, false),
            ],
            pk_columns: vec![0],
        }
    }

    fn users_mapping() -> Mapping {
        Mapping {
            source: SourceMapping {
                schema: "city".to_owned(),
                table: "users".to_owned(),
                pks: Vec::new(),
                columns: vec![
                    "username".to_owned(),
                    "password".to_owned(),
                    "email".to_owned(),
                ],
            },
            dest: DestMapping {
                space: "users".to_owned(),
                column: HashMap::new(),
            },
        }
    }

    #[test]
    fn fetch_plain_string() {
        let attr = attribute(0, 0, "name", ColumnKind::String, CastDirective::None, false);
        assert_eq!(
            attr.fetch_value(&[Value::from("alice")]).unwrap(),
            Value::from("alice")
        );
    }

    #[test]
    fn fetch_signed_number_stays_signed() {
        let attr = attribute(0, 0, "speed", ColumnKind::Number, CastDirective::None, false);
        assert_eq!(attr.fetch_value(&[Value::Int(-20)]).unwrap(), Value::Int(-20));
    }

    #[test]
    fn fetch_force_cast_to_unsigned() {
        let attr = attribute(
            0,
            0,
            "speed",
            ColumnKind::Number,
            CastDirective::Unsigned,
            false,
        );
        assert_eq!(attr.fetch_value(&[Value::Int(20)]).unwrap(), Value::Uint(20));
    }

    #[test]
    fn fetch_force_cast_float_fails() {
        let attr = attribute(
            0,
            0,
            "speed",
            ColumnKind::Float,
            CastDirective::Unsigned,
            false,
        );
        assert_eq!(
            attr.fetch_value(&[Value::Float(4654.123)]),
            Err(FetchError::Coercion { kind: "float" })
        );
    }

    #[test]
    fn fetch_unsigned_medium_int() {
        let attr = attribute(
            0,
            0,
            "id",
            ColumnKind::MediumInt,
            CastDirective::None,
            true,
        );
        assert_eq!(attr.fetch_value(&[Value::Int(10)]).unwrap(), Value::Uint(10));
    }

    #[test]
    fn fetch_unsigned_number() {
        let attr = attribute(0, 0, "id", ColumnKind::Number, CastDirective::None, true);
        assert_eq!(attr.fetch_value(&[Value::Int(10)]).unwrap(), Value::Uint(10));
    }

    #[test]
    fn fetch_unsigned_string_column_is_not_coerced() {
        // Unsigned flag only matters for integer column kinds.
        let attr = attribute(0, 0, "tag", ColumnKind::String, CastDirective::None, true);
        assert_eq!(
            attr.fetch_value(&[Value::from("x")]).unwrap(),
            Value::from("x")
        );
    }

    #[test]
    fn fetch_index_equal_to_row_len_fails() {
        let attr = attribute(1, 1, "name", ColumnKind::String, CastDirective::None, false);
        assert!(matches!(
            attr.fetch_value(&[Value::from("alice")]),
            Err(FetchError::RowShape { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn fetch_index_beyond_row_len_fails() {
        let attr = attribute(5, 5, "name", ColumnKind::String, CastDirective::None, false);
        assert!(matches!(
            attr.fetch_value(&[Value::Int(1), Value::from("alice")]),
            Err(FetchError::RowShape { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn fetch_null_skips_cast() {
        // A nullable column with an unsigned cast still passes NULL through.
        let attr = attribute(
            0,
            0,
            "speed",
            ColumnKind::Number,
            CastDirective::Unsigned,
            false,
        );
        assert_eq!(attr.fetch_value(&[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn fetch_null_uses_replacement() {
        let mut attr = attribute(0, 0, "speed", ColumnKind::Number, CastDirective::None, false);
        attr.on_null = Some(Value::Uint(0));
        assert_eq!(attr.fetch_value(&[Value::Null]).unwrap(), Value::Uint(0));
    }

    #[test]
    fn rule_from_mapping_assigns_dense_tuple_positions() {
        let rule = Rule::from_mapping(&users_mapping(), users_schema()).unwrap();

        assert_eq!(rule.space(), "users");
        assert_eq!(rule.pks().len(), 1);
        assert_eq!(rule.pks()[0].name(), "id");
        assert_eq!(rule.pks()[0].tup_index(), 0);

        let names: Vec<_> = rule.attrs().iter().map(Attribute::name).collect();
        assert_eq!(names, ["username", "password", "email"]);
        let positions: Vec<_> = rule.attrs().iter().map(Attribute::tup_index).collect();
        assert_eq!(positions, [1, 2, 3]);
    }

    #[test]
    fn rule_from_mapping_skips_pk_listed_as_column() {
        let mut mapping = users_mapping();
        mapping.source.columns.insert(0, "id".to_owned());

        let rule = Rule::from_mapping(&mapping, users_schema()).unwrap();
        assert!(rule.attrs().iter().all(|a| a.name() != "id"));
        let positions: Vec<_> = rule.attrs().iter().map(Attribute::tup_index).collect();
        assert_eq!(positions, [1, 2, 3]);
    }

    #[test]
    fn rule_from_mapping_explicit_pks() {
        let mut mapping = users_mapping();
        mapping.source.pks = vec!["id".to_owned(), "username".to_owned()];
        mapping.source.columns = vec!["password".to_owned(), "email".to_owned()];

        let rule = Rule::from_mapping(&mapping, users_schema()).unwrap();
        let keys: Vec<_> = rule.pks().iter().map(Attribute::name).collect();
        assert_eq!(keys, ["id", "username"]);
        let positions: Vec<_> = rule.attrs().iter().map(Attribute::tup_index).collect();
        assert_eq!(positions, [2, 3]);
    }

    #[test]
    fn rule_from_mapping_without_any_pk_fails() {
        let mut schema = users_schema();
        schema.pk_columns.clear();

        assert!(matches!(
            Rule::from_mapping(&users_mapping(), schema),
            Err(RuleError::NoPrimaryKey { .. })
        ));
    }

    #[test]
    fn rule_from_mapping_unknown_column_fails() {
        let mut mapping = users_mapping();
        mapping.source.columns.push("missing".to_owned());

        assert!(matches!(
            Rule::from_mapping(&mapping, users_schema()),
            Err(RuleError::ColumnNotFound { column, .. }) if column == "missing"
        ));
    }

    #[test]
    fn rule_applies_column_overrides() {
        let mut mapping = users_mapping();
        mapping.dest.column.insert(
            "email".to_owned(),
            ColumnOverride {
                cast: CastDirective::None,
                on_null: Some(Value::from("")),
            },
        );

        let rule = Rule::from_mapping(&mapping, users_schema()).unwrap();
        let email = rule.attrs().iter().find(|a| a.name() == "email").unwrap();
        assert_eq!(
            email.fetch_value(&[Value::Int(1), Value::Null, Value::Null, Value::Null]),
            Ok(Value::from(""))
        );
    }

    #[test]
    fn refresh_rebinds_moved_column_by_name() {
        let mut rule = Rule::from_mapping(&users_mapping(), users_schema()).unwrap();

        // New snapshot with `email` moved ahead of `password`.
        let refreshed = TableSchema {
            columns: vec![
                Column::new("id", ColumnKind::Number, true),
                Column::new("username", ColumnKind::String, false),
                Column::new("email", ColumnKind::String, false),
                Column::new("password", ColumnKind::String, false),
            ],
            ..users_schema()
        };
        rule.refresh(refreshed);

        let email = rule.attrs().iter().find(|a| a.name() == "email").unwrap();
        let row = vec![
            Value::Uint(1),
            Value::from("bob"),
            Value::from("b@e"),
            Value::from("pwd"),
        ];
        assert_eq!(email.fetch_value(&row).unwrap(), Value::from("b@e"));
        // Tuple position is part of the destination contract and stays put.
        assert_eq!(email.tup_index(), 3);
    }

    #[test]
    fn refresh_detaches_dropped_column() {
        let mut rule = Rule::from_mapping(&users_mapping(), users_schema()).unwrap();

        let mut refreshed = users_schema();
        refreshed.columns.retain(|c| c.name != "email");
        rule.refresh(refreshed);

        let email = rule.attrs().iter().find(|a| a.name() == "email").unwrap();
        assert_eq!(
            email.fetch_value(&[Value::Uint(1), Value::from("bob"), Value::from("pwd")]),
            Err(FetchError::DetachedColumn {
                column: "email".to_owned()
            })
        );
    }

    #[test]
    fn catalog_lookup_and_refresh() {
        let mut catalog = RuleCatalog::new();
        catalog.insert(Rule::from_mapping(&users_mapping(), users_schema()).unwrap());

        assert!(catalog.get("city", "users").is_some());
        assert!(catalog.get("city", "logins").is_none());

        assert!(catalog.refresh("city", "users", users_schema()).is_ok());
        assert!(matches!(
            catalog.refresh("city", "logins", users_schema()),
            Err(RuleError::RuleNotFound { .. })
        ));
    }
}
