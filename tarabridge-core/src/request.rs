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

//! Translation of row images into destination mutations.
//!
//! A [`Request`] is one destination mutation: key arguments locate the tuple,
//! data arguments carry the non-key fields. The builders here walk the row
//! images of a single binlog event through a [`Rule`] and preserve source
//! order, which the at-least-once replay contract depends on.
//!
//! Tarantool forbids modifying primary-key fields in place, so an update
//! whose before/after key tuples differ is rewritten as a delete of the old
//! tuple followed by an insert of the new one.

use thiserror::Error;

use crate::event::Action;
use crate::rule::{Attribute, FetchError, Rule};
use crate::value::Value;

/// Errors raised while translating a rows event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Attribute fetch failed (row shape or coercion).
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An update event did not arrive as before/after pairs.
    #[error("invalid update rows event, must have 2x rows, but {count}")]
    EventShape { count: usize },
}

/// A `(tuple position, value)` pair of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub field: u64,
    pub value: Value,
}

/// One destination mutation derived from a row image.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub action: Action,
    pub space: String,
    /// Primary-key arguments, in the rule's key order.
    pub keys: Vec<FieldValue>,
    /// Non-key arguments, in the rule's attribute order; empty for deletes.
    pub args: Vec<FieldValue>,
}

/// Requests of one binlog rows event, tagged with the event's action.
///
/// A PK-changing update makes the request list heterogeneous: the batch
/// action stays `Update` while individual requests are deletes and inserts.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub action: Action,
    pub requests: Vec<Request>,
}

fn fetch_all(attrs: &[Attribute], row: &[Value]) -> Result<Vec<FieldValue>, RequestError> {
    attrs
        .iter()
        .map(|attr| {
            Ok(FieldValue {
                field: attr.tup_index(),
                value: attr.fetch_value(row)?,
            })
        })
        .collect()
}

/// Builds the insert request for one row image.
///
/// # Errors
///
/// Propagates attribute fetch failures.
pub fn make_insert_request(rule: &Rule, row: &[Value]) -> Result<Request, RequestError> {
    Ok(Request {
        action: Action::Insert,
        space: rule.space().to_owned(),
        keys: fetch_all(rule.pks(), row)?,
        args: fetch_all(rule.attrs(), row)?,
    })
}

/// Builds the delete request for one row image; data arguments are omitted.
///
/// # Errors
///
/// Propagates attribute fetch failures.
pub fn make_delete_request(rule: &Rule, row: &[Value]) -> Result<Request, RequestError> {
    Ok(Request {
        action: Action::Delete,
        space: rule.space().to_owned(),
        keys: fetch_all(rule.pks(), row)?,
        args: Vec::new(),
    })
}

/// Builds one insert request per row image, in source order.
///
/// # Errors
///
/// Propagates attribute fetch failures.
pub fn make_insert_batch(rule: &Rule, rows: &[Vec<Value>]) -> Result<Vec<Request>, RequestError> {
    rows.iter()
        .map(|row| make_insert_request(rule, row))
        .collect()
}

/// Builds one delete request per row image, in source order.
///
/// # Errors
///
/// Propagates attribute fetch failures.
pub fn make_delete_batch(rule: &Rule, rows: &[Vec<Value>]) -> Result<Vec<Request>, RequestError> {
    rows.iter()
        .map(|row| make_delete_request(rule, row))
        .collect()
}

/// Builds the requests for an update event.
///
/// Rows arrive as `(before, after)` pairs. When any primary-key value differs
/// between the images the pair becomes `DELETE(before)` + `INSERT(after)`;
/// otherwise a single update keyed by the (unchanged) before-image key with
/// the after-image non-key values.
///
/// # Errors
///
/// [`RequestError::EventShape`] for an odd row count, plus attribute fetch
/// failures.
pub fn make_update_requests(rule: &Rule, rows: &[Vec<Value>]) -> Result<Vec<Request>, RequestError> {
    if rows.len() % 2 != 0 {
        return Err(RequestError::EventShape { count: rows.len() });
    }

    let mut requests = Vec::with_capacity(rows.len() / 2);
    for pair in rows.chunks_exact(2) {
        let (before, after) = (&pair[0], &pair[1]);

        let mut pk_changed = false;
        for pk in rule.pks() {
            if pk.fetch_value(before)? != pk.fetch_value(after)? {
                pk_changed = true;
                break;
            }
        }

        if pk_changed {
            requests.push(make_delete_request(rule, before)?);
            requests.push(make_insert_request(rule, after)?);
            continue;
        }

        requests.push(Request {
            action: Action::Update,
            space: rule.space().to_owned(),
            keys: fetch_all(rule.pks(), before)?,
            args: fetch_all(rule.attrs(), after)?,
        });
    }

    Ok(requests)
}

/// Translates one rows event into a batch, dispatching on its action.
///
/// # Errors
///
/// Propagates the per-action builder failures.
pub fn make_batch(rule: &Rule, action: Action, rows: &[Vec<Value>]) -> Result<Batch, RequestError> {
    let requests = match action {
        Action::Insert => make_insert_batch(rule, rows)?,
        Action::Delete => make_delete_batch(rule, rows)?,
        Action::Update => make_update_requests(rule, rows)?,
    };

    Ok(Batch { action, requests })
}
