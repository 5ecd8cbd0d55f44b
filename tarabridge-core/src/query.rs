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

//! Mapping of destination requests onto Tarantool wire operations.
//!
//! The connector executes [`Query`] values; this module is the only place
//! that knows how a [`Request`] becomes one. Inserts carry the full tuple
//! (key prefix followed by data fields), deletes carry the key tuple, and
//! updates carry the key tuple plus one assignment per data argument.
//! Field numbers in update assignments are 1-based on the wire.

use std::fmt;

use crate::event::Action;
use crate::request::Request;
use crate::value::Value;

/// Field assignment of an update operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    /// 1-based field number of the assigned tuple field.
    pub field: u64,
    pub value: Value,
}

/// One destination wire operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Insert {
        space: String,
        tuple: Vec<Value>,
    },
    Update {
        space: String,
        key: Vec<Value>,
        ops: Vec<Assign>,
    },
    Delete {
        space: String,
        key: Vec<Value>,
    },
}

impl Query {
    /// Destination space this query addresses.
    #[must_use]
    pub fn space(&self) -> &str {
        match self {
            Self::Insert { space, .. } | Self::Update { space, .. } | Self::Delete { space, .. } => {
                space
            }
        }
    }

    /// Operation name used in logs and error messages.
    #[must_use]
    pub const fn op_name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} into {}", self.op_name(), self.space())
    }
}

/// Encodes one request into its wire operation.
#[must_use]
pub fn encode_request(req: &Request) -> Query {
    match req.action {
        Action::Insert => {
            let mut tuple = Vec::with_capacity(req.keys.len() + req.args.len());
            tuple.extend(req.keys.iter().map(|kv| kv.value.clone()));
            tuple.extend(req.args.iter().map(|kv| kv.value.clone()));
            Query::Insert {
                space: req.space.clone(),
                tuple,
            }
        }
        Action::Update => Query::Update {
            space: req.space.clone(),
            key: req.keys.iter().map(|kv| kv.value.clone()).collect(),
            ops: req
                .args
                .iter()
                .map(|kv| Assign {
                    field: kv.field + 1,
                    value: kv.value.clone(),
                })
                .collect(),
        },
        Action::Delete => Query::Delete {
            space: req.space.clone(),
            key: req.keys.iter().map(|kv| kv.value.clone()).collect(),
        },
    }
}

/// Encodes a request list in order, each request by its own action.
///
/// Batches tagged `Update` may interleave deletes and inserts produced by
/// key-changing updates; the relative order is load-bearing and preserved.
#[must_use]
pub fn encode_requests(requests: &[Request]) -> Vec<Query> {
    requests.iter().map(encode_request).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FieldValue;

    fn field(field: u64, value: Value) -> FieldValue {
        FieldValue { field, value }
    }

    fn users_update() -> Request {
        Request {
            action: Action::Update,
            space: "users".to_owned(),
            keys: vec![field(0, Value::Uint(1))],
            args: vec![
                field(1, Value::from("bob")),
                field(2, Value::from("y")),
                field(3, Value::from("b@e")),
            ],
        }
    }

    #[test]
    fn insert_concatenates_keys_and_args() {
        let req = Request {
            action: Action::Insert,
            space: "users".to_owned(),
            keys: vec![field(0, Value::Uint(1))],
            args: vec![field(1, Value::from("alice")), field(2, Value::from("x"))],
        };

        assert_eq!(
            encode_request(&req),
            Query::Insert {
                space: "users".to_owned(),
                tuple: vec![Value::Uint(1), Value::from("alice"), Value::from("x")],
            }
        );
    }

    #[test]
    fn update_assignments_are_one_based() {
        let query = encode_request(&users_update());
        let Query::Update { space, key, ops } = query else {
            panic!("expected update, got {query:?}");
        };

        assert_eq!(space, "users");
        assert_eq!(key, vec![Value::Uint(1)]);
        let fields: Vec<_> = ops.iter().map(|op| op.field).collect();
        assert_eq!(fields, [2, 3, 4]);
        assert_eq!(ops[1].value, Value::from("y"));
    }

    #[test]
    fn delete_carries_key_tuple_only() {
        let req = Request {
            action: Action::Delete,
            space: "logins".to_owned(),
            keys: vec![field(0, Value::from("alice")), field(1, Value::from("10.10.10.1"))],
            args: Vec::new(),
        };

        assert_eq!(
            encode_request(&req),
            Query::Delete {
                space: "logins".to_owned(),
                key: vec![Value::from("alice"), Value::from("10.10.10.1")],
            }
        );
    }

    #[test]
    fn heterogeneous_batch_is_flattened_in_order() {
        // A key-changing update produces delete + insert inside an update
        // batch; both must be encoded, delete first.
        let requests = vec![
            Request {
                action: Action::Delete,
                space: "users".to_owned(),
                keys: vec![field(0, Value::Uint(1))],
                args: Vec::new(),
            },
            Request {
                action: Action::Insert,
                space: "users".to_owned(),
                keys: vec![field(0, Value::Uint(2))],
                args: vec![field(1, Value::from("bob"))],
            },
        ];

        let queries = encode_requests(&requests);
        assert_eq!(queries.len(), 2);
        assert!(matches!(queries[0], Query::Delete { .. }));
        assert!(matches!(queries[1], Query::Insert { .. }));
    }
}
