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

//! Full-pipeline tests over a replay capture and the durable file store.

use std::collections::HashMap;
use std::io::Write;

use tarabridge_core::config::{
    Config, DestConnectConfig, DestMapping, Mapping, ReplicationConfig, SourceConnectConfig,
    SourceMapping,
};
use tarabridge_core::destination::MockConnector;
use tarabridge_core::pipeline::Bridge;
use tarabridge_core::query::Query;
use tarabridge_core::state::{GtidSet, Position, PositionStore};
use tarabridge_core::value::Value;
use tarabridge_replicator::replay::ReplaySource;
use tarabridge_stores::FileStore;

const CAPTURE: &str = r#"
{"type":"schema","schema":{"schema":"city","table":"users","columns":[{"name":"id","kind":"number","unsigned":true},{"name":"username","kind":"string"},{"name":"password","kind":"string"},{"name":"email","kind":"string"}],"pk_columns":[0]}}
{"type":"dump_done"}
{"type":"row","action":"insert","schema":"city","table":"users","rows":[[1,"alice","x","a@e"]]}
{"type":"row","action":"update","schema":"city","table":"users","rows":[[1,"alice","x","a@e"],[1,"alice","y","a@e"]]}
{"type":"pos_synced","file":"mysql-bin.000001","pos":360,"gtid":"a:1-2","force":true}
"#;

fn config(data_file: &str) -> Config {
    Config {
        app: tarabridge_core::config::AppConfig {
            data_file: data_file.to_owned(),
            ..Default::default()
        },
        replication: ReplicationConfig {
            server_id: None,
            gtid_mode: true,
            mysql: SourceConnectConfig {
                addr: "127.0.0.1:3306".to_owned(),
                user: "repl".to_owned(),
                password: String::new(),
                charset: "utf8mb4_unicode_ci".to_owned(),
                dump: Default::default(),
            },
            tarantool: DestConnectConfig {
                addr: "127.0.0.1:3301".to_owned(),
                user: String::new(),
                password: String::new(),
                max_retries: 2,
                connect_timeout_ms: 500,
                request_timeout_ms: 1000,
            },
            mappings: vec![Mapping {
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
            }],
        },
    }
}

#[tokio::test]
async fn replay_capture_drives_the_whole_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("state.info");
    let cfg = config(data_file.to_str().unwrap());

    let mut capture = tempfile::NamedTempFile::new().unwrap();
    capture.write_all(CAPTURE.as_bytes()).unwrap();

    let source = ReplaySource::from_file(capture.path()).unwrap();
    let connector = MockConnector::new();
    let store = FileStore::new(&cfg.app.data_file, true).unwrap();

    let bridge = Bridge::new(&cfg, source, connector.clone(), store)
        .await
        .unwrap();
    let mut errors = bridge.run().await;
    let mut seen = Vec::new();
    while let Some(err) = errors.recv().await {
        seen.push(err);
    }
    assert!(seen.is_empty(), "unexpected errors: {seen:?}");
    bridge.close().await.unwrap();

    // Insert then in-place update, in order.
    let executed = connector.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(
        executed[0],
        Query::Insert {
            space: "users".to_owned(),
            tuple: vec![
                Value::Uint(1),
                Value::from("alice"),
                Value::from("x"),
                Value::from("a@e"),
            ],
        }
    );
    assert!(matches!(&executed[1], Query::Update { key, .. } if key == &[Value::Uint(1)]));

    // The forced save reached the disk and a fresh store can resume from it.
    let reopened = FileStore::new(&data_file, true).unwrap();
    assert_eq!(
        reopened.load().await.unwrap(),
        Some(Position::gtid(GtidSet::new("a:1-2")))
    );
}

#[tokio::test]
async fn restart_resumes_from_persisted_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let data_file = dir.path().join("state.info");
    let cfg = config(data_file.to_str().unwrap());

    let mut capture = tempfile::NamedTempFile::new().unwrap();
    capture.write_all(CAPTURE.as_bytes()).unwrap();

    // First run persists the checkpoint; no graceful close, as in a crash.
    {
        let source = ReplaySource::from_file(capture.path()).unwrap();
        let store = FileStore::new(&cfg.app.data_file, true).unwrap();
        let bridge = Bridge::new(&cfg, source, MockConnector::new(), store)
            .await
            .unwrap();
        let mut errors = bridge.run().await;
        while errors.recv().await.is_some() {}
    }

    // Second run replays the same capture; at-least-once re-application.
    let source = ReplaySource::from_file(capture.path()).unwrap();
    let connector = MockConnector::new();
    let store = FileStore::new(&cfg.app.data_file, true).unwrap();
    let bridge = Bridge::new(&cfg, source, connector.clone(), store)
        .await
        .unwrap();
    let mut errors = bridge.run().await;
    while errors.recv().await.is_some() {}

    assert_eq!(connector.executed().len(), 2);
}
