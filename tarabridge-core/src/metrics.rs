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

//! Replication telemetry.
//!
//! Uses the `metrics` facade so any exporter works; the binary installs a
//! Prometheus exporter. Call [`init_metrics`] once at startup, before
//! [`crate::pipeline::Bridge::run`], to register the gauge descriptions.

use metrics::{describe_gauge, gauge};

/// Replica lag in seconds, as reported by the binlog reader.
const SECONDS_BEHIND: &str = "mysql2tarantool_seconds_behind";

/// Replication state gauge: 0=stopped, 1=dumping, 2=running.
const STATE: &str = "mysql2tarantool_state";

/// Seconds since the sync loop last applied a message.
const SYNCED_SECONDS_AGO: &str = "mysql2tarantool_synced_seconds_ago";

/// Replication state as exported on the state gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplState {
    Stopped = 0,
    Dumping = 1,
    Running = 2,
}

/// Registers gauge descriptions with the installed recorder.
pub fn init_metrics() {
    describe_gauge!(
        SECONDS_BEHIND,
        metrics::Unit::Seconds,
        "Current replication lag of the replicator"
    );
    describe_gauge!(
        STATE,
        "The replication running state: 0=stopped, 1=dumping, 2=running"
    );
    describe_gauge!(
        SYNCED_SECONDS_AGO,
        metrics::Unit::Seconds,
        "Seconds since the last message was applied by the sync loop"
    );
}

/// Updates the replica-lag gauge.
pub fn set_seconds_behind(seconds: u32) {
    gauge!(SECONDS_BEHIND).set(f64::from(seconds));
}

/// Updates the state gauge.
pub fn set_state(state: ReplState) {
    gauge!(STATE).set(f64::from(state as u8));
}

/// Updates the synced-seconds-ago gauge.
pub fn set_synced_seconds_ago(seconds: i64) {
    gauge!(SYNCED_SECONDS_AGO).set(seconds as f64);
}
