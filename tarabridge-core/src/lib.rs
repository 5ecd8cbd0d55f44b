//! Tarabridge core: MySQL to Tarantool change-data-capture pipeline.
//!
//! The bridge tails a MySQL binlog through an external reader and projects
//! every committed row change onto a Tarantool space, keeping the two stores
//! eventually consistent across crashes and reconnects.
//!
//! # Pipeline
//!
//! ```text
//! binlog reader ──► EventHandler ──► sync channel ──► sync loop ──► destination client
//!                        │                                │
//!                        └── checkpoint messages ─────────┴──► PositionStore
//! ```
//!
//! - [`rule`] resolves source columns to destination tuple positions.
//! - [`request`] translates row images into destination mutations.
//! - [`query`] encodes mutations as wire operations.
//! - [`state`] defines replication positions and the checkpoint contract.
//! - [`source`] is the binlog-reader seam; [`handler`] adapts its callbacks.
//! - [`destination`] executes queries with retries over a connector seam.
//! - [`pipeline`] wires everything and owns the lifecycle.
//!
//! Delivery is at-least-once: after a crash the stream replays from the last
//! durable checkpoint, so destination spaces should carry a unique primary
//! index to make replay idempotent.

pub mod config;
pub mod destination;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod pipeline;
pub mod query;
pub mod request;
pub mod rule;
pub mod schema;
pub mod source;
pub mod state;
pub mod value;
