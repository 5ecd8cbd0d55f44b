//! Checkpoint stores for the tarabridge replicator.
//!
//! Implementations of the
//! [`PositionStore`](tarabridge_core::state::PositionStore) contract:
//!
//! - [`file::FileStore`]: durable JSON file with atomic replace and
//!   time-based write throttling; the production store.
//! - [`memory::MemoryStore`]: process-local, for tests and development.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
