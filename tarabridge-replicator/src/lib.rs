//! Bundled drivers for the tarabridge daemon.
//!
//! The streaming MySQL reader and the Tarantool wire driver are deployment
//! adapters linked in from outside this workspace; what ships here is
//! everything needed to exercise the full pipeline without them:
//!
//! - [`replay`]: a [`BinlogSource`](tarabridge_core::source::BinlogSource)
//!   that plays a captured JSONL event log.
//! - [`dryrun`]: a [`Connector`](tarabridge_core::destination::Connector)
//!   that logs queries instead of executing them.

pub mod dryrun;
pub mod logging;
pub mod replay;
