//! Persistent duplex transport for ElectrumX-style indexers.
//!
//! Unlike the HTTP side, all calls here share ONE connection. The
//! [`DuplexConnection`] manages its lifecycle (lazy dial, waiter replay,
//! teardown and redial on error); the [`ElectrumClient`] layers the
//! per-call retry-with-reconnect policy on top.

mod client;
mod connection;

pub use client::{ELECTRUM_ID_BYTES, ElectrumClient, RECONNECT_ATTEMPTS};
pub use connection::{DEFAULT_RECONNECT_DELAY, DuplexConnection, WriteHandle};
