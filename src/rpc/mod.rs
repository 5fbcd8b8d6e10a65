//! Shared JSON-RPC plumbing used by both transports.
//!
//! This module holds the pieces that do not care whether a request travels
//! over an HTTP POST or the persistent indexer socket: the wire types, the
//! error taxonomy, and the correlation registry that matches responses to
//! callers by id.

mod error;
mod registry;
mod types;

pub use error::RpcError;
pub use registry::{CorrelationRegistry, RpcOutcome};
pub use types::{JSONRPC_VERSION, JsonRpcErrorBody, JsonRpcRequest, JsonRpcResponse};
