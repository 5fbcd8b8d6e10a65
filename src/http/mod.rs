//! HTTP transport for blockchain node JSON-RPC communication.
//!
//! This module covers everything a logical call needs on the request/response
//! side: picking trustworthy candidates, failing over between them, and
//! coalescing same-tick calls into batches.
//!
//! # Architecture
//!
//! - [`NodeClient`] - high-level client; dynamic method dispatch, name-record
//!   lookups, candidate selection policy
//! - [`NodeSelector`] - consensus-based rating of the candidate pool
//! - [`FailoverExecutor`] - retry-with-failover across a candidate list
//! - [`BatchQueue`] - same-tick request coalescing per endpoint
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use chainquorum::http::{FailoverExecutor, NodeClient, NodeSelector};
//!
//! # async fn example() -> Result<(), chainquorum::rpc::RpcError> {
//! let http = reqwest::Client::new();
//! let pool = vec!["http://127.0.0.1:6662".parse().unwrap()];
//! let selector = Arc::new(NodeSelector::new(http.clone(), pool.clone()));
//! let client = NodeClient::new(FailoverExecutor::new(http), selector, pool, true);
//!
//! let height = client.call("getblockcount", json!([])).await?;
//! println!("chain height: {height}");
//! # Ok(())
//! # }
//! ```

mod batch;
mod failover;
mod node_client;
mod selector;

pub use batch::{BATCH_ID_BYTES, BatchQueue, DEFAULT_FLUSH_TIMEOUT};
pub use failover::{DEFAULT_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT, FailoverExecutor, NODE_ID_BYTES};
pub use node_client::{MethodCall, NodeClient};
pub use selector::{DEFAULT_PROBE_TIMEOUT, NodeSelector, PROBES_PER_NODE};
