use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RpcError;

/// Protocol version string sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// A single JSON-RPC 2.0 request object.
///
/// Batched requests are a plain array of these; the persistent-connection
/// transport sends one per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A single JSON-RPC 2.0 response object.
///
/// The `id` is optional because indexers also push unsolicited notification
/// messages that carry none; those are dropped at the transport layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    /// Collapses the response into the outcome delivered to the caller: a
    /// domain error if the node rejected the call, the result otherwise.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.error {
            Some(err) => Err(RpcError::Domain {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
