//! Error types for RPC operations.
//!
//! This module defines the [`RpcError`] enum which encompasses all possible
//! failure modes when communicating with remote nodes and indexers.

use thiserror::Error;

/// Errors that can occur when issuing RPC calls.
///
/// The variants split into four classes with distinct retry semantics:
///
/// - **Network errors**: [`Network`](RpcError::Network) — the transport was
///   unreachable, aborted, or reset. Retried against the next candidate up
///   to the attempt budget; [`Exhausted`](RpcError::Exhausted) is the
///   terminal form once that budget is spent.
/// - **Protocol errors**: [`Protocol`](RpcError::Protocol) — the response
///   did not correspond to the request (id mismatch, missing response in a
///   batch). Never retried: this indicates transport-level
///   desynchronization, not a transient fault.
/// - **Domain errors**: [`Domain`](RpcError::Domain) — the node returned a
///   well-formed JSON-RPC error object. Never retried: a deterministic
///   rejection would not change on another node.
/// - **Timeouts**: [`Timeout`](RpcError::Timeout) — an explicit per-call or
///   per-attempt deadline fired. Retried where a network error would be.
///
/// All payloads are owned strings so the error is `Clone`: a failed batch
/// window rejects every queued call with the same reason, and a duplex
/// teardown drains every pending request with one error.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The transport failed: connection refused, reset, DNS failure, or a
    /// non-success HTTP status.
    #[error("network error: {message}")]
    Network {
        /// Human-readable description of the transport failure.
        message: String,
    },

    /// Every retry attempt failed; no candidate produced a response.
    #[error("cannot connect to any node after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// The response does not match the request that was sent.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the mismatch.
        message: String,
    },

    /// The node returned a JSON-RPC error object.
    #[error("node error {code}: {message}")]
    Domain {
        /// JSON-RPC error code as reported by the node.
        code: i64,
        /// Error message as reported by the node.
        message: String,
    },

    /// An explicit deadline elapsed before a response arrived.
    #[error("timeout exceeded")]
    Timeout,

    /// A caller-supplied argument was unusable before any network activity.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(String),
}

impl RpcError {
    /// Builds a [`RpcError::Network`] from any displayable cause.
    pub fn network(cause: impl std::fmt::Display) -> Self {
        RpcError::Network {
            message: cause.to_string(),
        }
    }

    /// Whether a failed attempt with this error may be retried against
    /// another candidate. [`Exhausted`](RpcError::Exhausted) is not: the
    /// attempt budget is already spent when it is produced.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Network { .. } | RpcError::Timeout)
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RpcError::Timeout
        } else {
            RpcError::network(err)
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json(err.to_string())
    }
}
