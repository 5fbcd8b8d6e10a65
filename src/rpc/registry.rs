//! Correlation of outstanding requests to their eventual responses.
//!
//! Responses may arrive in any order over either transport; the only link
//! between a request and its response is the opaque id. The registry owns
//! each pending request from registration until it is settled exactly once.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use super::error::RpcError;

/// Outcome delivered to the caller that registered an id.
pub type RpcOutcome = Result<Value, RpcError>;

/// Maps outstanding request ids to their waiting callers.
///
/// Each transport owns one registry instance. Ids come from
/// [`request_id`](crate::util::request_id) and are assumed unique among
/// concurrently outstanding requests; the registry does not verify this.
#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<RpcOutcome>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a pending request and returns the receiver its outcome will
    /// be delivered on.
    pub fn register(&self, id: &str) -> oneshot::Receiver<RpcOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("registry lock poisoned")
            .insert(id.to_owned(), tx);
        rx
    }

    /// Removes the pending request for `id` and delivers the outcome.
    ///
    /// Settling an unknown id is a silent no-op: responses that arrive after
    /// a local timeout or teardown already discarded the entry are dropped.
    pub fn settle(&self, id: &str, outcome: RpcOutcome) {
        let waiter = self.pending.lock().expect("registry lock poisoned").remove(id);
        if let Some(tx) = waiter {
            // The receiver may have been dropped; nothing left to notify.
            let _ = tx.send(outcome);
        }
    }

    /// Removes a pending request without delivering anything.
    ///
    /// Used when a request failed before it ever reached the wire, so no
    /// response can arrive for it.
    pub fn discard(&self, id: &str) {
        self.pending.lock().expect("registry lock poisoned").remove(id);
    }

    /// Settles every outstanding request with a clone of the same error.
    ///
    /// Called on transport teardown: no response can arrive for requests
    /// that were in flight on a connection that no longer exists.
    pub fn drain(&self, error: RpcError) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .expect("registry lock poisoned")
            .drain()
            .collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().expect("registry lock poisoned").len()
    }
}
