//! Coalescing of near-simultaneous requests into batched JSON-RPC calls.
//!
//! The first enqueue for an endpoint opens a window; every further enqueue
//! pushes the window's flush back by a short debounce, so a burst of calls
//! rides one network round trip. Responses are matched back to callers by
//! id through the correlation registry, so array order is irrelevant.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use url::Url;

use crate::rpc::{CorrelationRegistry, JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::util::request_id;

/// Byte length of request ids on the batching transport.
pub const BATCH_ID_BYTES: usize = 2;

/// Flush deadline applied to a window none of whose members asked for more.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a window stays open after its latest enqueue. Every enqueue
/// re-arms this, so a burst of calls lands in one window even when the
/// flush task runs on another worker thread.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(5);

/// A not-yet-flushed group of requests for one endpoint.
struct Window {
    requests: Vec<JsonRpcRequest>,
    /// Never lowered: raised to the largest member timeout so a slow call
    /// is not truncated by the network layer before its own deadline.
    flush_timeout: Duration,
    /// Bumped by every enqueue. A flush armed for an older epoch stands
    /// down; only the latest enqueue's flush fires.
    epoch: u64,
}

/// Queues requests per endpoint and flushes each window as one HTTP call.
#[derive(Clone)]
pub struct BatchQueue {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    registry: CorrelationRegistry,
    windows: Mutex<HashMap<Url, Window>>,
}

impl BatchQueue {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                registry: CorrelationRegistry::new(),
                windows: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Enqueues one call and resolves with its own result once the window's
    /// response arrives.
    ///
    /// A supplied `timeout` does two things: it races independently against
    /// this call's response (settling only this id with
    /// [`RpcError::Timeout`]), and it raises the window's flush deadline to
    /// at least its value. Sibling calls in the window are unaffected when
    /// it fires.
    pub async fn enqueue(
        &self,
        endpoint: &Url,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let id = request_id(BATCH_ID_BYTES);
        let rx = self.inner.registry.register(&id);

        let epoch = {
            let mut windows = self.inner.windows.lock().expect("batch window lock poisoned");
            let window = match windows.entry(endpoint.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(Window {
                    requests: Vec::new(),
                    flush_timeout: DEFAULT_FLUSH_TIMEOUT,
                    epoch: 0,
                }),
            };
            window.requests.push(JsonRpcRequest::new(id.clone(), method, params));
            if let Some(timeout) = timeout {
                window.flush_timeout = window.flush_timeout.max(timeout);
            }
            window.epoch += 1;
            window.epoch
        };
        self.schedule_flush(endpoint.clone(), epoch);

        if let Some(timeout) = timeout {
            let inner = self.inner.clone();
            let deadline_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                // No-op if the response already settled this id.
                inner.registry.settle(&deadline_id, Err(RpcError::Timeout));
            });
        }

        rx.await
            .map_err(|_| RpcError::network("batch window dropped before settling"))?
    }

    /// Arms a flush for [`FLUSH_DEBOUNCE`] from now. A later enqueue bumps
    /// the window's epoch, which disarms this flush and arms its own.
    fn schedule_flush(&self, endpoint: Url, epoch: u64) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_DEBOUNCE).await;
            queue.flush(&endpoint, epoch).await;
        });
    }

    async fn flush(&self, endpoint: &Url, epoch: u64) {
        let window = {
            let mut windows = self.inner.windows.lock().expect("batch window lock poisoned");
            match windows.get(endpoint).map(|window| window.epoch) {
                // A later enqueue re-armed the flush; it is not ours to take.
                Some(current) if current == epoch => windows.remove(endpoint),
                _ => return,
            }
        };
        let Some(window) = window else { return };
        let ids: Vec<String> = window.requests.iter().map(|req| req.id.clone()).collect();
        debug!(endpoint = endpoint.as_str(), calls = ids.len(); "flushing batch window");

        // A lone request goes out unbatched, per JSON-RPC 2.0.
        let body = if window.requests.len() == 1 {
            serde_json::to_value(&window.requests[0])
        } else {
            serde_json::to_value(&window.requests)
        };
        let body = match body {
            Ok(body) => body,
            Err(err) => {
                self.reject_window(&ids, RpcError::from(err));
                return;
            },
        };

        let exchange = async {
            let resp = self.inner.client.post(endpoint.clone()).json(&body).send().await?;
            if !resp.status().is_success() {
                return Err(RpcError::Network {
                    message: format!("server returned {}", resp.status()),
                });
            }
            Ok(resp.json::<Value>().await?)
        };
        let response = match tokio::time::timeout(window.flush_timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.reject_window(&ids, err);
                return;
            },
            Err(_) => {
                self.reject_window(&ids, RpcError::Timeout);
                return;
            },
        };

        let items = match response {
            Value::Array(items) => items,
            single => vec![single],
        };
        for item in items {
            match serde_json::from_value::<JsonRpcResponse>(item) {
                Ok(resp) => match resp.id.clone() {
                    Some(id) => self.inner.registry.settle(&id, resp.into_outcome()),
                    None => debug!("dropping batch response without id"),
                },
                Err(err) => warn!(error:% = err; "dropping unparseable batch response item"),
            }
        }

        // Members the response never named would otherwise wait forever.
        for id in &ids {
            self.inner.registry.settle(
                id,
                Err(RpcError::Protocol {
                    message: "batch response missing entry for request".into(),
                }),
            );
        }
    }

    /// Transport failure: every call in the window fails with the same reason.
    fn reject_window(&self, ids: &[String], error: RpcError) {
        warn!(calls = ids.len(), error:% = error; "batch window failed");
        for id in ids {
            self.inner.registry.settle(id, Err(error.clone()));
        }
    }
}
