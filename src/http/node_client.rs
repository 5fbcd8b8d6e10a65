//! High-level client for blockchain node JSON-RPC calls.
//!
//! [`NodeClient`] is the primary interface for issuing calls against the
//! node pool. It picks candidates from the consensus ranking (or the
//! shuffled raw pool when ranking is disabled), hands them to the failover
//! executor, and exposes the domain helpers built on top of raw calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::http::failover::{DEFAULT_REQUEST_TIMEOUT, FailoverExecutor};
use crate::http::selector::NodeSelector;
use crate::nvs::parse_nvs_value;
use crate::rpc::RpcError;

/// `name_scan` upper bound: effectively "all records under the prefix".
const NAME_SCAN_MAX_RESULTS: u64 = 999_999_999;

/// One entry of a `name_scan` result. Other fields are ignored.
#[derive(Debug, Deserialize)]
struct NameScanEntry {
    name: String,
    value: String,
}

/// Client for wallet-style calls against the blockchain node pool.
///
/// Cheap to clone; clones share the executor, selector, and method cache.
#[derive(Clone)]
pub struct NodeClient {
    inner: Arc<Inner>,
}

struct Inner {
    executor: FailoverExecutor,
    selector: Arc<NodeSelector>,
    pool: Vec<Url>,
    request_timeout: Duration,
    use_ranking: bool,
    methods: Mutex<HashMap<String, MethodCall>>,
}

/// A named, logged handle for one RPC method.
///
/// Built lazily per method name and cached, so repeated lookups of the same
/// name return the same handle. The handle's only behavior beyond the call
/// itself is logging the method name and outcome.
#[derive(Clone)]
pub struct MethodCall {
    name: Arc<str>,
    client: NodeClient,
}

impl MethodCall {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issues the call, logging entry and outcome.
    pub async fn invoke(&self, params: Value) -> Result<Value, RpcError> {
        debug!(target: "rpc", method = &*self.name; "calling node");
        let outcome = self.client.call(&self.name, params).await;
        match &outcome {
            Ok(_) => debug!(target: "rpc", method = &*self.name; "node call succeeded"),
            Err(err) => debug!(target: "rpc", method = &*self.name, error:% = err; "node call failed"),
        }
        outcome
    }
}

impl NodeClient {
    pub fn new(
        executor: FailoverExecutor,
        selector: Arc<NodeSelector>,
        pool: Vec<Url>,
        use_ranking: bool,
    ) -> Self {
        Self::with_request_timeout(executor, selector, pool, use_ranking, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(
        executor: FailoverExecutor,
        selector: Arc<NodeSelector>,
        pool: Vec<Url>,
        use_ranking: bool,
        request_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                selector,
                pool,
                request_timeout,
                use_ranking,
                methods: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the cached callable handle for `name`, building it on first
    /// lookup.
    pub fn method(&self, name: &str) -> MethodCall {
        let mut methods = self.inner.methods.lock().expect("method cache lock poisoned");
        methods
            .entry(name.to_owned())
            .or_insert_with(|| MethodCall {
                name: Arc::from(name),
                client: self.clone(),
            })
            .clone()
    }

    /// Issues one logical call with retry-with-failover across candidates.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let candidates = self.candidates().await;
        self.inner
            .executor
            .call(candidates, method, &params, self.inner.request_timeout)
            .await
    }

    /// Candidate list for one logical call, best candidate LAST because the
    /// executor pops from the back.
    async fn candidates(&self) -> Vec<Url> {
        if self.inner.use_ranking {
            let ranked = self.inner.selector.ranking().await;
            let mut candidates: Vec<Url> = (*ranked).clone();
            candidates.reverse();
            return candidates;
        }
        let mut pool = self.inner.pool.clone();
        pool.shuffle(&mut rand::thread_rng());
        pool
    }

    /// Looks up all name-value records under `prefix` and decodes each
    /// record's NVS payload.
    ///
    /// Scans `<prefix>:`; records whose name does not actually start with
    /// the prefix (the scan returns everything lexically after it) are
    /// filtered out, and the prefix is stripped from the returned keys.
    pub async fn get_names(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, RpcError> {
        if prefix.is_empty() {
            return Err(RpcError::InvalidRequest("no name prefix specified".into()));
        }
        let scan_prefix = format!("{prefix}:");

        let result = self
            .method("name_scan")
            .invoke(json!([scan_prefix, NAME_SCAN_MAX_RESULTS]))
            .await?;
        let entries: Vec<NameScanEntry> = serde_json::from_value(result)?;

        let mut names = BTreeMap::new();
        for entry in entries {
            if let Some(stripped) = entry.name.strip_prefix(&scan_prefix) {
                names.insert(stripped.to_owned(), parse_nvs_value(&entry.value));
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::JsonRpcRequest;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn client_for(server: &MockServer, use_ranking: bool) -> NodeClient {
        let http = reqwest::Client::new();
        let pool: Vec<Url> = vec![server.uri().parse().unwrap()];
        let selector = Arc::new(NodeSelector::new(http.clone(), pool.clone()));
        NodeClient::new(FailoverExecutor::new(http), selector, pool, use_ranking)
    }

    /// Answers `name_scan` with a fixed record set, echoing the request id.
    struct NameScan(Value);

    impl Respond for NameScan {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: JsonRpcRequest = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": body.id, "result": self.0 }))
        }
    }

    #[tokio::test]
    async fn method_handles_are_cached_per_name() {
        let server = MockServer::start().await;
        let client = client_for(&server, false);

        let first = client.method("getinfo");
        let second = client.method("getinfo");
        assert!(Arc::ptr_eq(&first.name, &second.name));
        assert_eq!(first.name(), "getinfo");

        let other = client.method("getblockcount");
        assert!(!Arc::ptr_eq(&first.name, &other.name));
    }

    #[tokio::test]
    async fn get_names_filters_strips_and_decodes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(NameScan(json!([
                { "name": "dns:alpha", "value": "A=1\nB=2\n" },
                { "name": "dns:beta", "value": "host=example.org\n" },
                // Lexically after the prefix but not under it.
                { "name": "dnsx:gamma", "value": "C=3\n" },
            ])))
            .mount(&server)
            .await;

        let names = client_for(&server, false).get_names("dns").await.unwrap();

        assert_eq!(names.len(), 2);
        assert_eq!(names["alpha"]["A"], "1");
        assert_eq!(names["alpha"]["B"], "2");
        assert_eq!(names["beta"]["host"], "example.org");
        assert!(!names.contains_key("gamma"));
    }

    #[tokio::test]
    async fn get_names_requires_a_prefix() {
        let server = MockServer::start().await;
        let client = client_for(&server, false);
        let err = client.get_names("").await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidRequest(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ranked_calls_probe_once_then_reuse_the_ranking() {
        let server = MockServer::start().await;

        struct Echo;
        impl Respond for Echo {
            fn respond(&self, request: &Request) -> ResponseTemplate {
                let body: JsonRpcRequest = serde_json::from_slice(&request.body).unwrap();
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": body.id, "result": 7 }))
            }
        }
        Mock::given(method("POST")).respond_with(Echo).mount(&server).await;

        let client = client_for(&server, true);
        assert_eq!(client.call("getblockcount", json!([])).await.unwrap(), json!(7));
        let after_first = server.received_requests().await.unwrap().len();
        // 3 rating probes plus the call itself.
        assert_eq!(after_first, 4);

        assert_eq!(client.call("getblockcount", json!([])).await.unwrap(), json!(7));
        assert_eq!(server.received_requests().await.unwrap().len(), after_first + 1);
    }
}
