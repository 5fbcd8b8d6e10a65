//! Retry-with-failover execution of single JSON-RPC calls.
//!
//! One logical call gets a fixed budget of attempts. Each attempt takes the
//! next candidate off the back of the list, sends one request with a hard
//! per-attempt deadline, and classifies the outcome: transport failures burn
//! an attempt and move on, everything else is final.

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use url::Url;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse, RpcError};
use crate::util::request_id;

/// Attempt budget for one logical call.
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default hard deadline per attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Byte length of request ids on the node transport.
pub const NODE_ID_BYTES: usize = 12;

/// Issues a request against an ordered candidate list, failing over to the
/// next candidate on any transport failure.
#[derive(Clone)]
pub struct FailoverExecutor {
    client: reqwest::Client,
    attempts: u32,
}

impl FailoverExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_attempts(client, DEFAULT_ATTEMPTS)
    }

    pub fn with_attempts(client: reqwest::Client, attempts: u32) -> Self {
        Self { client, attempts }
    }

    /// Runs one logical call against `candidates`.
    ///
    /// Candidates are popped from the END of the list, so callers supply
    /// either a shuffled pool or a ranking with the most trustworthy node
    /// last. Running out of candidates still consumes attempts: an empty
    /// list fails with [`RpcError::Exhausted`] after the full budget.
    ///
    /// Non-retryable outcomes end the call immediately:
    /// - a response carrying a JSON-RPC `error` object ([`RpcError::Domain`]);
    /// - a response whose echoed id differs from the request id
    ///   ([`RpcError::Protocol`]).
    pub async fn call(
        &self,
        mut candidates: Vec<Url>,
        method: &str,
        params: &Value,
        per_attempt: Duration,
    ) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        loop {
            if attempt == self.attempts {
                return Err(RpcError::Exhausted { attempts: attempt });
            }
            attempt += 1;

            let Some(url) = candidates.pop() else {
                debug!(method = method, attempt = attempt; "no candidate left for attempt");
                continue;
            };

            match self.attempt(&url, method, params, per_attempt).await {
                Ok(result) => return Ok(result),
                Err(err) if err.is_retryable() => {
                    warn!(
                        method = method,
                        node = url.as_str(),
                        attempt = attempt,
                        error:% = err;
                        "attempt failed, trying next candidate"
                    );
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// One network operation: send, await within the deadline, classify.
    async fn attempt(
        &self,
        url: &Url,
        method: &str,
        params: &Value,
        per_attempt: Duration,
    ) -> Result<Value, RpcError> {
        let id = request_id(NODE_ID_BYTES);
        let request = JsonRpcRequest::new(id.clone(), method, params.clone());

        let exchange = async {
            let resp = self.client.post(url.clone()).json(&request).send().await?;
            if !resp.status().is_success() {
                return Err(RpcError::Network {
                    message: format!("server returned {}", resp.status()),
                });
            }
            let body: JsonRpcResponse = resp.json().await?;
            Ok(body)
        };

        // The timeout drops the in-flight future, aborting the request.
        let body = tokio::time::timeout(per_attempt, exchange)
            .await
            .map_err(|_| RpcError::Timeout)??;

        if let Some(err) = body.error {
            return Err(RpcError::Domain {
                code: err.code,
                message: err.message,
            });
        }
        if body.id.as_deref() != Some(id.as_str()) {
            return Err(RpcError::Protocol {
                message: "returned info does not match requested one".into(),
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    fn executor() -> FailoverExecutor {
        FailoverExecutor::new(reqwest::Client::new())
    }

    /// Echoes the request id back with a fixed result.
    struct EchoId(Value);

    impl Respond for EchoId {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: JsonRpcRequest = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body.id,
                "result": self.0,
            }))
        }
    }

    #[tokio::test]
    async fn first_healthy_candidate_wins() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(EchoId(json!(42)))
            .mount(&server)
            .await;

        let result = executor()
            .call(
                vec![server.uri().parse().unwrap()],
                "getblockcount",
                &json!([]),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(result, json!(42));
    }

    #[tokio::test]
    async fn exhausts_exactly_three_attempts_across_three_candidates() {
        let mut servers = Vec::new();
        let mut candidates = Vec::new();
        for _ in 0..3 {
            let server = MockServer::start().await;
            // Unparseable body: the attempt fails after a real network operation.
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
                .mount(&server)
                .await;
            candidates.push(server.uri().parse().unwrap());
            servers.push(server);
        }

        let err = executor()
            .call(candidates, "getinfo", &json!([]), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Exhausted { attempts: 3 }));

        for server in &servers {
            assert_eq!(server.received_requests().await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn empty_candidate_list_fails_after_the_attempt_budget() {
        let err = executor()
            .call(Vec::new(), "getinfo", &json!([]), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Exhausted { attempts: 3 }));
    }

    #[tokio::test]
    async fn domain_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "whatever",
                "error": { "code": -5, "message": "name not found" },
            })))
            .mount(&server)
            .await;

        // A second candidate proves no failover happened.
        let fallback = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(EchoId(json!("unreachable")))
            .mount(&fallback)
            .await;

        let candidates = vec![fallback.uri().parse().unwrap(), server.uri().parse().unwrap()];
        let err = executor()
            .call(candidates, "name_show", &json!(["d/test"]), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Domain { code: -5, .. }));
        assert!(fallback.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mismatched_response_id_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": "someone-elses-id",
                "result": 7,
            })))
            .mount(&server)
            .await;

        let err = executor()
            .call(
                vec![server.uri().parse().unwrap()],
                "getblockcount",
                &json!([]),
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol { .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_node_times_out_and_fails_over() {
        let slow = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": "x", "result": 1 }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&slow)
            .await;

        let fast = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(EchoId(json!("fast")))
            .mount(&fast)
            .await;

        // Slow node is at the back, so it is tried first.
        let candidates = vec![fast.uri().parse().unwrap(), slow.uri().parse().unwrap()];
        let result = executor()
            .call(candidates, "getinfo", &json!([]), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(result, json!("fast"));
    }
}
