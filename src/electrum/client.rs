//! High-level client for ElectrumX-style indexer calls.

use std::time::Duration;

use log::debug;
use serde_json::Value;

use crate::electrum::connection::{DEFAULT_RECONNECT_DELAY, DuplexConnection};
use crate::rpc::{JsonRpcRequest, RpcError};
use crate::util::request_id;

/// Byte length of request ids on the indexer transport.
pub const ELECTRUM_ID_BYTES: usize = 4;

/// Send attempts per logical call; a reconnect sits between consecutive
/// attempts. There is only one connection, so retrying means redialing
/// rather than picking another candidate.
pub const RECONNECT_ATTEMPTS: u32 = 3;

/// Issues JSON-RPC calls over the shared persistent indexer connection.
///
/// Method names are the indexer's dotted names
/// (`blockchain.scripthash.get_history`) and pass through verbatim.
#[derive(Clone)]
pub struct ElectrumClient {
    connection: DuplexConnection,
    reconnect_delay: Duration,
    attempts: u32,
}

impl ElectrumClient {
    pub fn new(connection: DuplexConnection) -> Self {
        Self::with_config(connection, DEFAULT_RECONNECT_DELAY, RECONNECT_ATTEMPTS)
    }

    pub fn with_config(connection: DuplexConnection, reconnect_delay: Duration, attempts: u32) -> Self {
        Self {
            connection,
            reconnect_delay,
            attempts,
        }
    }

    /// The underlying connection, for explicit recovery.
    pub fn connection(&self) -> &DuplexConnection {
        &self.connection
    }

    /// Issues one logical call.
    ///
    /// Getting the request onto the wire is retried with a bounded
    /// reconnect sequence; once it is sent, awaiting the response is not —
    /// a teardown while waiting surfaces as the NetworkError that drained
    /// the registry, and domain errors are final either way.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        debug!(target: "rpc", method = method; "calling indexer");
        let outcome = self.call_with_reconnect(method, params).await;
        match &outcome {
            Ok(_) => debug!(target: "rpc", method = method; "indexer call succeeded"),
            Err(err) => debug!(target: "rpc", method = method, error:% = err; "indexer call failed"),
        }
        outcome
    }

    async fn call_with_reconnect(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        let rx = loop {
            attempt += 1;
            // Fresh id per attempt: a previous attempt's request may still
            // be in flight somewhere, and ids must not collide.
            let id = request_id(ELECTRUM_ID_BYTES);
            let line = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params.clone()))?;
            let rx = self.connection.registry().register(&id);

            match self.send(line).await {
                Ok(()) => break rx,
                Err(err) => {
                    // Never reached the wire; no response can arrive.
                    self.connection.registry().discard(&id);
                    if attempt == self.attempts {
                        return Err(err);
                    }
                    debug!(
                        target: "rpc",
                        method = method,
                        attempt = attempt,
                        error:% = err;
                        "indexer send failed, reconnecting"
                    );
                    self.connection.reconnect(self.reconnect_delay, true).await;
                },
            }
        };

        rx.await
            .map_err(|_| RpcError::network("connection dropped before settling"))?
    }

    async fn send(&self, line: String) -> Result<(), RpcError> {
        let handle = self.connection.acquire().await?;
        handle
            .send(line)
            .await
            .map_err(|_| RpcError::network("connection closed while sending"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::JsonRpcRequest;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Fake indexer that rejects `server.banner` with a JSON-RPC error and
    /// echoes params for everything else.
    async fn fake_indexer() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let req: JsonRpcRequest = serde_json::from_str(&line).unwrap();
                        let reply = if req.method == "server.banner" {
                            json!({
                                "jsonrpc": "2.0",
                                "id": req.id,
                                "error": { "code": 1, "message": "banner disabled" },
                            })
                        } else {
                            json!({ "jsonrpc": "2.0", "id": req.id, "result": req.params })
                        };
                        let _ = write_half.write_all(reply.to_string().as_bytes()).await;
                        let _ = write_half.write_all(b"\n").await;
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn dotted_methods_pass_through() {
        let addr = fake_indexer().await;
        let client = ElectrumClient::new(DuplexConnection::new(vec![addr]));

        let result = client
            .call("blockchain.scripthash.get_history", json!(["abcd"]))
            .await
            .unwrap();
        assert_eq!(result, json!(["abcd"]));
    }

    #[tokio::test]
    async fn indexer_error_is_a_domain_error() {
        let addr = fake_indexer().await;
        let client = ElectrumClient::new(DuplexConnection::new(vec![addr]));

        let err = client.call("server.banner", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Domain { code: 1, .. }));
    }

    #[tokio::test]
    async fn reconnect_budget_caps_send_attempts() {
        // Dead endpoint: every dial is refused.
        let connection = DuplexConnection::new(vec!["127.0.0.1:1".into()]);
        let client = ElectrumClient::with_config(connection, Duration::from_millis(1), 3);

        let err = client.call("server.version", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Network { .. }));
        assert_eq!(client.connection().registry().outstanding(), 0);
    }

    #[tokio::test]
    async fn dead_then_live_endpoint_recovers_via_rotation() {
        let addr = fake_indexer().await;
        // First dial hits the dead address, the reconnect rotates to the
        // live one.
        let connection = DuplexConnection::new(vec!["127.0.0.1:1".into(), addr]);
        let client = ElectrumClient::with_config(connection, Duration::from_millis(1), 3);

        let result = client.call("server.version", json!(["1.4"])).await.unwrap();
        assert_eq!(result, json!(["1.4"]));
    }
}
