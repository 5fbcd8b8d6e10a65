//! Process-wide client context.
//!
//! All transport state lives here and is injected where needed; there are
//! no ambient singletons. One context owns one shared HTTP client, one
//! selector with its cached ranking, and one persistent indexer connection.

use std::sync::Arc;

use anyhow::Context;
use url::Url;

use crate::config::Settings;
use crate::electrum::{DuplexConnection, ElectrumClient};
use crate::http::{BatchQueue, FailoverExecutor, NodeClient, NodeSelector};

/// Owns the shared transport state and builds the per-transport clients.
#[derive(Clone)]
pub struct ClientContext {
    settings: Settings,
    http: reqwest::Client,
    node_pool: Vec<Url>,
    selector: Arc<NodeSelector>,
    connection: DuplexConnection,
}

impl ClientContext {
    pub fn new(settings: Settings) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .build()
            .context("Could not build HTTP client")?;

        let node_pool = settings
            .node
            .urls
            .iter()
            .map(|url| url.parse::<Url>().with_context(|| format!("Invalid node url: {url}")))
            .collect::<Result<Vec<_>, _>>()?;

        let selector = Arc::new(NodeSelector::with_probe_timeout(
            http.clone(),
            node_pool.clone(),
            settings.node.probe_timeout(),
        ));
        let connection = DuplexConnection::new(settings.electrumx.addrs.clone());

        Ok(Self {
            settings,
            http,
            node_pool,
            selector,
            connection,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    /// Client for calls against the node pool. Clones share this context's
    /// selector and its cached ranking.
    pub fn node_client(&self) -> NodeClient {
        let executor = FailoverExecutor::with_attempts(self.http.clone(), self.settings.node.attempts);
        NodeClient::with_request_timeout(
            executor,
            self.selector.clone(),
            self.node_pool.clone(),
            self.settings.node.use_ranking,
            self.settings.node.request_timeout(),
        )
    }

    /// Client for calls over the shared indexer connection.
    pub fn electrum_client(&self) -> ElectrumClient {
        ElectrumClient::with_config(
            self.connection.clone(),
            self.settings.electrumx.reconnect_delay(),
            self.settings.electrumx.reconnect_attempts,
        )
    }

    /// Coalescing queue for batched calls to a single endpoint.
    pub fn batch_queue(&self) -> BatchQueue {
        BatchQueue::new(self.http.clone())
    }
}
