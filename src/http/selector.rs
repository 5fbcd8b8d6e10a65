//! Consensus-based rating of the candidate node pool.
//!
//! Nodes are semi-trusted: any one of them may be down, stale, or on a fork.
//! A rating pass probes every candidate for its chain height, keeps the
//! candidates that agree with the majority view, and orders them by measured
//! latency. The resulting ranking feeds the failover executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::seq::SliceRandom;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use url::Url;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse};
use crate::util::request_id;

/// Independent status probes per candidate. More than one so a single slow
/// or dropped probe does not misjudge a healthy node.
pub const PROBES_PER_NODE: usize = 3;

/// Default deadline for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lightweight status method every candidate must answer.
const PROBE_METHOD: &str = "getblockcount";

/// One candidate's measurements from a rating pass.
struct Candidate {
    url: Url,
    heights: Vec<u64>,
    latency: Duration,
}

/// Produces and caches a trust-ordered ranking of the node pool.
///
/// The pass runs lazily on first need and the result is cached for the
/// process lifetime; [`refresh`](NodeSelector::refresh) reruns it on demand
/// and replaces the cache.
pub struct NodeSelector {
    client: reqwest::Client,
    pool: Vec<Url>,
    probe_timeout: Duration,
    ranking: RwLock<Option<Arc<Vec<Url>>>>,
}

impl NodeSelector {
    pub fn new(client: reqwest::Client, pool: Vec<Url>) -> Self {
        Self::with_probe_timeout(client, pool, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_probe_timeout(client: reqwest::Client, pool: Vec<Url>, probe_timeout: Duration) -> Self {
        Self {
            client,
            pool,
            probe_timeout,
            ranking: RwLock::new(None),
        }
    }

    /// Returns the cached ranking, running the rating pass first if none
    /// exists yet. Concurrent first callers serialize on the write lock so
    /// the pass runs once.
    pub async fn ranking(&self) -> Arc<Vec<Url>> {
        if let Some(ranked) = &*self.ranking.read().await {
            return ranked.clone();
        }
        let mut guard = self.ranking.write().await;
        if let Some(ranked) = &*guard {
            return ranked.clone();
        }
        let ranked = Arc::new(self.rate().await);
        *guard = Some(ranked.clone());
        ranked
    }

    /// Runs a fresh rating pass and replaces the cached ranking.
    pub async fn refresh(&self) -> Arc<Vec<Url>> {
        let mut guard = self.ranking.write().await;
        let ranked = Arc::new(self.rate().await);
        *guard = Some(ranked.clone());
        ranked
    }

    /// The rating pass itself.
    ///
    /// 1. shuffle the pool so the same node is not always probed first;
    /// 2. probe every candidate concurrently, [`PROBES_PER_NODE`] times each;
    /// 3. drop candidates with zero successful probes;
    /// 4. tally reported heights across all probes; consensus height is the
    ///    most frequent one, ties broken by the larger height;
    /// 5. keep candidates with at least one probe at the consensus height;
    /// 6. order them by total probe latency, fastest first.
    async fn rate(&self) -> Vec<Url> {
        let mut pool = self.pool.clone();
        pool.shuffle(&mut rand::thread_rng());
        info!(nodes = pool.len(); "rating candidate nodes");

        let mut probes = JoinSet::new();
        for url in pool {
            let client = self.client.clone();
            let probe_timeout = self.probe_timeout;
            probes.spawn(async move {
                let mut single = JoinSet::new();
                for _ in 0..PROBES_PER_NODE {
                    let client = client.clone();
                    let url = url.clone();
                    single.spawn(async move { probe(&client, &url, probe_timeout).await });
                }
                let mut heights = Vec::new();
                let mut latency = Duration::ZERO;
                while let Some(joined) = single.join_next().await {
                    let Ok((height, elapsed)) = joined else { continue };
                    // Failed probes count too: time wasted on a flaky node
                    // is part of its score.
                    latency += elapsed;
                    if let Some(height) = height {
                        heights.push(height);
                    }
                }
                Candidate { url, heights, latency }
            });
        }

        let mut candidates = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let Ok(candidate) = joined else { continue };
            if candidate.heights.is_empty() {
                debug!(node = candidate.url.as_str(); "excluding unreachable candidate");
            } else {
                candidates.push(candidate);
            }
        }

        let mut tally: HashMap<u64, usize> = HashMap::new();
        for candidate in &candidates {
            for height in &candidate.heights {
                *tally.entry(*height).or_default() += 1;
            }
        }
        let Some(consensus) = tally
            .into_iter()
            .max_by_key(|(height, count)| (*count, *height))
            .map(|(height, _)| height)
        else {
            info!("node rating found no reachable candidate");
            return Vec::new();
        };

        candidates.retain(|candidate| {
            let agrees = candidate.heights.contains(&consensus);
            if !agrees {
                debug!(
                    node = candidate.url.as_str(),
                    heights:? = candidate.heights;
                    "excluding forked or stale candidate"
                );
            }
            agrees
        });
        candidates.sort_by_key(|candidate| candidate.latency);

        info!(
            consensus_height = consensus,
            kept = candidates.len();
            "node rating complete"
        );
        candidates.into_iter().map(|candidate| candidate.url).collect()
    }
}

/// One status probe: the reported chain height (`None` on any failure) and
/// how long the probe took either way.
async fn probe(client: &reqwest::Client, url: &Url, probe_timeout: Duration) -> (Option<u64>, Duration) {
    let request = JsonRpcRequest::new(request_id(12), PROBE_METHOD, json!([]));
    let start = Instant::now();
    let exchange = async {
        client
            .post(url.clone())
            .json(&request)
            .send()
            .await?
            .json::<JsonRpcResponse>()
            .await
    };
    let height = match tokio::time::timeout(probe_timeout, exchange).await {
        Ok(Ok(body)) => body.result.as_ref().and_then(Value::as_u64),
        _ => None,
    };
    (height, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Answers the probe with a fixed height, echoing the request id.
    struct Height(u64, Duration);

    impl Respond for Height {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: JsonRpcRequest = serde_json::from_slice(&request.body).unwrap();
            ResponseTemplate::new(200)
                .set_body_json(json!({ "jsonrpc": "2.0", "id": body.id, "result": self.0 }))
                .set_delay(self.1)
        }
    }

    async fn node(height: u64, delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(Height(height, delay))
            .mount(&server)
            .await;
        server
    }

    fn selector(servers: &[&MockServer]) -> NodeSelector {
        let pool = servers.iter().map(|s| s.uri().parse().unwrap()).collect();
        NodeSelector::new(reqwest::Client::new(), pool)
    }

    #[tokio::test]
    async fn majority_height_wins_and_latency_orders_the_ranking() {
        let fast = node(1000, Duration::ZERO).await;
        let slow = node(1000, Duration::from_millis(300)).await;
        let forked = node(999, Duration::ZERO).await;

        let ranking = selector(&[&fast, &slow, &forked]).ranking().await;

        let expected: Vec<Url> = vec![fast.uri().parse().unwrap(), slow.uri().parse().unwrap()];
        assert_eq!(*ranking, expected);
    }

    #[tokio::test]
    async fn unreachable_pool_yields_empty_ranking() {
        // Nothing listens on these ports.
        let pool = vec![
            "http://127.0.0.1:1".parse().unwrap(),
            "http://127.0.0.1:2".parse().unwrap(),
        ];
        let selector =
            NodeSelector::with_probe_timeout(reqwest::Client::new(), pool, Duration::from_millis(500));
        assert!(selector.ranking().await.is_empty());
    }

    #[tokio::test]
    async fn candidate_with_zero_successful_probes_is_excluded() {
        let healthy = node(500, Duration::ZERO).await;

        let dead = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&dead)
            .await;

        let ranking = selector(&[&healthy, &dead]).ranking().await;
        assert_eq!(*ranking, vec![healthy.uri().parse::<Url>().unwrap()]);
    }

    #[tokio::test]
    async fn failed_probe_time_counts_against_the_latency_score() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Fails two probes slowly, answers the third instantly.
        struct Flaky(u64, AtomicUsize);
        impl Respond for Flaky {
            fn respond(&self, request: &Request) -> ResponseTemplate {
                if self.1.fetch_add(1, Ordering::Relaxed) < 2 {
                    return ResponseTemplate::new(500).set_delay(Duration::from_millis(200));
                }
                Height(self.0, Duration::ZERO).respond(request)
            }
        }

        let flaky = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(Flaky(700, AtomicUsize::new(0)))
            .mount(&flaky)
            .await;

        // Answers all three probes with moderate latency; total probe time
        // is well under the flaky node's two wasted 200 ms probes.
        let steady = node(700, Duration::from_millis(60)).await;

        let ranking = selector(&[&flaky, &steady]).ranking().await;
        let expected: Vec<Url> = vec![steady.uri().parse().unwrap(), flaky.uri().parse().unwrap()];
        assert_eq!(*ranking, expected);
    }

    #[tokio::test]
    async fn tie_breaks_to_the_larger_height() {
        let behind = node(100, Duration::ZERO).await;
        let ahead = node(101, Duration::ZERO).await;

        // 3 probes each: tied tally, the more advanced view wins.
        let ranking = selector(&[&behind, &ahead]).ranking().await;
        assert_eq!(*ranking, vec![ahead.uri().parse::<Url>().unwrap()]);
    }

    #[tokio::test]
    async fn ranking_is_cached_until_refresh() {
        let server = node(42, Duration::ZERO).await;
        let selector = selector(&[&server]);

        selector.ranking().await;
        let probes_after_first = server.received_requests().await.unwrap().len();
        assert_eq!(probes_after_first, PROBES_PER_NODE);

        // Cached: no further probes.
        selector.ranking().await;
        assert_eq!(server.received_requests().await.unwrap().len(), probes_after_first);

        // Explicit refresh probes again.
        selector.refresh().await;
        assert_eq!(
            server.received_requests().await.unwrap().len(),
            probes_after_first + PROBES_PER_NODE
        );
    }
}
