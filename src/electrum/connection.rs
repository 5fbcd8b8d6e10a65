//! Lifecycle of the persistent indexer connection.
//!
//! One duplex TCP connection is shared by every caller. It is dialed lazily
//! on first use; callers that arrive mid-handshake queue up and are replayed
//! once the socket opens. Any transport error tears the state back down so
//! the next caller dials fresh.
//!
//! Framing is newline-delimited JSON: one JSON-RPC object per line in each
//! direction.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::rpc::{CorrelationRegistry, JsonRpcResponse, RpcError};

/// Delay before redialing after a forced reconnect.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Outbound queue depth towards the writer task.
const WRITE_QUEUE_DEPTH: usize = 64;

/// Cloneable handle for writing one serialized request line.
pub type WriteHandle = mpsc::Sender<String>;

enum ConnState {
    /// No connection and nobody dialing.
    Absent,
    /// A dial is in flight; waiters are replayed when it settles.
    Connecting {
        waiters: Vec<oneshot::Sender<Result<WriteHandle, RpcError>>>,
    },
    /// Live connection. The generation ties reader/writer tasks to the
    /// connection they belong to.
    Open { handle: WriteHandle, generation: u64 },
}

/// Shared manager of the single persistent indexer connection.
///
/// Cheap to clone; all clones share one connection and one registry.
#[derive(Clone)]
pub struct DuplexConnection {
    inner: Arc<Inner>,
}

struct Inner {
    pool: Vec<String>,
    registry: CorrelationRegistry,
    state: Mutex<ConnState>,
    generation: AtomicU64,
    dial_count: AtomicUsize,
}

impl DuplexConnection {
    /// `pool` is the indexer address list (`host:port`); successive dial
    /// attempts rotate through it so one dead endpoint cannot wedge
    /// reconnection.
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                registry: CorrelationRegistry::new(),
                state: Mutex::new(ConnState::Absent),
                generation: AtomicU64::new(0),
                dial_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Registry that correlates this transport's responses.
    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }

    /// Returns a write handle, connecting lazily.
    ///
    /// If the connection is open this returns immediately; if a dial is in
    /// flight the caller joins the waiter queue; otherwise a detached dial
    /// task is started and this caller waits for it like everyone else.
    /// The dial runs to completion even if every waiting caller is
    /// cancelled, so an abandoned acquire can never wedge the state machine
    /// in Connecting.
    pub async fn acquire(&self) -> Result<WriteHandle, RpcError> {
        let rx = {
            let mut state = self.inner.state.lock().expect("connection state lock poisoned");
            match &mut *state {
                ConnState::Open { handle, .. } => return Ok(handle.clone()),
                ConnState::Connecting { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                },
                ConnState::Absent => {
                    let (tx, rx) = oneshot::channel();
                    *state = ConnState::Connecting { waiters: vec![tx] };
                    let conn = self.clone();
                    tokio::spawn(async move {
                        let _ = conn.connect().await;
                    });
                    rx
                },
            }
        };

        rx.await
            .map_err(|_| RpcError::network("connection attempt abandoned"))?
    }

    /// Forces the connection down and waits `delay` before returning, so
    /// the caller's next acquire dials fresh.
    ///
    /// With `close_existing` the old write handle is released immediately;
    /// without it the handle is kept through the delay, giving in-flight
    /// senders a grace period before the writer winds down.
    pub async fn reconnect(&self, delay: Duration, close_existing: bool) {
        let (had_open, stale) = {
            let mut state = self.inner.state.lock().expect("connection state lock poisoned");
            match std::mem::replace(&mut *state, ConnState::Absent) {
                ConnState::Open { handle, .. } => (true, (!close_existing).then_some(handle)),
                ConnState::Connecting { waiters } => {
                    for waiter in waiters {
                        let _ = waiter.send(Err(RpcError::network("reconnect requested")));
                    }
                    (false, None)
                },
                ConnState::Absent => (false, None),
            }
        };
        if had_open {
            info!("indexer connection reset");
            self.inner.registry.drain(RpcError::network("connection reset"));
        }
        tokio::time::sleep(delay).await;
        drop(stale);
    }

    /// Next address to dial, rotating through the pool.
    fn next_addr(&self) -> Result<String, RpcError> {
        if self.inner.pool.is_empty() {
            return Err(RpcError::InvalidRequest("indexer address pool is empty".into()));
        }
        let n = self.inner.dial_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.inner.pool[n % self.inner.pool.len()].clone())
    }

    /// Dials, installs the Open state, and replays queued waiters.
    async fn connect(&self) -> Result<WriteHandle, RpcError> {
        let addr = match self.next_addr() {
            Ok(addr) => addr,
            Err(err) => {
                self.fail_waiters(err.clone());
                return Err(err);
            },
        };
        debug!(addr = &*addr; "dialing indexer");

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let (read_half, write_half) = stream.into_split();
                let (tx, rx) = mpsc::channel::<String>(WRITE_QUEUE_DEPTH);

                let reader = self.clone();
                tokio::spawn(async move { reader.read_loop(read_half, generation).await });
                let writer = self.clone();
                tokio::spawn(async move { writer.write_loop(write_half, rx, generation).await });

                let waiters = {
                    let mut state = self.inner.state.lock().expect("connection state lock poisoned");
                    let waiters = match std::mem::replace(
                        &mut *state,
                        ConnState::Open {
                            handle: tx.clone(),
                            generation,
                        },
                    ) {
                        ConnState::Connecting { waiters } => waiters,
                        _ => Vec::new(),
                    };
                    waiters
                };
                for waiter in waiters {
                    let _ = waiter.send(Ok(tx.clone()));
                }
                info!(addr = &*addr; "indexer connection open");
                Ok(tx)
            },
            Err(err) => {
                let err = RpcError::network(format!("cannot connect to {addr}: {err}"));
                warn!(addr = &*addr, error:% = err; "indexer dial failed");
                self.fail_waiters(err.clone());
                Err(err)
            },
        }
    }

    /// Handshake failure: every queued waiter gets the error, state resets
    /// so the next caller retries cleanly.
    fn fail_waiters(&self, err: RpcError) {
        let waiters = {
            let mut state = self.inner.state.lock().expect("connection state lock poisoned");
            match std::mem::replace(&mut *state, ConnState::Absent) {
                ConnState::Connecting { waiters } => waiters,
                other => {
                    *state = other;
                    Vec::new()
                },
            }
        };
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Reads response lines and settles them through the registry until the
    /// connection dies.
    async fn read_loop(self, read_half: OwnedReadHalf, generation: u64) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => self.dispatch(&line),
                Ok(None) => {
                    self.teardown(generation, RpcError::network("indexer closed the connection"));
                    return;
                },
                Err(err) => {
                    self.teardown(generation, RpcError::network(format!("indexer read failed: {err}")));
                    return;
                },
            }
        }
    }

    /// Correlates one inbound message; messages with unknown or missing ids
    /// are dropped.
    fn dispatch(&self, line: &str) {
        match serde_json::from_str::<JsonRpcResponse>(line) {
            Ok(resp) => match resp.id.clone() {
                Some(id) => self.inner.registry.settle(&id, resp.into_outcome()),
                None => debug!("dropping indexer message without id"),
            },
            Err(err) => debug!(error:% = err; "dropping unparseable indexer message"),
        }
    }

    /// Forwards queued request lines onto the socket until the handle side
    /// closes or a write fails.
    async fn write_loop(self, mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<String>, generation: u64) {
        while let Some(line) = rx.recv().await {
            if let Err(err) = write_line(&mut write_half, &line).await {
                self.teardown(generation, RpcError::network(format!("indexer write failed: {err}")));
                return;
            }
        }
        // All handles dropped: torn down or reconnected elsewhere.
        let _ = write_half.shutdown().await;
    }

    /// Transport error or close: clear the handle, set Absent, and fail all
    /// pending requests of this transport with the same reason.
    ///
    /// A task belonging to an already-replaced generation must not tear
    /// down its successor.
    fn teardown(&self, generation: u64, error: RpcError) {
        {
            let mut state = self.inner.state.lock().expect("connection state lock poisoned");
            match &*state {
                ConnState::Open { generation: current, .. } if *current == generation => {
                    *state = ConnState::Absent;
                },
                _ => return,
            }
        }
        warn!(error:% = error; "indexer connection lost");
        self.inner.registry.drain(error);
    }
}

async fn write_line(write_half: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await?;
    write_half.flush().await
}
