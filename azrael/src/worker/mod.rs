//! The worker pool: a fleet of stateless island solvers behind a single
//! async submit endpoint.
//!
//! Requests go into one shared job queue; every endpoint task pulls the next
//! job as soon as it is idle, so work naturally fans out to free replicas.
//! In-flight requests are bounded by the queue capacity, and every call
//! carries a per-request timeout. Endpoints come in two flavours: in-process
//! solvers and remote processes speaking the framed protocol over TCP.

pub mod protocol;
pub mod remote;
pub mod solver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{SimError, SimResult};

use self::protocol::{WorkerReply, WorkerRequest};

/// One solver replica the pool can hand islands to.
#[async_trait]
pub trait WorkerEndpoint: Send {
    /// Identifier for logs.
    fn name(&self) -> String;

    /// Simulate one island for one step.
    async fn step(&mut self, request: WorkerRequest) -> SimResult<WorkerReply>;

    /// Whether the endpoint can serve further requests after a failed one.
    /// Transports with in-flight state (a socket mid-reply) cannot.
    fn reusable_after_error(&self) -> bool {
        true
    }
}

/// In-process endpoint running the solver directly.
pub struct LocalEndpoint {
    index: usize,
}

impl LocalEndpoint {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

#[async_trait]
impl WorkerEndpoint for LocalEndpoint {
    fn name(&self) -> String {
        format!("local-{}", self.index)
    }

    async fn step(&mut self, request: WorkerRequest) -> SimResult<WorkerReply> {
        Ok(solver::step_island(&request))
    }
}

struct Job {
    request: WorkerRequest,
    reply: oneshot::Sender<SimResult<WorkerReply>>,
}

/// Reply future for a submitted island.
pub struct PendingReply {
    rx: oneshot::Receiver<SimResult<WorkerReply>>,
}

impl PendingReply {
    /// Wait for the worker's answer. Resolves to `WorkerTimeout`/`Worker`
    /// errors when the assigned replica failed.
    pub async fn wait(self) -> SimResult<WorkerReply> {
        self.rx.await.map_err(|_| SimError::Shutdown)?
    }
}

/// Handle to the worker fleet. Cheap to clone.
#[derive(Clone)]
pub struct WorkerPool {
    jobs: mpsc::Sender<Job>,
    shared: Arc<Mutex<mpsc::Receiver<Job>>>,
    timeout: Duration,
}

impl WorkerPool {
    /// Create a pool with the given in-flight bound and per-request timeout.
    /// The pool starts with no endpoints; add local workers or start a
    /// listener before submitting.
    pub fn new(in_flight: usize, timeout: Duration) -> Self {
        let (jobs, rx) = mpsc::channel(in_flight.max(1));
        Self {
            jobs,
            shared: Arc::new(Mutex::new(rx)),
            timeout,
        }
    }

    /// Register an endpoint; it starts pulling jobs immediately.
    pub fn add_endpoint(&self, endpoint: Box<dyn WorkerEndpoint>) {
        let shared = Arc::clone(&self.shared);
        let timeout = self.timeout;
        tokio::spawn(run_endpoint(shared, endpoint, timeout));
    }

    /// Spawn `count` in-process solver workers.
    pub fn spawn_local(&self, count: usize) {
        for index in 0..count {
            self.add_endpoint(Box::new(LocalEndpoint::new(index)));
        }
        info!(count, "local workers started");
    }

    /// Start accepting remote workers on `addr`. Returns the bound address
    /// (useful with port 0 in tests).
    pub async fn listen(&self, addr: &str) -> SimResult<std::net::SocketAddr> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "worker broker listening");
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(%peer, "remote worker connected");
                        pool.add_endpoint(Box::new(remote::RemoteEndpoint::new(stream, peer)));
                    }
                    Err(e) => {
                        warn!(error = %e, "worker accept failed");
                        break;
                    }
                }
            }
        });
        Ok(local)
    }

    /// Submit one island. Waits for queue space when the in-flight bound is
    /// reached; fails only when the pool is gone.
    pub async fn submit(&self, request: WorkerRequest) -> SimResult<PendingReply> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Job {
                request,
                reply: tx,
            })
            .await
            .map_err(|_| SimError::Shutdown)?;
        Ok(PendingReply { rx })
    }
}

async fn run_endpoint(
    shared: Arc<Mutex<mpsc::Receiver<Job>>>,
    mut endpoint: Box<dyn WorkerEndpoint>,
    timeout: Duration,
) {
    let name = endpoint.name();
    debug!(worker = %name, "endpoint ready");
    loop {
        // Idle replicas compete for the next job; holding the lock only
        // while waiting keeps handoff fair enough.
        let job = {
            let mut rx = shared.lock().await;
            match rx.recv().await {
                Some(job) => job,
                None => break,
            }
        };

        let island = job.request.island;
        let result = match tokio::time::timeout(timeout, endpoint.step(job.request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                warn!(worker = %name, island, error = %e, "worker call failed");
                Err(e)
            }
            Err(_) => {
                warn!(worker = %name, island, ?timeout, "worker call timed out");
                Err(SimError::WorkerTimeout(timeout))
            }
        };

        let failed = result.is_err();
        // The submitter may have given up on the tick already.
        let _ = job.reply.send(result);

        if failed && !endpoint.reusable_after_error() {
            warn!(worker = %name, "endpoint retired after failure");
            break;
        }
    }
    debug!(worker = %name, "endpoint stopped");
}
