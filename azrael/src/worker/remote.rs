//! Remote workers: the framed TCP leg of the worker protocol.
//!
//! The broker (orchestrator side) accepts connections and wraps each one in a
//! [`RemoteEndpoint`]; the worker process dials in with [`serve`] and answers
//! requests until the connection drops, then reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{SimError, SimResult};

use super::protocol::{read_frame, write_frame, WorkerReply, WorkerRequest};
use super::{solver, WorkerEndpoint};

/// Broker-side handle to one connected remote worker.
pub struct RemoteEndpoint {
    stream: TcpStream,
    peer: SocketAddr,
}

impl RemoteEndpoint {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

#[async_trait]
impl WorkerEndpoint for RemoteEndpoint {
    fn name(&self) -> String {
        format!("remote-{}", self.peer)
    }

    async fn step(&mut self, request: WorkerRequest) -> SimResult<WorkerReply> {
        let island = request.island;
        write_frame(&mut self.stream, &request).await?;
        let reply: WorkerReply = read_frame(&mut self.stream).await?;
        if reply.island != island {
            return Err(SimError::Protocol(format!(
                "reply for island {} on request for island {island}",
                reply.island
            )));
        }
        Ok(reply)
    }

    // A failed call leaves the socket mid-conversation; the worker will
    // reconnect with a clean one.
    fn reusable_after_error(&self) -> bool {
        false
    }
}

/// Worker-process entry: connect to the broker and answer requests forever.
/// Reconnects with a fixed backoff when the broker goes away.
pub async fn serve(broker_addr: &str) -> SimResult<()> {
    loop {
        match TcpStream::connect(broker_addr).await {
            Ok(stream) => {
                info!(addr = broker_addr, "connected to broker");
                if let Err(e) = serve_connection(stream).await {
                    warn!(error = %e, "broker connection lost");
                }
            }
            Err(e) => {
                warn!(addr = broker_addr, error = %e, "broker unreachable");
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Answer requests on one connection until it breaks.
pub async fn serve_connection(mut stream: TcpStream) -> SimResult<()> {
    loop {
        let request: WorkerRequest = read_frame(&mut stream).await?;
        debug!(
            island = request.island,
            bodies = request.bodies.len(),
            "island received"
        );
        let reply = solver::step_island(&request);
        write_frame(&mut stream, &reply).await?;
    }
}
