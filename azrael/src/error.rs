//! Error taxonomy for the simulation core.

use thiserror::Error;

use crate::body::BodyId;

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by the simulation core.
///
/// Command-originated errors (`Validation`, `NotFound`, `Conflict`,
/// `Backpressure`, `Shutdown`) surface synchronously on the per-command reply
/// channel. Worker-level failures (`WorkerTimeout`, `Worker`) stay internal:
/// the affected bodies simply do not advance for one tick.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed command payload (bad quaternion, negative scale, ...).
    #[error("invalid command: {0}")]
    Validation(String),

    /// The command targets a body that does not exist (or was removed).
    #[error("no such body: {0}")]
    NotFound(BodyId),

    /// Optimistic write lost the race even after retries.
    #[error("version conflict on body {0}")]
    Conflict(BodyId),

    /// The command queue is full; the caller may retry.
    #[error("command queue full")]
    Backpressure,

    /// A worker did not answer within the per-request timeout.
    #[error("worker timed out after {0:?}")]
    WorkerTimeout(std::time::Duration),

    /// A worker answered with an error or the transport to it broke.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The orchestrator is shutting down; the command was not applied.
    #[error("shutting down")]
    Shutdown,

    /// Malformed frame or payload on the worker wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unrecoverable condition; the orchestrator aborts its run loop.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
