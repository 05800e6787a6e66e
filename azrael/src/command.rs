//! Command intake: the bounded queue between the API façade and the tick
//! loop.
//!
//! Producers (API handlers) submit [`Command`] values and immediately get a
//! reply future; the orchestrator is the single consumer and drains the queue
//! at the start of every tick. A full queue fails the submit synchronously
//! with backpressure so callers can retry with their own policy.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::body::{BodyId, BodyPatch, RigidBody};
use crate::error::{SimError, SimResult};

/// Externally submitted mutation, applied at the next tick boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Create a body from a template; replies with the new id.
    Spawn { template: String, body: RigidBody },
    /// Destroy a body (one-tick tombstone).
    Remove { id: BodyId },
    /// Partial direct override of a body's fields.
    SetBody { id: BodyId, patch: BodyPatch },
    /// Update the force magnitude of one booster.
    SetForce {
        id: BodyId,
        booster: usize,
        force: f64,
    },
    /// Instantaneous impulse, converted to a velocity delta this tick.
    ApplyImpulse {
        id: BodyId,
        linear: DVec3,
        angular: DVec3,
    },
    /// Central force and torque applied for exactly one tick.
    DirectForce {
        id: BodyId,
        force: DVec3,
        torque: DVec3,
    },
}

impl Command {
    /// The body a command targets, if it targets an existing one.
    pub fn target(&self) -> Option<BodyId> {
        match self {
            Command::Spawn { .. } => None,
            Command::Remove { id }
            | Command::SetBody { id, .. }
            | Command::SetForce { id, .. }
            | Command::ApplyImpulse { id, .. }
            | Command::DirectForce { id, .. } => Some(*id),
        }
    }
}

/// Successful command result, delivered on the per-command reply channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `Spawn` reply: the id of the new body.
    Spawned(BodyId),
    /// Everything else.
    Applied,
}

/// A command bundled with its reply channel, as seen by the orchestrator.
#[derive(Debug)]
pub struct QueuedCommand {
    pub command: Command,
    reply: oneshot::Sender<SimResult<CommandOutcome>>,
}

impl QueuedCommand {
    /// Deliver the result to the submitting caller. A dropped receiver is
    /// not an error; the caller just stopped waiting.
    pub fn respond(self, result: SimResult<CommandOutcome>) {
        let _ = self.reply.send(result);
    }
}

/// Create the bounded intake queue.
pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Cloneable producer handle held by API handlers.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<QueuedCommand>,
}

impl CommandSender {
    /// Enqueue a command. Fails with [`SimError::Backpressure`] when the
    /// queue is full and [`SimError::Shutdown`] when the orchestrator is
    /// gone. On success the returned receiver resolves with the per-command
    /// outcome once the orchestrator has applied (or rejected) it.
    pub fn submit(
        &self,
        command: Command,
    ) -> SimResult<oneshot::Receiver<SimResult<CommandOutcome>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(QueuedCommand { command, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SimError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => SimError::Shutdown,
            })?;
        Ok(rx)
    }

    /// Submit and wait for the outcome in one call.
    pub async fn execute(&self, command: Command) -> SimResult<CommandOutcome> {
        let rx = self.submit(command)?;
        rx.await.map_err(|_| SimError::Shutdown)?
    }
}

/// Consumer side, owned by the orchestrator.
pub struct CommandReceiver {
    rx: mpsc::Receiver<QueuedCommand>,
}

impl CommandReceiver {
    /// Drain everything currently queued without blocking. Commands enqueued
    /// after this call returns are observed no earlier than the next tick.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    /// Fail everything still queued with `Shutdown` and close the queue.
    pub fn reject_pending(&mut self) {
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            cmd.respond(Err(SimError::Shutdown));
        }
    }
}
