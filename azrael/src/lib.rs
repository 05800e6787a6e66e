//! Azrael: a distributed rigid-body physics server core.
//!
//! Clients define rigid bodies with force actuators and query their kinematic
//! state; the [`orchestrator`] advances the world in discrete ticks. Each
//! tick drains the [`command`] queue, samples the ambient [`force_grid`],
//! partitions the world into collision islands ([`broadphase`]) and hands
//! every island to one of N stateless solvers in the [`worker`] pool. Results
//! are reconciled against the versioned body [`store`] with optimistic
//! compare-and-set writes, so external commands and physics never trample
//! each other.

pub mod body;
pub mod broadphase;
pub mod command;
pub mod config;
pub mod error;
pub mod force_grid;
pub mod metrics;
pub mod orchestrator;
pub mod store;
pub mod worker;

// Re-export commonly used types
pub mod prelude {
    pub use crate::body::{Aabb, BodyId, BodyPatch, Booster, CollisionShape, RigidBody};
    pub use crate::command::{command_queue, Command, CommandOutcome, CommandSender};
    pub use crate::config::SimConfig;
    pub use crate::error::{SimError, SimResult};
    pub use crate::force_grid::ForceGrid;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::store::{BodyStore, InMemoryStore};
    pub use crate::worker::WorkerPool;

    // Math types
    pub use glam::{DMat3, DQuat, DVec3};
}

/// Initialize logging for the server and worker processes.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
