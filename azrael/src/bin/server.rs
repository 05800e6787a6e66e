//! Simulation server: wires the store, command queue, force grid and worker
//! pool to the tick orchestrator and runs until Ctrl-C.
//!
//! Usage: `server [config.json]`

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use azrael::command::command_queue;
use azrael::config::SimConfig;
use azrael::error::SimResult;
use azrael::force_grid::ForceGrid;
use azrael::orchestrator::Orchestrator;
use azrael::store::InMemoryStore;
use azrael::worker::WorkerPool;

#[tokio::main]
async fn main() -> SimResult<()> {
    azrael::init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_file(path)?,
        None => SimConfig::default(),
    };

    let store = Arc::new(InMemoryStore::new());
    let grid = Arc::new(RwLock::new(ForceGrid::from_config(&config.force_grid)));
    let (commands, receiver) = command_queue(config.command_queue_capacity);

    let pool = WorkerPool::new(
        config.pool_size.max(1) * config.queue_depth,
        config.worker_timeout_duration(),
    );
    pool.spawn_local(config.pool_size);
    if let Some(addr) = &config.endpoints.worker_addr {
        pool.listen(addr).await?;
    }

    let mut orchestrator = Orchestrator::new(store, receiver, grid, pool, config);
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("stop requested");
        shutdown.shutdown();
    });

    // The façade would hold this sender; keep the intake open for as long as
    // the loop runs.
    let _commands = commands;
    orchestrator.run().await
}
