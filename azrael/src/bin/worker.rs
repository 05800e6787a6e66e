//! Remote rigid-body worker: dials the broker and solves islands until
//! stopped.
//!
//! Usage: `worker [broker-addr]` (default `127.0.0.1:5700`)

use tracing::info;

use azrael::error::SimResult;
use azrael::worker::remote;

#[tokio::main]
async fn main() -> SimResult<()> {
    azrael::init_logging();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5700".to_string());

    tokio::select! {
        result = remote::serve(&addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("worker stopped");
            Ok(())
        }
    }
}
