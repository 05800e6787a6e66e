//! A static plane supports and reflects a falling sphere without tunneling.

use std::sync::Arc;

use glam::DVec3;
use parking_lot::RwLock;

use azrael::body::{CollisionShape, RigidBody};
use azrael::command::command_queue;
use azrael::config::SimConfig;
use azrael::force_grid::ForceGrid;
use azrael::orchestrator::Orchestrator;
use azrael::store::{BodyStore, InMemoryStore};
use azrael::worker::WorkerPool;

fn rig(config: SimConfig) -> (Orchestrator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let grid = Arc::new(RwLock::new(ForceGrid::from_config(&config.force_grid)));
    let (_sender, receiver) = command_queue(config.command_queue_capacity);
    let pool = WorkerPool::new(16, config.worker_timeout_duration());
    pool.spawn_local(2);
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn BodyStore>,
        receiver,
        grid,
        pool,
        config,
    );
    (orchestrator, store)
}

#[tokio::test]
async fn sphere_bounces_and_never_tunnels() {
    let _ = tracing_subscriber::fmt().try_init();

    let config = SimConfig::default();
    let tick_travel = config.tick_period * 1.0; // |v| = 1 m/s
    let (mut orchestrator, store) = rig(config);

    let plane = store.add(RigidBody {
        inv_mass: 0.0,
        restitution: 1.0,
        friction: 0.0,
        shape: CollisionShape::StaticPlane {
            normal: DVec3::Y,
            offset: 0.0,
        },
        ..Default::default()
    });
    let sphere = store.add(RigidBody {
        position: DVec3::new(0.0, 5.0, 0.0),
        linear_velocity: DVec3::new(0.0, -1.0, 0.0),
        inv_mass: 1.0,
        restitution: 1.0,
        friction: 0.0,
        shape: CollisionShape::Sphere { radius: 1.0 },
        ..Default::default()
    });

    let mut min_center_y = f64::MAX;
    let mut bounced = false;
    // 10 simulated seconds: 4 m of approach, the bounce, and the ascent.
    for _ in 0..200 {
        orchestrator.tick().await.expect("tick");
        let body = store.get(&[sphere]).remove(&sphere).expect("body").body;
        min_center_y = min_center_y.min(body.position.y);
        if body.linear_velocity.y > 0.0 {
            bounced = true;
        }
    }

    assert!(bounced, "the sphere must reflect off the plane");
    // The lowest surface point may dip below the plane by at most one tick
    // of travel.
    assert!(
        min_center_y - 1.0 >= -tick_travel,
        "sphere tunneled: lowest surface point at {}",
        min_center_y - 1.0
    );

    let final_velocity = store.get(&[sphere])[&sphere].body.linear_velocity;
    assert!(
        (final_velocity.y - 1.0).abs() < 1e-6,
        "elastic bounce should fully reverse the approach speed, got {:?}",
        final_velocity
    );

    // The plane itself never moves and never commits.
    let plane_stored = store.get(&[plane]).remove(&plane).expect("body");
    assert_eq!(plane_stored.version, 1, "static plane must keep version 1");
    assert_eq!(plane_stored.body.position, DVec3::ZERO);
}
