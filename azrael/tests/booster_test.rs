//! Booster thrust: orientation-relative actuators accelerate the body, and
//! `SetForce` retargets the magnitude at tick granularity.

use std::sync::Arc;

use glam::{DQuat, DVec3};
use parking_lot::RwLock;

use azrael::body::{Booster, RigidBody};
use azrael::command::{command_queue, Command, CommandOutcome, CommandSender};
use azrael::config::SimConfig;
use azrael::force_grid::ForceGrid;
use azrael::orchestrator::Orchestrator;
use azrael::store::{BodyStore, InMemoryStore};
use azrael::worker::WorkerPool;

fn rig(config: SimConfig) -> (Orchestrator, CommandSender, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let grid = Arc::new(RwLock::new(ForceGrid::from_config(&config.force_grid)));
    let (sender, receiver) = command_queue(config.command_queue_capacity);
    let pool = WorkerPool::new(16, config.worker_timeout_duration());
    pool.spawn_local(2);
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn BodyStore>,
        receiver,
        grid,
        pool,
        config,
    );
    (orchestrator, sender, store)
}

#[tokio::test]
async fn set_force_accelerates_at_the_new_magnitude() {
    let _ = tracing_subscriber::fmt().try_init();

    let config = SimConfig::default();
    let tick_period = config.tick_period;
    let (mut orchestrator, sender, store) = rig(config);

    let id = store.add(RigidBody {
        boosters: vec![Booster::new(DVec3::ZERO, DVec3::X, 1.0)],
        ..Default::default()
    });

    let reply = sender
        .submit(Command::SetForce {
            id,
            booster: 0,
            force: 2.0,
        })
        .expect("submit");

    let ticks = 5;
    for _ in 0..ticks {
        orchestrator.tick().await.expect("tick");
    }
    assert_eq!(reply.await.unwrap().unwrap(), CommandOutcome::Applied);

    let stored = store.get(&[id]).remove(&id).expect("body");
    let expected = 2.0 * tick_period * ticks as f64;
    assert!(
        (stored.body.linear_velocity.x - expected).abs() < 1e-9,
        "drag-free booster at 2 N should reach v = {expected}, got {}",
        stored.body.linear_velocity.x
    );
    assert_eq!(stored.body.linear_velocity.y, 0.0);
}

#[tokio::test]
async fn booster_thrust_follows_orientation() {
    let _ = tracing_subscriber::fmt().try_init();

    let (mut orchestrator, _sender, store) = rig(SimConfig::default());

    // Body rotated 90 degrees around z: its +x booster pushes along world +y.
    let id = store.add(RigidBody {
        orientation: DQuat::from_rotation_z(std::f64::consts::FRAC_PI_2),
        boosters: vec![Booster::new(DVec3::ZERO, DVec3::X, 1.0)],
        ..Default::default()
    });

    orchestrator.tick().await.expect("tick");

    let body = store.get(&[id]).remove(&id).expect("body").body;
    assert!(
        body.linear_velocity.x.abs() < 1e-9,
        "no thrust along world x, got {:?}",
        body.linear_velocity
    );
    assert!(body.linear_velocity.y > 0.0, "thrust rotated onto world y");
}

#[tokio::test]
async fn off_center_booster_produces_torque() {
    let _ = tracing_subscriber::fmt().try_init();

    let (mut orchestrator, _sender, store) = rig(SimConfig::default());

    // Thrust along +x mounted below the center of mass spins the body.
    let id = store.add(RigidBody {
        boosters: vec![Booster::new(DVec3::new(0.0, -1.0, 0.0), DVec3::X, 1.0)],
        ..Default::default()
    });

    orchestrator.tick().await.expect("tick");

    let body = store.get(&[id]).remove(&id).expect("body").body;
    assert!(
        body.angular_velocity.length() > 0.0,
        "off-center thrust must induce spin"
    );
    // r x F with r = -y and F = +x points along +z.
    assert!(
        body.angular_velocity.z > 0.0,
        "spin axis should be +z, got {:?}",
        body.angular_velocity
    );
}

#[tokio::test]
async fn impulse_becomes_an_instant_velocity_change() {
    let _ = tracing_subscriber::fmt().try_init();

    let config = SimConfig::default();
    let tick_period = config.tick_period;
    let (mut orchestrator, sender, store) = rig(config);

    let id = store.add(RigidBody {
        inv_mass: 2.0,
        ..Default::default()
    });

    let reply = sender
        .submit(Command::ApplyImpulse {
            id,
            linear: DVec3::new(3.0, 0.0, 0.0),
            angular: DVec3::ZERO,
        })
        .expect("submit");
    orchestrator.tick().await.expect("tick");
    assert_eq!(reply.await.unwrap().unwrap(), CommandOutcome::Applied);

    let body = store.get(&[id]).remove(&id).expect("body").body;
    // dv = J * inv_mass = 3 * 2.
    assert!((body.linear_velocity.x - 6.0).abs() < 1e-9);
    // The impulse applies before integration, so the tick also moves the
    // body.
    assert!((body.position.x - 6.0 * tick_period).abs() < 1e-9);
}

#[tokio::test]
async fn direct_force_applies_for_one_tick_only() {
    let _ = tracing_subscriber::fmt().try_init();

    let config = SimConfig::default();
    let tick_period = config.tick_period;
    let (mut orchestrator, sender, store) = rig(config);

    let id = store.add(RigidBody::default());

    sender
        .submit(Command::DirectForce {
            id,
            force: DVec3::new(4.0, 0.0, 0.0),
            torque: DVec3::ZERO,
        })
        .expect("submit");
    orchestrator.tick().await.expect("tick");

    let after_one = store.get(&[id])[&id].body.linear_velocity.x;
    assert!((after_one - 4.0 * tick_period).abs() < 1e-9);

    // Next tick carries no force; velocity must not grow further.
    orchestrator.tick().await.expect("tick");
    let after_two = store.get(&[id])[&id].body.linear_velocity.x;
    assert!(
        (after_two - after_one).abs() < 1e-9,
        "direct force must expire after one tick"
    );
}
