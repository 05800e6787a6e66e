//! The tick orchestrator: owner of world state advancement.
//!
//! One tick runs through strict phases:
//!
//! 1. **Intake** — drain the command queue and apply every command.
//! 2. **Load** — sweep tombstones, snapshot the world.
//! 3. **Forces** — grid sample + boosters + direct forces + impulses.
//! 4. **Broadphase** — AABB overlaps into collision islands.
//! 5. **Dispatch** — one worker request per island, joined under a deadline.
//! 6. **Merge** — CAS-commit the replies that survived the version race.
//! 7. **Sleep** — put quiet bodies to sleep, wake touched ones.
//!
//! The phase boundaries are observable: commands enqueued before intake are
//! applied this tick, writes to one body are totally ordered by version, and
//! physics updates of disjoint islands commute. `tick` is public so tests can
//! drive the loop one step at a time without the timer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use glam::DVec3;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::body::{BodyId, RigidBody};
use crate::broadphase::{build_islands, sweep_and_prune, BroadEntry, IslandSet};
use crate::command::{Command, CommandOutcome, CommandReceiver};
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::force_grid::ForceGrid;
use crate::metrics::SimMetrics;
use crate::store::{BodyStore, BodyWrite, StoredBody};
use crate::worker::protocol::{
    BodySnapshot, ContactPair, ExternalForce, WorkerReply, WorkerRequest,
};
use crate::worker::WorkerPool;

/// Contacts resolved in one tick, published on the contact feed.
#[derive(Debug, Clone)]
pub struct ContactEvent {
    pub tick: u64,
    pub contacts: Vec<ContactPair>,
}

/// Requests a clean stop of the tick loop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SleepTracker {
    quiet_ticks: u32,
    sleeping: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct PendingImpulse {
    linear: DVec3,
    angular: DVec3,
}

/// The single owner of simulation time.
pub struct Orchestrator {
    store: Arc<dyn BodyStore>,
    commands: CommandReceiver,
    grid: Arc<RwLock<ForceGrid>>,
    pool: WorkerPool,
    config: SimConfig,
    metrics: Arc<SimMetrics>,
    contacts: broadcast::Sender<ContactEvent>,
    sleep: HashMap<BodyId, SleepTracker>,
    /// Impulses accumulated this tick, folded into the dispatch snapshots.
    impulses: HashMap<BodyId, PendingImpulse>,
    /// One-tick central force/torque overrides.
    direct_forces: HashMap<BodyId, (DVec3, DVec3)>,
    /// Consecutive ticks each body's island failed to come back.
    failure_streaks: HashMap<BodyId, u32>,
    tick_index: u64,
    /// Changes every tick; replies carrying an old nonce are discarded.
    nonce: u64,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn BodyStore>,
        commands: CommandReceiver,
        grid: Arc<RwLock<ForceGrid>>,
        pool: WorkerPool,
        config: SimConfig,
    ) -> Self {
        let (contacts, _) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            commands,
            grid,
            pool,
            config,
            metrics: Arc::new(SimMetrics::default()),
            contacts,
            sleep: HashMap::new(),
            impulses: HashMap::new(),
            direct_forces: HashMap::new(),
            failure_streaks: HashMap::new(),
            tick_index: 0,
            nonce: 0,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    pub fn metrics(&self) -> Arc<SimMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Subscribe to per-tick contact events.
    pub fn contact_feed(&self) -> broadcast::Receiver<ContactEvent> {
        self.contacts.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Completed tick count.
    pub fn current_tick(&self) -> u64 {
        self.tick_index
    }

    /// Drive ticks at the configured period until shutdown. A tick that runs
    /// long is followed immediately by the next one, with `tick_overrun`
    /// incremented; ticks never overlap.
    pub async fn run(&mut self) -> SimResult<()> {
        info!(
            tick_period = self.config.tick_period,
            pool_size = self.config.pool_size,
            "orchestrator running"
        );
        let period = self.config.tick_duration();
        let mut next_start: Option<Instant> = None;
        loop {
            if let Some(next) = next_start {
                let now = Instant::now();
                if now < next {
                    let mut shutdown = self.shutdown_rx.clone();
                    tokio::select! {
                        _ = tokio::time::sleep_until(next) => {}
                        _ = shutdown.changed() => {}
                    }
                } else {
                    SimMetrics::incr(&self.metrics.tick_overrun);
                    trace!(late_by = ?(now - next), "tick overrun");
                }
            }
            if *self.shutdown_rx.borrow() {
                break;
            }
            let started = Instant::now();
            if let Err(e) = self.tick().await {
                error!(error = %e, "tick failed; shutting down");
                self.commands.reject_pending();
                return Err(e);
            }
            next_start = Some(started + period);
        }
        // Pending submitters must not wait on a loop that will never run.
        self.commands.reject_pending();
        info!(ticks = self.tick_index, "orchestrator stopped");
        Ok(())
    }

    /// Advance the simulation by exactly one tick.
    pub async fn tick(&mut self) -> SimResult<()> {
        self.tick_index += 1;
        self.nonce = self.tick_index;
        trace!(tick = self.tick_index, "tick start");

        self.phase_intake();
        let mut world = self.phase_load();
        let external = self.phase_forces(&mut world);
        let islands = self.phase_broadphase(&world);
        let replies = self.phase_dispatch(&world, &islands, &external).await?;
        let merged = self.phase_merge(&world, replies);
        self.phase_sleep(&world, &merged);

        SimMetrics::incr(&self.metrics.ticks);
        Ok(())
    }

    // ----- Phase A -------------------------------------------------------

    /// Drain the queue and apply every command in arrival order. Later
    /// commands on the same body win.
    fn phase_intake(&mut self) {
        for queued in self.commands.drain() {
            let result = self.apply_command(&queued.command);
            match &result {
                Ok(_) => SimMetrics::incr(&self.metrics.commands_applied),
                Err(e) => debug!(error = %e, "command rejected"),
            }
            queued.respond(result);
        }
    }

    fn apply_command(&mut self, command: &Command) -> SimResult<CommandOutcome> {
        match command {
            Command::Spawn { template, body } => {
                body.validate().map_err(SimError::Validation)?;
                let mut body = body.clone();
                body.orientation = body.orientation.normalize();
                for booster in &mut body.boosters {
                    booster.direction = booster.direction.normalize_or_zero();
                }
                let id = self.store.add(body);
                debug!(%id, template = %template, "body spawned");
                Ok(CommandOutcome::Spawned(id))
            }
            Command::Remove { id } => {
                if self.store.get(&[*id]).is_empty() {
                    return Err(SimError::NotFound(*id));
                }
                self.store.remove(&[*id]);
                self.sleep.remove(id);
                self.impulses.remove(id);
                self.direct_forces.remove(id);
                Ok(CommandOutcome::Applied)
            }
            Command::SetBody { id, patch } => {
                let patch = patch.clone();
                self.cas_update(*id, move |body| {
                    let mut merged = patch.apply(body);
                    merged.validate().map_err(SimError::Validation)?;
                    merged.orientation = merged.orientation.normalize();
                    Ok(merged)
                })
            }
            Command::SetForce { id, booster, force } => {
                let (booster, force) = (*booster, *force);
                self.cas_update(*id, move |body| {
                    let mut body = body.clone();
                    let slot = body.boosters.get_mut(booster).ok_or_else(|| {
                        SimError::Validation(format!("no booster at index {booster}"))
                    })?;
                    slot.force = force;
                    Ok(body)
                })
            }
            Command::ApplyImpulse {
                id,
                linear,
                angular,
            } => {
                if self.store.get(&[*id]).is_empty() {
                    return Err(SimError::NotFound(*id));
                }
                let entry = self.impulses.entry(*id).or_default();
                entry.linear += *linear;
                entry.angular += *angular;
                self.wake(*id);
                Ok(CommandOutcome::Applied)
            }
            Command::DirectForce { id, force, torque } => {
                if self.store.get(&[*id]).is_empty() {
                    return Err(SimError::NotFound(*id));
                }
                // Later command wins outright; forces do not accumulate.
                self.direct_forces.insert(*id, (*force, *torque));
                self.wake(*id);
                Ok(CommandOutcome::Applied)
            }
        }
    }

    /// Read-modify-CAS with a bounded retry budget.
    fn cas_update<F>(&mut self, id: BodyId, update: F) -> SimResult<CommandOutcome>
    where
        F: Fn(&RigidBody) -> SimResult<RigidBody>,
    {
        for attempt in 0..=self.config.k_retries {
            let stored = match self.store.get(&[id]).remove(&id) {
                Some(stored) => stored,
                None => return Err(SimError::NotFound(id)),
            };
            let body = update(&stored.body)?;
            let outcome = self.store.commit_batch(vec![BodyWrite {
                id,
                expected_version: stored.version,
                body,
            }]);
            if outcome.committed.contains(&id) {
                self.wake(id);
                return Ok(CommandOutcome::Applied);
            }
            trace!(%id, attempt, "command write raced, retrying");
        }
        SimMetrics::incr(&self.metrics.cas_conflicts);
        Err(SimError::Conflict(id))
    }

    // ----- Phase B -------------------------------------------------------

    /// Drop last tick's tombstones and snapshot the world.
    fn phase_load(&mut self) -> HashMap<BodyId, StoredBody> {
        self.store.sweep();
        let world = self.store.get_all();
        // Forget bookkeeping for bodies that no longer exist.
        self.sleep.retain(|id, _| world.contains_key(id));
        self.failure_streaks.retain(|id, _| world.contains_key(id));
        world
    }

    // ----- Phase C -------------------------------------------------------

    /// Aggregate grid, booster and direct forces per active body, and fold
    /// accumulated impulses into the working snapshots as velocity deltas.
    /// Workers only ever see the aggregate.
    fn phase_forces(
        &mut self,
        world: &mut HashMap<BodyId, StoredBody>,
    ) -> HashMap<BodyId, (DVec3, DVec3)> {
        let impulses = std::mem::take(&mut self.impulses);
        let direct_forces = std::mem::take(&mut self.direct_forces);
        let grid = self.grid.read();
        let mut external = HashMap::new();

        for (id, stored) in world.iter_mut() {
            let body = &mut stored.body;
            if !body.is_dynamic() || self.is_sleeping(*id) {
                continue;
            }

            let mut force = grid.sample(body.position);
            let mut torque = DVec3::ZERO;
            for booster in &body.boosters {
                let thrust = body.orientation * (booster.direction * booster.force);
                let arm = body.orientation * booster.position;
                force += thrust;
                torque += arm.cross(thrust);
            }
            if let Some((f, t)) = direct_forces.get(id) {
                force += *f;
                torque += *t;
            }
            if let Some(impulse) = impulses.get(id) {
                body.linear_velocity += impulse.linear * body.inv_mass;
                body.angular_velocity += body.inv_inertia_world() * impulse.angular;
            }
            if force != DVec3::ZERO || torque != DVec3::ZERO {
                external.insert(*id, (force, torque));
            }
        }
        external
    }

    // ----- Phase D -------------------------------------------------------

    /// Recompute world AABBs and partition the world into collision islands.
    /// Sleeping bodies take part as static colliders only.
    fn phase_broadphase(&self, world: &HashMap<BodyId, StoredBody>) -> Vec<IslandSet> {
        let mut entries: Vec<BroadEntry> = world
            .iter()
            .filter(|(_, stored)| stored.body.has_collision_geometry())
            .map(|(id, stored)| {
                let active = stored.body.is_dynamic() && !self.is_sleeping(*id);
                BroadEntry::new(*id, stored.body.world_aabb(), active)
            })
            .collect();
        entries.sort_by_key(|e| e.id);

        let pairs = sweep_and_prune(&entries);
        let islands = build_islands(&entries, &pairs);
        for island in &islands {
            if island.len() > self.config.max_island {
                // Oversized components are never split; the worker takes
                // them whole.
                warn!(
                    size = island.len(),
                    limit = self.config.max_island,
                    "oversized island dispatched whole"
                );
            }
        }
        trace!(
            bodies = entries.len(),
            pairs = pairs.len(),
            islands = islands.len(),
            "broadphase done"
        );
        islands
    }

    // ----- Phase E -------------------------------------------------------

    /// Submit one request per island and collect whatever arrives before the
    /// global deadline. Replies are matched by tick nonce; anything stale is
    /// dropped on the floor.
    async fn phase_dispatch(
        &mut self,
        world: &HashMap<BodyId, StoredBody>,
        islands: &[IslandSet],
        external: &HashMap<BodyId, (DVec3, DVec3)>,
    ) -> SimResult<Vec<WorkerReply>> {
        if islands.is_empty() {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + self.config.tick_deadline();

        let mut in_flight = FuturesUnordered::new();
        for (index, island) in islands.iter().enumerate() {
            let request = self.build_request(index as u64, island, world, external);
            SimMetrics::incr(&self.metrics.islands_dispatched);
            let pending = self.pool.submit(request).await?;
            in_flight.push(async move { (index, pending.wait().await) });
        }

        let mut replies = Vec::new();
        loop {
            tokio::select! {
                next = in_flight.next() => match next {
                    Some((_, Ok(reply))) => {
                        if reply.nonce == self.nonce {
                            self.clear_failures(&reply);
                            replies.push(reply);
                        } else {
                            debug!(
                                nonce = reply.nonce,
                                expected = self.nonce,
                                "stale worker reply discarded"
                            );
                        }
                    }
                    Some((index, Err(e))) => {
                        self.record_island_failure(&islands[index], &e);
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    let outstanding = in_flight.len() as u64;
                    if outstanding > 0 {
                        // Dropping the futures cancels the joins; late
                        // replies hit closed channels and vanish.
                        warn!(outstanding, "tick deadline expired, islands cancelled");
                        SimMetrics::add(&self.metrics.islands_cancelled, outstanding);
                    }
                    break;
                }
            }
        }
        Ok(replies)
    }

    fn build_request(
        &self,
        island_index: u64,
        island: &IslandSet,
        world: &HashMap<BodyId, StoredBody>,
        external: &HashMap<BodyId, (DVec3, DVec3)>,
    ) -> WorkerRequest {
        let mut bodies = Vec::with_capacity(island.members.len() + island.statics.len());
        let mut forces = Vec::new();
        for id in &island.members {
            let stored = &world[id];
            bodies.push(BodySnapshot {
                id: *id,
                version: stored.version,
                read_only: false,
                body: stored.body.clone(),
            });
            if let Some((force, torque)) = external.get(id) {
                forces.push(ExternalForce {
                    id: *id,
                    force: *force,
                    torque: *torque,
                });
            }
        }
        for id in &island.statics {
            let stored = &world[id];
            bodies.push(BodySnapshot {
                id: *id,
                version: stored.version,
                read_only: true,
                body: stored.body.clone(),
            });
        }
        WorkerRequest {
            island: island_index,
            nonce: self.nonce,
            dt: self.config.tick_period,
            max_substeps: self.config.max_substeps,
            bodies,
            external: forces,
        }
    }

    fn record_island_failure(&mut self, island: &IslandSet, error: &SimError) {
        match error {
            SimError::WorkerTimeout(_) => SimMetrics::incr(&self.metrics.worker_timeouts),
            _ => SimMetrics::incr(&self.metrics.worker_errors),
        }
        let mut worst = 0;
        for id in &island.members {
            let streak = self.failure_streaks.entry(*id).or_insert(0);
            *streak += 1;
            worst = worst.max(*streak);
        }
        // Bodies keep their committed state and version; the next tick
        // rebuilds and redispatches the island.
        warn!(
            bodies = island.members.len(),
            consecutive = worst,
            error = %error,
            "island failed this tick"
        );
    }

    fn clear_failures(&mut self, reply: &WorkerReply) {
        for update in &reply.bodies {
            self.failure_streaks.remove(&update.id);
        }
    }

    // ----- Phase F -------------------------------------------------------

    /// Commit the surviving updates and publish contacts. A body whose store
    /// version moved past the request baseline (a command landed mid-tick)
    /// keeps the commanded state; the physics result is discarded.
    fn phase_merge(
        &mut self,
        world: &HashMap<BodyId, StoredBody>,
        replies: Vec<WorkerReply>,
    ) -> HashMap<BodyId, RigidBody> {
        let eps = self.config.quaternion_renorm_eps;
        let mut writes = Vec::new();
        let mut touched = HashSet::new();
        let mut all_contacts = Vec::new();

        for reply in replies {
            for update in reply.bodies {
                let Some(baseline) = world.get(&update.id) else {
                    // Removed while in flight; the tombstone wins.
                    trace!(id = %update.id, "update for removed body dropped");
                    continue;
                };
                let mut body = baseline.body.clone();
                body.position = update.position;
                body.orientation = update.orientation;
                body.linear_velocity = update.linear_velocity;
                body.angular_velocity = update.angular_velocity;
                body.renormalize_orientation(eps);
                if body == baseline.body {
                    // Nothing moved; do not burn a version on it.
                    continue;
                }
                writes.push(BodyWrite {
                    id: update.id,
                    expected_version: update.version,
                    body,
                });
            }
            for contact in &reply.contacts {
                touched.insert(contact.a);
                touched.insert(contact.b);
            }
            all_contacts.extend(reply.contacts);
        }

        let mut merged = HashMap::new();
        if !writes.is_empty() {
            let by_id: HashMap<BodyId, RigidBody> =
                writes.iter().map(|w| (w.id, w.body.clone())).collect();
            let outcome = self.store.commit_batch(writes);
            if !outcome.conflicted.is_empty() {
                SimMetrics::add(&self.metrics.cas_conflicts, outcome.conflicted.len() as u64);
                debug!(
                    bodies = ?outcome.conflicted,
                    "physics merge lost to concurrent writes"
                );
            }
            for id in outcome.committed {
                if let Some(body) = by_id.get(&id) {
                    merged.insert(id, body.clone());
                }
            }
        }

        for id in touched {
            self.wake(id);
        }
        if !all_contacts.is_empty() {
            let _ = self.contacts.send(ContactEvent {
                tick: self.tick_index,
                contacts: all_contacts,
            });
        }
        merged
    }

    // ----- Phase G -------------------------------------------------------

    /// Mark bodies quiet for `sleep.ticks` consecutive ticks as sleeping.
    /// Waking happens at command application and contact time.
    fn phase_sleep(
        &mut self,
        world: &HashMap<BodyId, StoredBody>,
        merged: &HashMap<BodyId, RigidBody>,
    ) {
        let thresholds = self.config.sleep.clone();
        for (id, stored) in world {
            if !stored.body.is_dynamic() {
                continue;
            }
            let body = merged.get(id).unwrap_or(&stored.body);
            let tracker = self.sleep.entry(*id).or_default();
            if body.linear_velocity.length() < thresholds.linear
                && body.angular_velocity.length() < thresholds.angular
            {
                tracker.quiet_ticks = tracker.quiet_ticks.saturating_add(1);
                if tracker.quiet_ticks >= thresholds.ticks && !tracker.sleeping {
                    tracker.sleeping = true;
                    debug!(%id, "body asleep");
                }
            } else {
                *tracker = SleepTracker::default();
            }
        }
        let asleep = self.sleep.values().filter(|t| t.sleeping).count() as u64;
        self.metrics
            .bodies_sleeping
            .store(asleep, std::sync::atomic::Ordering::Relaxed);
    }

    fn is_sleeping(&self, id: BodyId) -> bool {
        self.sleep.get(&id).map(|t| t.sleeping).unwrap_or(false)
    }

    fn wake(&mut self, id: BodyId) {
        if let Some(tracker) = self.sleep.get_mut(&id) {
            if tracker.sleeping {
                debug!(%id, "body woken");
            }
            *tracker = SleepTracker::default();
        }
    }
}
