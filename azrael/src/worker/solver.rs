//! Stateless rigid-body solver: advances one island by one time-step.
//!
//! [`step_island`] is a pure function of its request. Nothing survives across
//! calls, so any idle worker replica can pick up any island. The step is
//! subdivided into a fixed number of sub-steps; each sub-step integrates
//! forces, then detects and resolves contacts impulsively.
//!
//! Bodies with zero inverse mass or no collision shape are carried through
//! untouched, and read-only partners (static bodies shared between islands)
//! collide but are never written back.

use std::collections::BTreeMap;

use glam::{DMat3, DQuat, DVec3};

use crate::body::{BodyId, CollisionShape, RigidBody};

use super::protocol::{BodyUpdate, ContactPair, WorkerReply, WorkerRequest};

/// Penetration tolerated before positional correction kicks in.
const PENETRATION_SLOP: f64 = 1e-4;
/// Baumgarte factor for positional correction.
const CORRECTION_BIAS: f64 = 0.8;

struct SimBody {
    id: BodyId,
    version: u64,
    read_only: bool,
    body: RigidBody,
    force: DVec3,
    torque: DVec3,
    movable: bool,
}

impl SimBody {
    fn inv_mass(&self) -> f64 {
        if self.movable {
            self.body.inv_mass
        } else {
            0.0
        }
    }

    fn inv_inertia(&self) -> DMat3 {
        if self.movable {
            self.body.inv_inertia_world()
        } else {
            DMat3::ZERO
        }
    }
}

/// Advance one island by `request.dt`.
pub fn step_island(request: &WorkerRequest) -> WorkerReply {
    let mut bodies: Vec<SimBody> = request
        .bodies
        .iter()
        .map(|snap| SimBody {
            id: snap.id,
            version: snap.version,
            read_only: snap.read_only,
            movable: !snap.read_only && snap.body.is_dynamic(),
            body: snap.body.clone(),
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
        })
        .collect();
    // Fixed processing order keeps the step deterministic for a given input.
    bodies.sort_by_key(|b| b.id);

    for ext in &request.external {
        if let Some(sim) = bodies.iter_mut().find(|b| b.id == ext.id) {
            sim.force = ext.force;
            sim.torque = ext.torque;
        }
    }

    let substeps = request.max_substeps.max(1);
    let dt = request.dt / f64::from(substeps);
    let mut contacts: BTreeMap<(BodyId, BodyId), ContactPair> = BTreeMap::new();

    for _ in 0..substeps {
        integrate(&mut bodies, dt);
        collide(&mut bodies, &mut contacts);
    }

    let updates = bodies
        .iter_mut()
        .filter(|sim| !sim.read_only)
        .map(|sim| {
            sim.body.orientation = sim.body.orientation.normalize();
            BodyUpdate {
                id: sim.id,
                version: sim.version,
                position: sim.body.position,
                orientation: sim.body.orientation,
                linear_velocity: sim.body.linear_velocity,
                angular_velocity: sim.body.angular_velocity,
            }
        })
        .collect();

    WorkerReply {
        island: request.island,
        nonce: request.nonce,
        bodies: updates,
        contacts: contacts.into_values().collect(),
    }
}

/// Semi-implicit Euler: forces into velocities, velocities into pose.
fn integrate(bodies: &mut [SimBody], dt: f64) {
    for sim in bodies.iter_mut().filter(|b| b.movable) {
        let inv_inertia = sim.body.inv_inertia_world();
        let body = &mut sim.body;

        body.linear_velocity += sim.force * body.inv_mass * dt;
        body.angular_velocity += inv_inertia * sim.torque * dt;

        body.linear_velocity *= (1.0 - body.linear_damping).powf(dt);
        body.angular_velocity *= (1.0 - body.angular_damping).powf(dt);

        body.linear_velocity *= body.axes_lock_lin;
        body.angular_velocity *= body.axes_lock_rot;

        body.position += body.linear_velocity * dt;
        if body.angular_velocity.length_squared() > 1e-12 {
            let angle = body.angular_velocity.length() * dt;
            let axis = body.angular_velocity.normalize();
            body.orientation = (DQuat::from_axis_angle(axis, angle) * body.orientation).normalize();
        }
    }
}

/// World-space collision primitive after compound flattening.
struct Primitive {
    position: DVec3,
    rotation: DQuat,
    shape: CollisionShape,
}

fn flatten(shape: &CollisionShape, position: DVec3, rotation: DQuat, out: &mut Vec<Primitive>) {
    match shape {
        CollisionShape::Empty => {}
        CollisionShape::Compound { children } => {
            for child in children {
                flatten(
                    &child.shape,
                    position + rotation * child.position,
                    rotation * child.rotation,
                    out,
                );
            }
        }
        _ => out.push(Primitive {
            position,
            rotation,
            shape: shape.clone(),
        }),
    }
}

/// A detected penetration between body `i` and body `j`.
struct Contact {
    /// Contact point on the surface of the first body, world space.
    point: DVec3,
    /// Unit normal pointing from the first body towards the second.
    normal: DVec3,
    penetration: f64,
}

fn collide(bodies: &mut [SimBody], records: &mut BTreeMap<(BodyId, BodyId), ContactPair>) {
    // Primitive lists per body, compounds flattened to world space.
    let prims: Vec<Vec<Primitive>> = bodies
        .iter()
        .map(|sim| {
            let mut out = Vec::new();
            flatten(
                &sim.body.scaled_shape(),
                sim.body.position,
                sim.body.orientation,
                &mut out,
            );
            out
        })
        .collect();

    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            if !bodies[i].movable && !bodies[j].movable {
                continue;
            }
            for pa in &prims[i] {
                for pb in &prims[j] {
                    if let Some(contact) = test_primitives(pa, pb) {
                        record_contact(records, &bodies[i], &bodies[j], &contact);
                        resolve_contact(bodies, i, j, &contact);
                    }
                }
            }
        }
    }
}

fn record_contact(
    records: &mut BTreeMap<(BodyId, BodyId), ContactPair>,
    first: &SimBody,
    second: &SimBody,
    contact: &Contact,
) {
    let pair = if first.id < second.id {
        ContactPair {
            a: first.id,
            b: second.id,
            point_on_a: contact.point,
            point_on_b: contact.point - contact.normal * contact.penetration,
            normal_on_b: -contact.normal,
        }
    } else {
        ContactPair {
            a: second.id,
            b: first.id,
            point_on_a: contact.point - contact.normal * contact.penetration,
            point_on_b: contact.point,
            normal_on_b: contact.normal,
        }
    };
    records.entry((pair.a, pair.b)).or_insert(pair);
}

/// Sequential impulse with restitution, Coulomb friction and positional
/// correction.
fn resolve_contact(bodies: &mut [SimBody], i: usize, j: usize, contact: &Contact) {
    let n = contact.normal;
    let inv_mass_a = bodies[i].inv_mass();
    let inv_mass_b = bodies[j].inv_mass();
    let total_inv_mass = inv_mass_a + inv_mass_b;
    if total_inv_mass <= 0.0 {
        return;
    }
    let inv_inertia_a = bodies[i].inv_inertia();
    let inv_inertia_b = bodies[j].inv_inertia();

    // Push the bodies apart in proportion to their inverse masses.
    let correction =
        (contact.penetration - PENETRATION_SLOP).max(0.0) * CORRECTION_BIAS / total_inv_mass;
    bodies[i].body.position -= n * correction * inv_mass_a;
    bodies[j].body.position += n * correction * inv_mass_b;

    let ra = contact.point - bodies[i].body.position;
    let rb = contact.point - bodies[j].body.position;
    let vel_a = bodies[i].body.linear_velocity + bodies[i].body.angular_velocity.cross(ra);
    let vel_b = bodies[j].body.linear_velocity + bodies[j].body.angular_velocity.cross(rb);
    let relative = vel_b - vel_a;
    let along_normal = relative.dot(n);
    if along_normal >= 0.0 {
        // Already separating.
        return;
    }

    let restitution = bodies[i].body.restitution * bodies[j].body.restitution;
    let angular_a = (inv_inertia_a * ra.cross(n)).cross(ra).dot(n);
    let angular_b = (inv_inertia_b * rb.cross(n)).cross(rb).dot(n);
    let effective_mass = total_inv_mass + angular_a + angular_b;
    if effective_mass <= 0.0 {
        return;
    }

    let jn = -(1.0 + restitution) * along_normal / effective_mass;
    let impulse = n * jn;
    apply_impulse(&mut bodies[i], -impulse, ra, inv_mass_a, &inv_inertia_a);
    apply_impulse(&mut bodies[j], impulse, rb, inv_mass_b, &inv_inertia_b);

    // Coulomb friction against the remaining tangential velocity.
    let vel_a = bodies[i].body.linear_velocity + bodies[i].body.angular_velocity.cross(ra);
    let vel_b = bodies[j].body.linear_velocity + bodies[j].body.angular_velocity.cross(rb);
    let relative = vel_b - vel_a;
    let tangential = relative - n * relative.dot(n);
    if tangential.length_squared() < 1e-12 {
        return;
    }
    let t = tangential.normalize();
    let angular_a = (inv_inertia_a * ra.cross(t)).cross(ra).dot(t);
    let angular_b = (inv_inertia_b * rb.cross(t)).cross(rb).dot(t);
    let effective_t = total_inv_mass + angular_a + angular_b;
    if effective_t <= 0.0 {
        return;
    }
    let friction = (bodies[i].body.friction * bodies[j].body.friction).sqrt();
    let jt = (-relative.dot(t) / effective_t).clamp(-friction * jn, friction * jn);
    let impulse = t * jt;
    apply_impulse(&mut bodies[i], -impulse, ra, inv_mass_a, &inv_inertia_a);
    apply_impulse(&mut bodies[j], impulse, rb, inv_mass_b, &inv_inertia_b);
}

fn apply_impulse(sim: &mut SimBody, impulse: DVec3, r: DVec3, inv_mass: f64, inv_inertia: &DMat3) {
    if inv_mass <= 0.0 {
        return;
    }
    sim.body.linear_velocity += impulse * inv_mass;
    sim.body.angular_velocity += *inv_inertia * r.cross(impulse);
}

/// Narrow-phase dispatch over the primitive shapes. The returned normal
/// points from `a` towards `b`; the point lies on `a`'s surface.
fn test_primitives(a: &Primitive, b: &Primitive) -> Option<Contact> {
    use CollisionShape::*;
    match (&a.shape, &b.shape) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => {
            sphere_sphere(a.position, *ra, b.position, *rb)
        }
        (Sphere { radius }, Box { half_extents }) => {
            sphere_box(a.position, *radius, b.position, b.rotation, *half_extents)
        }
        (Box { half_extents }, Sphere { radius }) => {
            sphere_box(b.position, *radius, a.position, a.rotation, *half_extents)
                .map(Contact::flipped)
        }
        (Box { half_extents: ha }, Box { half_extents: hb }) => {
            box_box(a.position, a.rotation, *ha, b.position, b.rotation, *hb)
        }
        (Sphere { radius }, StaticPlane { normal, offset }) => {
            sphere_plane(a.position, *radius, *normal, *offset)
        }
        (StaticPlane { normal, offset }, Sphere { radius }) => {
            sphere_plane(b.position, *radius, *normal, *offset).map(Contact::flipped)
        }
        (Box { half_extents }, StaticPlane { normal, offset }) => {
            box_plane(a.position, a.rotation, *half_extents, *normal, *offset)
        }
        (StaticPlane { normal, offset }, Box { half_extents }) => {
            box_plane(b.position, b.rotation, *half_extents, *normal, *offset)
                .map(Contact::flipped)
        }
        // Planes never meet each other; empty and compound shapes are gone
        // after flattening.
        _ => None,
    }
}

impl Contact {
    /// Swap the roles of the two bodies.
    fn flipped(self) -> Contact {
        Contact {
            point: self.point - self.normal * self.penetration,
            normal: -self.normal,
            penetration: self.penetration,
        }
    }
}

fn sphere_sphere(pos_a: DVec3, radius_a: f64, pos_b: DVec3, radius_b: f64) -> Option<Contact> {
    let delta = pos_b - pos_a;
    let distance_sq = delta.length_squared();
    let radius_sum = radius_a + radius_b;
    if distance_sq > radius_sum * radius_sum {
        return None;
    }
    let distance = distance_sq.sqrt();
    let normal = if distance > 0.0 {
        delta / distance
    } else {
        // Coincident centers; any direction separates them.
        DVec3::Y
    };
    Some(Contact {
        point: pos_a + normal * radius_a,
        normal,
        penetration: radius_sum - distance,
    })
}

fn sphere_box(
    sphere_pos: DVec3,
    radius: f64,
    box_pos: DVec3,
    box_rot: DQuat,
    half_extents: DVec3,
) -> Option<Contact> {
    let local = box_rot.conjugate() * (sphere_pos - box_pos);
    let closest = local.clamp(-half_extents, half_extents);
    let delta = local - closest;
    let distance_sq = delta.length_squared();
    if distance_sq > radius * radius {
        return None;
    }

    let distance = distance_sq.sqrt();
    let local_out = if distance > 0.0 {
        delta / distance
    } else {
        // Sphere center inside the box: exit through whichever face the
        // center is closest to, keeping the side it is on.
        let gap = half_extents - local.abs();
        if gap.x <= gap.y && gap.x <= gap.z {
            DVec3::new(local.x.signum(), 0.0, 0.0)
        } else if gap.y <= gap.z {
            DVec3::new(0.0, local.y.signum(), 0.0)
        } else {
            DVec3::new(0.0, 0.0, local.z.signum())
        }
    };
    // Direction out of the box is box-to-sphere; the a-to-b normal is its
    // negation.
    let normal = -(box_rot * local_out);
    Some(Contact {
        point: sphere_pos + normal * radius,
        normal,
        penetration: radius - distance,
    })
}

fn box_box(
    pos_a: DVec3,
    rot_a: DQuat,
    extents_a: DVec3,
    pos_b: DVec3,
    rot_b: DQuat,
    extents_b: DVec3,
) -> Option<Contact> {
    let axes_a = [rot_a * DVec3::X, rot_a * DVec3::Y, rot_a * DVec3::Z];
    let axes_b = [rot_b * DVec3::X, rot_b * DVec3::Y, rot_b * DVec3::Z];
    let center_delta = pos_b - pos_a;

    let mut min_penetration = f64::MAX;
    let mut best_axis = DVec3::ZERO;

    let mut consider = |axis: DVec3| -> bool {
        let separation = center_delta.dot(axis);
        let radius_a = extents_a.x * axes_a[0].dot(axis).abs()
            + extents_a.y * axes_a[1].dot(axis).abs()
            + extents_a.z * axes_a[2].dot(axis).abs();
        let radius_b = extents_b.x * axes_b[0].dot(axis).abs()
            + extents_b.y * axes_b[1].dot(axis).abs()
            + extents_b.z * axes_b[2].dot(axis).abs();
        let penetration = radius_a + radius_b - separation.abs();
        if penetration < 0.0 {
            return false; // Separating axis found.
        }
        if penetration < min_penetration {
            min_penetration = penetration;
            best_axis = if separation < 0.0 { -axis } else { axis };
        }
        true
    };

    for axis in axes_a {
        if !consider(axis) {
            return None;
        }
    }
    for axis in axes_b {
        if !consider(axis) {
            return None;
        }
    }
    for a in axes_a {
        for b in axes_b {
            let cross = a.cross(b);
            if cross.length_squared() < 1e-12 {
                continue; // Parallel edges.
            }
            if !consider(cross.normalize()) {
                return None;
            }
        }
    }

    // Deepest points of each box towards the other give the contact region.
    let support_a = box_support(pos_a, &axes_a, extents_a, best_axis);
    let support_b = box_support(pos_b, &axes_b, extents_b, -best_axis);
    Some(Contact {
        point: (support_a + support_b) * 0.5,
        normal: best_axis,
        penetration: min_penetration,
    })
}

fn box_support(center: DVec3, axes: &[DVec3; 3], extents: DVec3, direction: DVec3) -> DVec3 {
    let mut support = center;
    for (axis, extent) in axes.iter().zip([extents.x, extents.y, extents.z]) {
        if axis.dot(direction) > 0.0 {
            support += *axis * extent;
        } else {
            support -= *axis * extent;
        }
    }
    support
}

fn sphere_plane(sphere_pos: DVec3, radius: f64, normal: DVec3, offset: f64) -> Option<Contact> {
    let distance = normal.dot(sphere_pos) - offset;
    if distance > radius {
        return None;
    }
    Some(Contact {
        point: sphere_pos - normal * radius,
        normal: -normal,
        penetration: radius - distance,
    })
}

fn box_plane(
    box_pos: DVec3,
    box_rot: DQuat,
    half_extents: DVec3,
    normal: DVec3,
    offset: f64,
) -> Option<Contact> {
    let mut deepest = f64::MAX;
    let mut sum = DVec3::ZERO;
    let mut count = 0u32;
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let corner = box_pos
                    + box_rot
                        * DVec3::new(
                            sx * half_extents.x,
                            sy * half_extents.y,
                            sz * half_extents.z,
                        );
                let distance = normal.dot(corner) - offset;
                deepest = deepest.min(distance);
                if distance <= 0.0 {
                    sum += corner;
                    count += 1;
                }
            }
        }
    }
    if deepest > 0.0 {
        return None;
    }
    let point = if count > 0 {
        sum / f64::from(count)
    } else {
        box_pos
    };
    Some(Contact {
        point,
        normal: -normal,
        penetration: -deepest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::protocol::{BodySnapshot, ExternalForce};

    fn snapshot(id: u64, body: RigidBody) -> BodySnapshot {
        BodySnapshot {
            id: BodyId(id),
            version: 1,
            read_only: false,
            body,
        }
    }

    fn request(bodies: Vec<BodySnapshot>, external: Vec<ExternalForce>) -> WorkerRequest {
        WorkerRequest {
            island: 0,
            nonce: 0,
            dt: 0.1,
            max_substeps: 10,
            bodies,
            external,
        }
    }

    #[test]
    fn free_body_advances_by_velocity_times_dt() {
        let body = RigidBody {
            linear_velocity: DVec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let reply = step_island(&request(vec![snapshot(1, body)], vec![]));
        let update = &reply.bodies[0];
        assert!((update.position.x - 0.1).abs() < 1e-12);
        assert_eq!(update.position.y, 0.0);
        assert_eq!(update.version, 1, "version is echoed, not bumped");
    }

    #[test]
    fn external_force_accelerates_unit_mass() {
        let reply = step_island(&request(
            vec![snapshot(1, RigidBody::default())],
            vec![ExternalForce {
                id: BodyId(1),
                force: DVec3::new(2.0, 0.0, 0.0),
                torque: DVec3::ZERO,
            }],
        ));
        // Semi-implicit Euler accumulates exactly F * inv_mass * dt.
        assert!((reply.bodies[0].linear_velocity.x - 0.2).abs() < 1e-12);
    }

    #[test]
    fn static_body_pose_is_bit_exact() {
        let body = RigidBody {
            inv_mass: 0.0,
            position: DVec3::new(1.0, 2.0, 3.0),
            ..Default::default()
        };
        let reply = step_island(&request(
            vec![snapshot(1, body.clone())],
            vec![ExternalForce {
                id: BodyId(1),
                force: DVec3::splat(100.0),
                torque: DVec3::ZERO,
            }],
        ));
        assert_eq!(reply.bodies[0].position, body.position);
        assert_eq!(reply.bodies[0].linear_velocity, DVec3::ZERO);
    }

    #[test]
    fn shapeless_body_is_ignored() {
        let body = RigidBody {
            shape: CollisionShape::Empty,
            linear_velocity: DVec3::X,
            ..Default::default()
        };
        let reply = step_island(&request(vec![snapshot(1, body)], vec![]));
        assert_eq!(reply.bodies[0].position, DVec3::ZERO);
    }

    #[test]
    fn read_only_partners_are_not_reported() {
        let mut snap = snapshot(2, RigidBody::default());
        snap.read_only = true;
        let reply = step_island(&request(vec![snapshot(1, RigidBody::default()), snap], vec![]));
        assert_eq!(reply.bodies.len(), 1);
        assert_eq!(reply.bodies[0].id, BodyId(1));
    }

    #[test]
    fn equal_spheres_swap_velocities_elastically() {
        let left = RigidBody {
            position: DVec3::new(-0.95, 0.0, 0.0),
            linear_velocity: DVec3::new(1.0, 0.0, 0.0),
            restitution: 1.0,
            shape: CollisionShape::Sphere { radius: 1.0 },
            ..Default::default()
        };
        let right = RigidBody {
            position: DVec3::new(0.95, 0.0, 0.0),
            linear_velocity: DVec3::new(-1.0, 0.0, 0.0),
            restitution: 1.0,
            shape: CollisionShape::Sphere { radius: 1.0 },
            ..Default::default()
        };
        let mut req = request(vec![snapshot(1, left), snapshot(2, right)], vec![]);
        req.max_substeps = 1;
        let reply = step_island(&req);

        let a = reply.bodies.iter().find(|b| b.id == BodyId(1)).unwrap();
        let b = reply.bodies.iter().find(|b| b.id == BodyId(2)).unwrap();
        assert!((a.linear_velocity.x + 1.0).abs() < 1e-6, "left sphere rebounds");
        assert!((b.linear_velocity.x - 1.0).abs() < 1e-6, "right sphere rebounds");
        assert_eq!(reply.contacts.len(), 1);
        assert_eq!((reply.contacts[0].a, reply.contacts[0].b), (BodyId(1), BodyId(2)));
    }

    #[test]
    fn sphere_bounces_off_static_plane() {
        let plane = RigidBody {
            inv_mass: 0.0,
            restitution: 1.0,
            shape: CollisionShape::StaticPlane {
                normal: DVec3::Y,
                offset: 0.0,
            },
            ..Default::default()
        };
        let ball = RigidBody {
            position: DVec3::new(0.0, 0.95, 0.0),
            linear_velocity: DVec3::new(0.0, -1.0, 0.0),
            restitution: 1.0,
            shape: CollisionShape::Sphere { radius: 1.0 },
            ..Default::default()
        };
        let mut req = request(vec![snapshot(1, plane.clone()), snapshot(2, ball)], vec![]);
        req.max_substeps = 1;
        let reply = step_island(&req);

        let plane_after = reply.bodies.iter().find(|b| b.id == BodyId(1)).unwrap();
        let ball_after = reply.bodies.iter().find(|b| b.id == BodyId(2)).unwrap();
        assert_eq!(plane_after.position, plane.position, "plane never moves");
        assert!(
            ball_after.linear_velocity.y > 0.9,
            "ball should rebound upward, got {:?}",
            ball_after.linear_velocity
        );
        // The ball is `b` of the pair; its contact normal points back at the
        // plane.
        let contact = &reply.contacts[0];
        assert!((contact.normal_on_b + DVec3::Y).length() < 1e-9);
    }

    #[test]
    fn box_on_plane_is_pushed_out() {
        let plane = RigidBody {
            inv_mass: 0.0,
            restitution: 0.0,
            shape: CollisionShape::StaticPlane {
                normal: DVec3::Y,
                offset: 0.0,
            },
            ..Default::default()
        };
        let cube = RigidBody {
            position: DVec3::new(0.0, 0.4, 0.0),
            restitution: 0.0,
            shape: CollisionShape::Box {
                half_extents: DVec3::splat(0.5),
            },
            ..Default::default()
        };
        let reply = step_island(&request(
            vec![snapshot(1, plane), snapshot(2, cube)],
            vec![],
        ));
        let cube_after = reply.bodies.iter().find(|b| b.id == BodyId(2)).unwrap();
        assert!(
            cube_after.position.y > 0.4,
            "penetrating cube must be corrected upward"
        );
    }

    #[test]
    fn locked_axis_stays_put() {
        let body = RigidBody {
            linear_velocity: DVec3::new(1.0, 1.0, 1.0),
            axes_lock_lin: DVec3::new(1.0, 1.0, 0.0),
            ..Default::default()
        };
        let reply = step_island(&request(vec![snapshot(1, body)], vec![]));
        assert!(reply.bodies[0].position.x > 0.0);
        assert_eq!(reply.bodies[0].position.z, 0.0);
        assert_eq!(reply.bodies[0].linear_velocity.z, 0.0);
    }

    #[test]
    fn compound_children_collide() {
        // A dumbbell whose right sphere overlaps a free sphere.
        let dumbbell = RigidBody {
            position: DVec3::ZERO,
            restitution: 1.0,
            shape: CollisionShape::Compound {
                children: vec![
                    crate::body::CompoundChild {
                        position: DVec3::new(-2.0, 0.0, 0.0),
                        rotation: DQuat::IDENTITY,
                        shape: CollisionShape::Sphere { radius: 0.5 },
                    },
                    crate::body::CompoundChild {
                        position: DVec3::new(2.0, 0.0, 0.0),
                        rotation: DQuat::IDENTITY,
                        shape: CollisionShape::Sphere { radius: 0.5 },
                    },
                ],
            },
            ..Default::default()
        };
        let ball = RigidBody {
            position: DVec3::new(2.9, 0.0, 0.0),
            restitution: 1.0,
            shape: CollisionShape::Sphere { radius: 0.5 },
            ..Default::default()
        };
        let mut req = request(vec![snapshot(1, dumbbell), snapshot(2, ball)], vec![]);
        req.max_substeps = 1;
        let reply = step_island(&req);
        assert_eq!(reply.contacts.len(), 1, "compound child should hit the ball");
    }

    #[test]
    fn orientation_stays_normalized() {
        let body = RigidBody {
            angular_velocity: DVec3::new(3.0, 2.0, 1.0),
            ..Default::default()
        };
        let reply = step_island(&request(vec![snapshot(1, body)], vec![]));
        assert!((reply.bodies[0].orientation.length() - 1.0).abs() < 1e-9);
    }
}
