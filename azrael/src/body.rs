//! Rigid-body state, collision shapes and force actuators.
//!
//! A [`RigidBody`] is the full per-object simulation record: pose, velocity,
//! mass parameters, collision shape and boosters. Bodies are value types;
//! everything that crosses a component boundary is a copy, never a shared
//! reference.

use glam::{DMat3, DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// Stable identifier of a simulated body.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct BodyId(pub u64);

impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Collision shape of a body.
///
/// A closed set of variants; AABB, inertia and solver code match exhaustively
/// so adding a shape is a compile-time checklist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CollisionShape {
    /// No collision geometry; the body still integrates forces.
    Empty,
    /// Sphere with radius.
    Sphere { radius: f64 },
    /// Box with half-extents.
    Box { half_extents: DVec3 },
    /// Infinite static plane `dot(normal, p) = offset`. Always static.
    StaticPlane { normal: DVec3, offset: f64 },
    /// Child shapes at local transforms relative to the body pose.
    Compound { children: Vec<CompoundChild> },
}

/// One child of a compound shape. World pose of the child is
/// `body pose ∘ (position, rotation)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompoundChild {
    pub position: DVec3,
    pub rotation: DQuat,
    pub shape: CollisionShape,
}

impl Default for CollisionShape {
    fn default() -> Self {
        CollisionShape::Sphere { radius: 1.0 }
    }
}

impl CollisionShape {
    /// Shape with all linear dimensions multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> CollisionShape {
        match self {
            CollisionShape::Empty => CollisionShape::Empty,
            CollisionShape::Sphere { radius } => CollisionShape::Sphere {
                radius: radius * scale,
            },
            CollisionShape::Box { half_extents } => CollisionShape::Box {
                half_extents: *half_extents * scale,
            },
            CollisionShape::StaticPlane { normal, offset } => CollisionShape::StaticPlane {
                normal: *normal,
                offset: offset * scale,
            },
            CollisionShape::Compound { children } => CollisionShape::Compound {
                children: children
                    .iter()
                    .map(|c| CompoundChild {
                        position: c.position * scale,
                        rotation: c.rotation,
                        shape: c.shape.scaled(scale),
                    })
                    .collect(),
            },
        }
    }

    /// Volume of the shape. Planes and empty shapes have none.
    pub fn volume(&self) -> f64 {
        match self {
            CollisionShape::Empty | CollisionShape::StaticPlane { .. } => 0.0,
            CollisionShape::Sphere { radius } => (4.0 / 3.0) * std::f64::consts::PI * radius.powi(3),
            CollisionShape::Box { half_extents } => {
                8.0 * half_extents.x * half_extents.y * half_extents.z
            }
            CollisionShape::Compound { children } => {
                children.iter().map(|c| c.shape.volume()).sum()
            }
        }
    }

    /// Local-space inertia tensor for the shape carrying `mass`.
    pub fn inertia(&self, mass: f64) -> DMat3 {
        match self {
            CollisionShape::Empty | CollisionShape::StaticPlane { .. } => DMat3::ZERO,
            CollisionShape::Sphere { radius } => {
                DMat3::from_diagonal(DVec3::splat(0.4 * mass * radius * radius))
            }
            CollisionShape::Box { half_extents } => {
                let x = half_extents.x * 2.0;
                let y = half_extents.y * 2.0;
                let z = half_extents.z * 2.0;
                let factor = mass / 12.0;
                DMat3::from_diagonal(DVec3::new(
                    factor * (y * y + z * z),
                    factor * (x * x + z * z),
                    factor * (x * x + y * y),
                ))
            }
            CollisionShape::Compound { children } => {
                // Distribute the mass over the children by volume share and
                // shift each child tensor with the parallel-axis theorem.
                let total = self.volume();
                if total <= 0.0 {
                    return DMat3::ZERO;
                }
                let mut tensor = DMat3::ZERO;
                for child in children {
                    let m = mass * child.shape.volume() / total;
                    let rot = DMat3::from_quat(child.rotation);
                    let local = rot * child.shape.inertia(m) * rot.transpose();
                    let d = child.position;
                    let shift = DMat3::from_diagonal(DVec3::splat(d.length_squared()))
                        - outer_product(d, d);
                    tensor += local + shift * m;
                }
                tensor
            }
        }
    }

    /// AABB of the shape at the given world pose.
    pub fn world_aabb(&self, position: DVec3, rotation: DQuat) -> Aabb {
        match self {
            // An empty shape occupies no space; its AABB never overlaps.
            CollisionShape::Empty => Aabb::empty(),
            // Spheres are rotation-invariant.
            CollisionShape::Sphere { radius } => {
                Aabb::from_center_half_extents(position, DVec3::splat(*radius))
            }
            CollisionShape::Box { half_extents } => {
                let mut aabb = Aabb::empty();
                for corner in corner_offsets(*half_extents) {
                    aabb.expand_to_include(position + rotation * corner);
                }
                aabb
            }
            // A plane is unbounded; it overlaps everything so the broadphase
            // attaches it to every island its neighbours form.
            CollisionShape::StaticPlane { .. } => Aabb::everything(),
            CollisionShape::Compound { children } => {
                let mut aabb = Aabb::empty();
                for child in children {
                    let child_pos = position + rotation * child.position;
                    let child_rot = rotation * child.rotation;
                    aabb = aabb.merge(&child.shape.world_aabb(child_pos, child_rot));
                }
                aabb
            }
        }
    }
}

fn corner_offsets(h: DVec3) -> [DVec3; 8] {
    [
        DVec3::new(-h.x, -h.y, -h.z),
        DVec3::new(h.x, -h.y, -h.z),
        DVec3::new(-h.x, h.y, -h.z),
        DVec3::new(h.x, h.y, -h.z),
        DVec3::new(-h.x, -h.y, h.z),
        DVec3::new(h.x, -h.y, h.z),
        DVec3::new(-h.x, h.y, h.z),
        DVec3::new(h.x, h.y, h.z),
    ]
}

fn outer_product(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Fixed-direction force actuator mounted on a body.
///
/// Position and direction are in body-local coordinates; only the force
/// magnitude is mutable at runtime (via a `SetForce` command).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booster {
    /// Mount point relative to the body origin.
    pub position: DVec3,
    /// Unit thrust direction in body space.
    pub direction: DVec3,
    /// Current force magnitude.
    pub force: f64,
}

impl Booster {
    pub fn new(position: DVec3, direction: DVec3, force: f64) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
            force,
        }
    }
}

/// Full dynamic state of one rigid body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RigidBody {
    /// World position of the body origin.
    pub position: DVec3,
    /// World orientation, unit quaternion (x, y, z, w).
    pub orientation: DQuat,
    /// Linear velocity in world space.
    pub linear_velocity: DVec3,
    /// Angular velocity in world space.
    pub angular_velocity: DVec3,
    /// Inverse mass; 0 marks a static (infinite-mass) body.
    pub inv_mass: f64,
    /// Restitution coefficient in `[0, 1]`.
    pub restitution: f64,
    /// Friction coefficient, `>= 0`.
    pub friction: f64,
    /// Linear damping factor in `[0, 1]`.
    pub linear_damping: f64,
    /// Angular damping factor in `[0, 1]`.
    pub angular_damping: f64,
    /// Uniform scale applied to all linear shape dimensions, `> 0`.
    pub scale: f64,
    /// Collision geometry.
    pub shape: CollisionShape,
    /// Force actuators, ordered; commands address them by index.
    pub boosters: Vec<Booster>,
    /// Componentwise linear motion locks (1 = free, 0 = locked).
    #[serde(default = "axes_free")]
    pub axes_lock_lin: DVec3,
    /// Componentwise angular motion locks (1 = free, 0 = locked).
    #[serde(default = "axes_free")]
    pub axes_lock_rot: DVec3,
}

fn axes_free() -> DVec3 {
    DVec3::ONE
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            inv_mass: 1.0,
            restitution: 0.9,
            friction: 0.5,
            linear_damping: 0.0,
            angular_damping: 0.0,
            scale: 1.0,
            shape: CollisionShape::default(),
            boosters: Vec::new(),
            axes_lock_lin: DVec3::ONE,
            axes_lock_rot: DVec3::ONE,
        }
    }
}

impl RigidBody {
    /// Whether the solver may move this body. Static bodies, planes and
    /// shapeless records only ever change pose through direct commands.
    pub fn is_dynamic(&self) -> bool {
        self.inv_mass > 0.0
            && !matches!(
                self.shape,
                CollisionShape::StaticPlane { .. } | CollisionShape::Empty
            )
    }

    /// Whether the body takes part in collision detection.
    pub fn has_collision_geometry(&self) -> bool {
        !matches!(self.shape, CollisionShape::Empty)
    }

    /// Collision shape with the body scale folded in.
    pub fn scaled_shape(&self) -> CollisionShape {
        self.shape.scaled(self.scale)
    }

    /// World-space AABB at the current pose.
    pub fn world_aabb(&self) -> Aabb {
        self.scaled_shape().world_aabb(self.position, self.orientation)
    }

    /// Inverse inertia tensor in world space. Zero for static bodies.
    pub fn inv_inertia_world(&self) -> DMat3 {
        if self.inv_mass <= 0.0 {
            return DMat3::ZERO;
        }
        let local = self.scaled_shape().inertia(1.0 / self.inv_mass);
        if local == DMat3::ZERO {
            return DMat3::ZERO;
        }
        let rot = DMat3::from_quat(self.orientation);
        rot * local.inverse() * rot.transpose()
    }

    /// Re-normalize the orientation if it drifted further than `eps` from
    /// unit length.
    pub fn renormalize_orientation(&mut self, eps: f64) {
        if (self.orientation.length() - 1.0).abs() > eps {
            self.orientation = self.orientation.normalize();
        }
    }

    /// Reject records that would corrupt the simulation.
    pub fn validate(&self) -> Result<(), String> {
        if !self.position.is_finite() || !self.orientation.is_finite() {
            return Err("non-finite pose".into());
        }
        if self.orientation.length_squared() < 1e-12 {
            return Err("degenerate orientation quaternion".into());
        }
        if self.inv_mass < 0.0 {
            return Err("negative inverse mass".into());
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err("restitution outside [0, 1]".into());
        }
        if self.friction < 0.0 {
            return Err("negative friction".into());
        }
        if !(0.0..=1.0).contains(&self.linear_damping)
            || !(0.0..=1.0).contains(&self.angular_damping)
        {
            return Err("damping outside [0, 1]".into());
        }
        if self.scale <= 0.0 {
            return Err("scale must be positive".into());
        }
        Ok(())
    }
}

/// Partial override of a body, carried by a `SetBody` command.
///
/// Every field is optional; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BodyPatch {
    pub position: Option<DVec3>,
    pub orientation: Option<DQuat>,
    pub linear_velocity: Option<DVec3>,
    pub angular_velocity: Option<DVec3>,
    pub inv_mass: Option<f64>,
    pub restitution: Option<f64>,
    pub friction: Option<f64>,
    pub linear_damping: Option<f64>,
    pub angular_damping: Option<f64>,
    pub scale: Option<f64>,
    pub shape: Option<CollisionShape>,
    pub boosters: Option<Vec<Booster>>,
    pub axes_lock_lin: Option<DVec3>,
    pub axes_lock_rot: Option<DVec3>,
}

impl BodyPatch {
    /// Apply the patch on top of `body`, returning the merged record.
    pub fn apply(&self, body: &RigidBody) -> RigidBody {
        let mut out = body.clone();
        if let Some(v) = self.position {
            out.position = v;
        }
        if let Some(v) = self.orientation {
            out.orientation = v;
        }
        if let Some(v) = self.linear_velocity {
            out.linear_velocity = v;
        }
        if let Some(v) = self.angular_velocity {
            out.angular_velocity = v;
        }
        if let Some(v) = self.inv_mass {
            out.inv_mass = v;
        }
        if let Some(v) = self.restitution {
            out.restitution = v;
        }
        if let Some(v) = self.friction {
            out.friction = v;
        }
        if let Some(v) = self.linear_damping {
            out.linear_damping = v;
        }
        if let Some(v) = self.angular_damping {
            out.angular_damping = v;
        }
        if let Some(v) = self.scale {
            out.scale = v;
        }
        if let Some(v) = &self.shape {
            out.shape = v.clone();
        }
        if let Some(v) = &self.boosters {
            out.boosters = v.clone();
        }
        if let Some(v) = self.axes_lock_lin {
            out.axes_lock_lin = v;
        }
        if let Some(v) = self.axes_lock_rot {
            out.axes_lock_rot = v;
        }
        out
    }

    /// True if the patch touches pose, shape or scale, i.e. the AABB must be
    /// recomputed.
    pub fn touches_geometry(&self) -> bool {
        self.position.is_some()
            || self.orientation.is_some()
            || self.scale.is_some()
            || self.shape.is_some()
    }
}

/// Axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that no point is inside of; identity for `merge`.
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::MAX),
            max: DVec3::splat(f64::MIN),
        }
    }

    /// Box covering all of space (used by unbounded shapes).
    pub fn everything() -> Self {
        Self {
            min: DVec3::splat(f64::NEG_INFINITY),
            max: DVec3::splat(f64::INFINITY),
        }
    }

    pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn expand_to_include(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_aabb_is_rotation_invariant() {
        let shape = CollisionShape::Sphere { radius: 2.0 };
        let rot = DQuat::from_rotation_z(1.3);
        let aabb = shape.world_aabb(DVec3::new(1.0, 0.0, 0.0), rot);
        assert_eq!(aabb.min, DVec3::new(-1.0, -2.0, -2.0));
        assert_eq!(aabb.max, DVec3::new(3.0, 2.0, 2.0));
    }

    #[test]
    fn rotated_box_aabb_covers_corners() {
        let shape = CollisionShape::Box {
            half_extents: DVec3::ONE,
        };
        // 45 degrees around z: the x/y extent grows to sqrt(2).
        let rot = DQuat::from_rotation_z(std::f64::consts::FRAC_PI_4);
        let aabb = shape.world_aabb(DVec3::ZERO, rot);
        let expect = 2f64.sqrt();
        assert!((aabb.max.x - expect).abs() < 1e-9);
        assert!((aabb.max.y - expect).abs() < 1e-9);
        assert!((aabb.max.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn plane_aabb_overlaps_everything() {
        let plane = CollisionShape::StaticPlane {
            normal: DVec3::Y,
            offset: 0.0,
        };
        let aabb = plane.world_aabb(DVec3::ZERO, DQuat::IDENTITY);
        let far = Aabb::from_center_half_extents(DVec3::splat(1e9), DVec3::ONE);
        assert!(aabb.overlaps(&far));
    }

    #[test]
    fn empty_shape_never_overlaps() {
        let aabb = CollisionShape::Empty.world_aabb(DVec3::ZERO, DQuat::IDENTITY);
        assert!(aabb.is_empty());
        let unit = Aabb::from_center_half_extents(DVec3::ZERO, DVec3::ONE);
        assert!(!aabb.overlaps(&unit));
    }

    #[test]
    fn compound_aabb_merges_children() {
        let shape = CollisionShape::Compound {
            children: vec![
                CompoundChild {
                    position: DVec3::new(-2.0, 0.0, 0.0),
                    rotation: DQuat::IDENTITY,
                    shape: CollisionShape::Sphere { radius: 1.0 },
                },
                CompoundChild {
                    position: DVec3::new(2.0, 0.0, 0.0),
                    rotation: DQuat::IDENTITY,
                    shape: CollisionShape::Sphere { radius: 1.0 },
                },
            ],
        };
        let aabb = shape.world_aabb(DVec3::ZERO, DQuat::IDENTITY);
        assert_eq!(aabb.min.x, -3.0);
        assert_eq!(aabb.max.x, 3.0);
    }

    #[test]
    fn scale_multiplies_linear_dimensions() {
        let mut body = RigidBody {
            shape: CollisionShape::Sphere { radius: 1.0 },
            scale: 2.5,
            ..Default::default()
        };
        body.position = DVec3::ZERO;
        let aabb = body.world_aabb();
        assert_eq!(aabb.max, DVec3::splat(2.5));
    }

    #[test]
    fn sphere_inertia_matches_solid_formula() {
        let shape = CollisionShape::Sphere { radius: 1.0 };
        let inertia = shape.inertia(10.0);
        assert!((inertia.x_axis.x - 4.0).abs() < 1e-12);
    }

    #[test]
    fn static_body_has_zero_inverse_inertia() {
        let body = RigidBody {
            inv_mass: 0.0,
            ..Default::default()
        };
        assert_eq!(body.inv_inertia_world(), DMat3::ZERO);
    }

    #[test]
    fn patch_apply_overrides_only_given_fields() {
        let body = RigidBody {
            position: DVec3::new(1.0, 2.0, 3.0),
            linear_velocity: DVec3::X,
            ..Default::default()
        };
        let patch = BodyPatch {
            position: Some(DVec3::new(100.0, 0.0, 0.0)),
            ..Default::default()
        };
        let merged = patch.apply(&body);
        assert_eq!(merged.position, DVec3::new(100.0, 0.0, 0.0));
        assert_eq!(merged.linear_velocity, DVec3::X);
        assert!(patch.touches_geometry());
    }

    #[test]
    fn validate_rejects_bad_records() {
        let mut body = RigidBody::default();
        body.scale = 0.0;
        assert!(body.validate().is_err());

        let mut body = RigidBody::default();
        body.restitution = 1.5;
        assert!(body.validate().is_err());

        assert!(RigidBody::default().validate().is_ok());
    }

    #[test]
    fn renormalize_fixes_drifted_quaternion() {
        let mut body = RigidBody::default();
        body.orientation = DQuat::from_xyzw(0.0, 0.0, 0.0, 1.01);
        body.renormalize_orientation(1e-6);
        assert!((body.orientation.length() - 1.0).abs() < 1e-12);
    }
}
