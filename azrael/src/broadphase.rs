//! Broadphase collision detection: AABB overlap pairs via sweep-and-prune,
//! grouped into collision islands with union-find.
//!
//! An island is the unit of worker dispatch: a maximal set of active bodies
//! whose AABBs transitively overlap this tick. Static bodies never merge
//! islands; they are attached read-only to every island whose active members
//! overlap them, so two heaps resting on the same ground plane still simulate
//! independently.

use std::cmp::Ordering;
use std::collections::HashMap;

use glam::DVec3;

use crate::body::{Aabb, BodyId};

/// Endpoint values are clamped to this magnitude so unbounded shapes
/// (planes) sort cleanly instead of poisoning the axis statistics.
const SWEEP_CLAMP: f64 = 1e30;

/// One body entering the broadphase this tick.
#[derive(Debug, Clone)]
pub struct BroadEntry {
    pub id: BodyId,
    pub aabb: Aabb,
    /// Active bodies form islands; inactive ones (static, sleeping) only
    /// attach to them.
    pub active: bool,
}

impl BroadEntry {
    pub fn new(id: BodyId, aabb: Aabb, active: bool) -> Self {
        let aabb = Aabb::new(
            aabb.min.max(DVec3::splat(-SWEEP_CLAMP)),
            aabb.max.min(DVec3::splat(SWEEP_CLAMP)),
        );
        Self { id, aabb, active }
    }
}

/// A collision island: the active members plus the static bodies they rest
/// against. Constructed and discarded within one tick.
#[derive(Debug, Clone, Default)]
pub struct IslandSet {
    /// Active members, sorted by id. Exactly one island owns each.
    pub members: Vec<BodyId>,
    /// Read-only static partners, sorted by id. May appear in many islands.
    pub statics: Vec<BodyId>,
}

impl IslandSet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// All overlapping AABB pairs among `entries`, as index pairs with
/// `first < second`.
///
/// Sweep-and-prune: entries are ordered by their lower bound along the most
/// spread-out axis, and every interval is compared only against the later
/// intervals that begin before it ends. Each unordered pair is visited at
/// most once; candidates are confirmed against the full box before being
/// reported.
pub fn sweep_and_prune(entries: &[BroadEntry]) -> Vec<(usize, usize)> {
    if entries.len() < 2 {
        return Vec::new();
    }
    let axis = spread_axis(entries);

    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        entries[a].aabb.min[axis]
            .partial_cmp(&entries[b].aabb.min[axis])
            .unwrap_or(Ordering::Equal)
    });

    let mut pairs = Vec::new();
    for (pos, &first) in order.iter().enumerate() {
        let sweep_end = entries[first].aabb.max[axis];
        for &second in &order[pos + 1..] {
            if entries[second].aabb.min[axis] > sweep_end {
                break;
            }
            if entries[first].aabb.overlaps(&entries[second].aabb) {
                pairs.push((first.min(second), first.max(second)));
            }
        }
    }
    pairs
}

/// Index of the axis with the widest spread of box centers. The spread is
/// the second moment about the mean, accumulated in a single pass over the
/// sums and squared sums.
fn spread_axis(entries: &[BroadEntry]) -> usize {
    let mut sum = DVec3::ZERO;
    let mut sum_sq = DVec3::ZERO;
    for entry in entries {
        let center = entry.aabb.center();
        sum += center;
        sum_sq += center * center;
    }
    let spread = sum_sq - sum * sum / entries.len() as f64;

    let mut axis = 0;
    if spread.y > spread[axis] {
        axis = 1;
    }
    if spread.z > spread[axis] {
        axis = 2;
    }
    axis
}

/// Disjoint-set forest over entry indices.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Group the overlap `pairs` of `entries` into islands.
///
/// Every active entry lands in exactly one island (a body with no overlaps
/// forms a singleton). Active-active overlaps merge islands; active-static
/// overlaps attach the static read-only; static-static overlaps are ignored.
/// Statics with no active neighbour appear in no island at all.
pub fn build_islands(entries: &[BroadEntry], pairs: &[(usize, usize)]) -> Vec<IslandSet> {
    let mut forest = UnionFind::new(entries.len());
    let mut attachments: Vec<(usize, usize)> = Vec::new(); // (active, static)

    for &(a, b) in pairs {
        match (entries[a].active, entries[b].active) {
            (true, true) => forest.union(a, b),
            (true, false) => attachments.push((a, b)),
            (false, true) => attachments.push((b, a)),
            (false, false) => {}
        }
    }

    let mut by_root: HashMap<usize, IslandSet> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        if entry.active {
            let root = forest.find(index);
            by_root.entry(root).or_default().members.push(entry.id);
        }
    }
    for (active, stat) in attachments {
        let root = forest.find(active);
        if let Some(island) = by_root.get_mut(&root) {
            island.statics.push(entries[stat].id);
        }
    }

    let mut islands: Vec<IslandSet> = by_root.into_values().collect();
    for island in &mut islands {
        island.members.sort_unstable();
        island.statics.sort_unstable();
        island.statics.dedup();
    }
    // Stable order across runs: smallest member first.
    islands.sort_by_key(|i| i.members.first().copied());
    islands
}
