//! Spatially indexed ambient force field.
//!
//! A regular 3-D lattice over an axis-aligned region; every cell holds a force
//! vector that is added to each body whose position falls inside the cell.
//! Lookups are O(1). Positions outside the region sample as zero, so the grid
//! behaves as if it extended to infinity with a default value of zero.

use glam::DVec3;
use tracing::debug;

use crate::config::GridConfig;

/// Piecewise-constant vector field on a regular lattice.
#[derive(Debug, Clone)]
pub struct ForceGrid {
    origin: DVec3,
    spacing: f64,
    dims: [usize; 3],
    cells: Vec<DVec3>,
}

impl ForceGrid {
    /// Create a zero-filled grid. `spacing` must be positive; zero-sized
    /// dimensions yield a grid that samples zero everywhere.
    pub fn new(origin: DVec3, spacing: f64, dims: [usize; 3]) -> Self {
        assert!(spacing > 0.0, "grid spacing must be positive");
        let len = dims[0] * dims[1] * dims[2];
        debug!(?origin, spacing, ?dims, cells = len, "force grid created");
        Self {
            origin,
            spacing,
            dims,
            cells: vec![DVec3::ZERO; len],
        }
    }

    pub fn from_config(cfg: &GridConfig) -> Self {
        Self::new(cfg.origin, cfg.spacing, cfg.dims)
    }

    /// Cell index of a world position, or `None` outside the region.
    fn cell_of(&self, p: DVec3) -> Option<[usize; 3]> {
        let rel = (p - self.origin) / self.spacing;
        let (x, y, z) = (rel.x.floor(), rel.y.floor(), rel.z.floor());
        if x < 0.0 || y < 0.0 || z < 0.0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        Some([x, y, z])
    }

    fn flat(&self, cell: [usize; 3]) -> usize {
        (cell[2] * self.dims[1] + cell[1]) * self.dims[0] + cell[0]
    }

    /// Force vector of the cell containing `p`; zero outside the region.
    pub fn sample(&self, p: DVec3) -> DVec3 {
        match self.cell_of(p) {
            Some(cell) => self.cells[self.flat(cell)],
            None => DVec3::ZERO,
        }
    }

    /// Set a single cell by index. Out-of-range indices are ignored.
    pub fn set(&mut self, cell: [usize; 3], value: DVec3) {
        if cell[0] < self.dims[0] && cell[1] < self.dims[1] && cell[2] < self.dims[2] {
            let idx = self.flat(cell);
            self.cells[idx] = value;
        }
    }

    /// Set every cell whose volume intersects the world-space box
    /// `[min, max]` to `value`.
    pub fn set_region(&mut self, min: DVec3, max: DVec3, value: DVec3) {
        let lo = ((min - self.origin) / self.spacing).floor();
        let hi = ((max - self.origin) / self.spacing).floor();
        let clamp = |v: f64, dim: usize| -> usize { v.max(0.0).min(dim as f64 - 1.0) as usize };
        if hi.x < 0.0 || hi.y < 0.0 || hi.z < 0.0 {
            return;
        }
        for z in clamp(lo.z, self.dims[2])..=clamp(hi.z, self.dims[2]) {
            for y in clamp(lo.y, self.dims[1])..=clamp(hi.y, self.dims[1]) {
                for x in clamp(lo.x, self.dims[0])..=clamp(hi.x, self.dims[0]) {
                    let idx = self.flat([x, y, z]);
                    self.cells[idx] = value;
                }
            }
        }
    }

    /// Reset every cell to zero.
    pub fn clear(&mut self) {
        self.cells.fill(DVec3::ZERO);
    }

    /// Cell index of a world position, for callers that address cells
    /// directly.
    pub fn cell_index(&self, p: DVec3) -> Option<[usize; 3]> {
        self.cell_of(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> ForceGrid {
        // 4x4x4 cells of size 1, spanning [-2, 2) on each axis.
        ForceGrid::new(DVec3::splat(-2.0), 1.0, [4, 4, 4])
    }

    #[test]
    fn sample_returns_cell_value() {
        let mut g = grid();
        let cell = g.cell_index(DVec3::ZERO).unwrap();
        g.set(cell, DVec3::new(10.0, 0.0, 0.0));
        assert_eq!(g.sample(DVec3::ZERO), DVec3::new(10.0, 0.0, 0.0));
        // Anywhere else in the same cell.
        assert_eq!(
            g.sample(DVec3::new(0.9, 0.9, 0.9)),
            DVec3::new(10.0, 0.0, 0.0)
        );
        // The neighbouring cell stays zero.
        assert_eq!(g.sample(DVec3::new(-0.5, 0.0, 0.0)), DVec3::ZERO);
    }

    #[test]
    fn out_of_region_samples_zero() {
        let mut g = grid();
        g.set_region(DVec3::splat(-2.0), DVec3::splat(2.0), DVec3::Y);
        assert_eq!(g.sample(DVec3::new(100.0, 0.0, 0.0)), DVec3::ZERO);
        assert_eq!(g.sample(DVec3::new(-2.1, 0.0, 0.0)), DVec3::ZERO);
    }

    #[test]
    fn set_region_covers_inclusive_box() {
        let mut g = grid();
        g.set_region(DVec3::splat(-1.0), DVec3::splat(0.5), DVec3::Z);
        assert_eq!(g.sample(DVec3::splat(-1.0)), DVec3::Z);
        assert_eq!(g.sample(DVec3::splat(0.4)), DVec3::Z);
        assert_eq!(g.sample(DVec3::splat(1.6)), DVec3::ZERO);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut g = grid();
        g.set_region(DVec3::splat(-2.0), DVec3::splat(1.9), DVec3::X);
        g.clear();
        assert_eq!(g.sample(DVec3::ZERO), DVec3::ZERO);
    }
}
