//! Grid-shaped quasi-potential surfaces.
//!
//! Unreached nodes hold `f64::INFINITY`. That is an ordinary outcome for a
//! bounded domain, not a numerical failure.

use crate::error::{QpotError, Result};
use crate::grid::Grid;
use crate::local::linearization::SeedLinearization;
use crate::local::NodeStatus;
use serde::Serialize;

/// Read access shared by local and global surfaces.
pub trait QuasiPotentialSurface {
    fn grid(&self) -> &Grid;

    /// Node values in flat index order.
    fn values(&self) -> &[f64];

    fn value(&self, i: usize, j: usize) -> f64 {
        self.values()[self.grid().index(i, j)]
    }

    fn is_reached(&self, i: usize, j: usize) -> bool {
        self.value(i, j).is_finite()
    }

    fn reached_count(&self) -> usize {
        self.values().iter().filter(|v| v.is_finite()).count()
    }

    /// Value of the node nearest to `(x, y)`.
    fn value_at_nearest(&self, x: f64, y: f64) -> Result<f64> {
        let (i, j) = self.grid().nearest_node(x, y)?;
        Ok(self.value(i, j))
    }

    /// Bilinear interpolation at `(x, y)`. Returns `+∞` when a corner of the
    /// enclosing cell is unreached.
    fn interpolate(&self, x: f64, y: f64) -> Result<f64> {
        let grid = self.grid();
        if !grid.contains(x, y) {
            return Err(QpotError::domain(format!(
                "Cannot interpolate at ({x}, {y}): point lies outside the grid."
            )));
        }
        let (x_min, _) = grid.x_bounds();
        let (y_min, _) = grid.y_bounds();
        let fx = ((x - x_min) / grid.hx()).clamp(0.0, grid.nx() as f64);
        let fy = ((y - y_min) / grid.hy()).clamp(0.0, grid.ny() as f64);
        let i0 = (fx.floor() as usize).min(grid.nx() - 1);
        let j0 = (fy.floor() as usize).min(grid.ny() - 1);
        let tx = fx - i0 as f64;
        let ty = fy - j0 as f64;

        let corners = [
            self.value(i0, j0),
            self.value(i0 + 1, j0),
            self.value(i0, j0 + 1),
            self.value(i0 + 1, j0 + 1),
        ];
        if corners.iter().any(|v| !v.is_finite()) {
            return Ok(f64::INFINITY);
        }
        let bottom = corners[0] * (1.0 - tx) + corners[1] * tx;
        let top = corners[2] * (1.0 - tx) + corners[3] * tx;
        Ok(bottom * (1.0 - ty) + top * ty)
    }

    /// Smallest finite value, if any node was reached.
    fn min_value(&self) -> Option<f64> {
        self.values()
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .min_by(f64::total_cmp)
    }

    /// Largest finite value, if any node was reached.
    fn max_value(&self) -> Option<f64> {
        self.values()
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .max_by(f64::total_cmp)
    }
}

/// Quasi-potential computed outward from a single stable equilibrium.
#[derive(Debug, Clone, Serialize)]
pub struct LocalSurface {
    pub(crate) grid: Grid,
    pub(crate) values: Vec<f64>,
    pub(crate) seed: (f64, f64),
    pub(crate) seed_node: (usize, usize),
    pub(crate) status: Vec<NodeStatus>,
    pub(crate) accepted_order: Vec<usize>,
    pub(crate) linearization: Option<SeedLinearization>,
}

impl LocalSurface {
    /// The seed coordinate as supplied by the caller.
    pub fn seed(&self) -> (f64, f64) {
        self.seed
    }

    /// The node the seed was snapped to; its value is exactly zero.
    pub fn seed_node(&self) -> (usize, usize) {
        self.seed_node
    }

    pub fn status(&self, i: usize, j: usize) -> NodeStatus {
        self.status[self.grid.index(i, j)]
    }

    /// Flat node indices in the order the solver accepted them.
    pub fn accepted_order(&self) -> &[usize] {
        &self.accepted_order
    }

    /// Linearization used to initialise the seed neighbourhood, if any.
    pub fn linearization(&self) -> Option<&SeedLinearization> {
        self.linearization.as_ref()
    }
}

impl QuasiPotentialSurface for LocalSurface {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Several local surfaces merged with per-surface offsets.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSurface {
    pub(crate) grid: Grid,
    pub(crate) values: Vec<f64>,
    pub(crate) offsets: Vec<f64>,
}

impl GlobalSurface {
    /// Offset added to each contributing local surface, in input order.
    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }
}

impl QuasiPotentialSurface for GlobalSurface {
    fn grid(&self) -> &Grid {
        &self.grid
    }

    fn values(&self) -> &[f64] {
        &self.values
    }
}
