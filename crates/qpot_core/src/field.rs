//! Point-wise drift evaluation and grid-shaped vector fields.

use crate::error::{QpotError, Result};
use crate::grid::Grid;
use crate::traits::DriftField;
use serde::Serialize;

/// Evaluates `field` at `(x, y)`, rejecting non-finite output.
pub fn evaluate(field: &(impl DriftField + ?Sized), x: f64, y: f64) -> Result<(f64, f64)> {
    let (fx, fy) = field.drift(x, y);
    if !fx.is_finite() || !fy.is_finite() {
        return Err(QpotError::domain(format!(
            "Drift is not finite at ({x}, {y}): ({fx}, {fy})."
        )));
    }
    Ok((fx, fy))
}

/// A vector per grid node, stored as two dense component arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorField {
    grid: Grid,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl VectorField {
    pub(crate) fn from_components(grid: Grid, x: Vec<f64>, y: Vec<f64>) -> Self {
        debug_assert_eq!(x.len(), grid.node_count());
        debug_assert_eq!(y.len(), grid.node_count());
        Self { grid, x, y }
    }

    /// Samples `field` at every node of `grid`.
    pub fn sample(grid: &Grid, field: &(impl DriftField + ?Sized)) -> Result<Self> {
        let count = grid.node_count();
        let mut x = Vec::with_capacity(count);
        let mut y = Vec::with_capacity(count);
        for index in 0..count {
            let (px, py) = grid.coordinate_of_index(index);
            let (fx, fy) = evaluate(field, px, py)?;
            x.push(fx);
            y.push(fy);
        }
        Ok(Self::from_components(grid.clone(), x, y))
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn get(&self, i: usize, j: usize) -> (f64, f64) {
        let index = self.grid.index(i, j);
        (self.x[index], self.y[index])
    }

    pub(crate) fn get_index(&self, index: usize) -> (f64, f64) {
        (self.x[index], self.y[index])
    }

    /// The x components in flat node order.
    pub fn x_components(&self) -> &[f64] {
        &self.x
    }

    /// The y components in flat node order.
    pub fn y_components(&self) -> &[f64] {
        &self.y
    }

    pub fn magnitude(&self, i: usize, j: usize) -> f64 {
        let (vx, vy) = self.get(i, j);
        vx.hypot(vy)
    }

    /// Largest vector length over the nodes where both components are finite.
    pub fn max_norm(&self) -> f64 {
        self.x
            .iter()
            .zip(&self.y)
            .map(|(vx, vy)| vx.hypot(*vy))
            .filter(|norm| norm.is_finite())
            .fold(0.0, f64::max)
    }
}
