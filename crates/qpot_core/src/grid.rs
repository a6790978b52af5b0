use crate::error::{QpotError, Result};
use serde::Serialize;

/// Offsets of the 8-neighbourhood, edge neighbours first.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (1, 0),
    (0, 1),
    (-1, 0),
    (0, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
    (1, -1),
];

/// Uniform rectangular grid over `[x_min, x_max] × [y_min, y_max]`.
///
/// `nx` and `ny` count steps, so there are `nx + 1` columns and `ny + 1` rows
/// of nodes. Node `(i, j)` sits at `(x_min + i·hx, y_min + j·hy)` and is
/// stored at flat index `i + j·(nx + 1)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grid {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
    hx: f64,
    hy: f64,
}

impl Grid {
    pub fn new(x_bounds: (f64, f64), y_bounds: (f64, f64), nx: usize, ny: usize) -> Result<Self> {
        let (x_min, x_max) = x_bounds;
        let (y_min, y_max) = y_bounds;
        if !(x_min.is_finite() && x_max.is_finite() && y_min.is_finite() && y_max.is_finite()) {
            return Err(QpotError::domain("Grid bounds must be finite."));
        }
        if x_max <= x_min || y_max <= y_min {
            return Err(QpotError::domain(format!(
                "Grid bounds must satisfy min < max, got x: [{x_min}, {x_max}], y: [{y_min}, {y_max}]."
            )));
        }
        if nx == 0 || ny == 0 {
            return Err(QpotError::domain(format!(
                "Grid step counts must be positive, got nx = {nx}, ny = {ny}."
            )));
        }

        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
            nx,
            ny,
            hx: (x_max - x_min) / nx as f64,
            hy: (y_max - y_min) / ny as f64,
        })
    }

    pub fn x_bounds(&self) -> (f64, f64) {
        (self.x_min, self.x_max)
    }

    pub fn y_bounds(&self) -> (f64, f64) {
        (self.y_min, self.y_max)
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn hx(&self) -> f64 {
        self.hx
    }

    pub fn hy(&self) -> f64 {
        self.hy
    }

    /// Number of node columns (`nx + 1`).
    pub fn columns(&self) -> usize {
        self.nx + 1
    }

    /// Number of node rows (`ny + 1`).
    pub fn rows(&self) -> usize {
        self.ny + 1
    }

    pub fn node_count(&self) -> usize {
        self.columns() * self.rows()
    }

    pub fn index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i <= self.nx && j <= self.ny);
        i + j * self.columns()
    }

    pub fn node(&self, index: usize) -> (usize, usize) {
        (index % self.columns(), index / self.columns())
    }

    pub fn coordinate(&self, i: usize, j: usize) -> (f64, f64) {
        (
            self.x_min + i as f64 * self.hx,
            self.y_min + j as f64 * self.hy,
        )
    }

    pub fn coordinate_of_index(&self, index: usize) -> (f64, f64) {
        let (i, j) = self.node(index);
        self.coordinate(i, j)
    }

    /// Whether `(x, y)` lies inside the closed domain, allowing round-off of a
    /// tiny fraction of a cell.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let tol_x = 1e-9 * self.hx;
        let tol_y = 1e-9 * self.hy;
        x.is_finite()
            && y.is_finite()
            && x >= self.x_min - tol_x
            && x <= self.x_max + tol_x
            && y >= self.y_min - tol_y
            && y <= self.y_max + tol_y
    }

    /// Node closest to `(x, y)`; fails when the point is outside the domain.
    pub fn nearest_node(&self, x: f64, y: f64) -> Result<(usize, usize)> {
        if !self.contains(x, y) {
            return Err(QpotError::domain(format!(
                "Point ({x}, {y}) lies outside the grid [{}, {}] × [{}, {}].",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        let i = ((x - self.x_min) / self.hx).round().clamp(0.0, self.nx as f64) as usize;
        let j = ((y - self.y_min) / self.hy).round().clamp(0.0, self.ny as f64) as usize;
        Ok((i, j))
    }

    pub fn is_boundary(&self, i: usize, j: usize) -> bool {
        i == 0 || j == 0 || i == self.nx || j == self.ny
    }

    /// Node shifted by `(di, dj)` if it stays on the grid.
    pub fn offset(&self, i: usize, j: usize, di: isize, dj: isize) -> Option<(usize, usize)> {
        let ni = i.checked_add_signed(di)?;
        let nj = j.checked_add_signed(dj)?;
        (ni <= self.nx && nj <= self.ny).then_some((ni, nj))
    }

    /// The existing members of the 8-neighbourhood of `(i, j)`. Boundary
    /// nodes have fewer.
    pub fn neighbors(&self, i: usize, j: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        NEIGHBOR_OFFSETS
            .iter()
            .filter_map(move |&(di, dj)| self.offset(i, j, di, dj))
    }

    /// Same step counts and bounds equal up to round-off.
    pub fn is_compatible(&self, other: &Grid) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-12 * (1.0 + a.abs().max(b.abs()));
        self.nx == other.nx
            && self.ny == other.ny
            && close(self.x_min, other.x_min)
            && close(self.x_max, other.x_max)
            && close(self.y_min, other.y_min)
            && close(self.y_max, other.y_max)
    }

    pub(crate) fn ensure_compatible(&self, other: &Grid, what: &str) -> Result<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(QpotError::shape_mismatch(format!(
                "{what}: grid {}×{} over [{}, {}] × [{}, {}] does not match grid {}×{} over [{}, {}] × [{}, {}].",
                other.nx,
                other.ny,
                other.x_min,
                other.x_max,
                other.y_min,
                other.y_max,
                self.nx,
                self.ny,
                self.x_min,
                self.x_max,
                self.y_min,
                self.y_max
            )))
        }
    }
}
