//! Splitting the drift into a gradient part and a remainder.
//!
//! With `U` the quasi-potential, the drift decomposes as
//! `b = -∇U + r`. The gradient is taken by finite differences on the surface
//! grid; the remainder is whatever the gradient does not explain.

use crate::error::Result;
use crate::field::VectorField;
use crate::grid::Grid;
use crate::surface::QuasiPotentialSurface;
use crate::traits::DriftField;
use serde::Serialize;

/// The three fields of a decomposition, sampled on the same grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorFieldSet {
    pub deterministic: VectorField,
    pub gradient: VectorField,
    pub remainder: VectorField,
}

/// Drift sampled at every node of `grid`.
pub fn deterministic_field(drift: &(impl DriftField + ?Sized), grid: &Grid) -> Result<VectorField> {
    VectorField::sample(grid, drift)
}

/// `-∇U` at every node of `grid`.
///
/// Centred differences where both neighbours along an axis are reached,
/// one-sided differences at the boundary or next to unreached nodes. Nodes
/// that are themselves unreached, or where no difference exists along an
/// axis, get `NaN` in that component.
pub fn gradient_field(surface: &impl QuasiPotentialSurface, grid: &Grid) -> Result<VectorField> {
    grid.ensure_compatible(surface.grid(), "surface")?;
    let values = surface.values();
    let count = grid.node_count();
    let mut gx = Vec::with_capacity(count);
    let mut gy = Vec::with_capacity(count);

    for index in 0..count {
        let (i, j) = grid.node(index);
        let along_x = derivative(grid, values, (i, j), (1, 0), grid.hx());
        let along_y = derivative(grid, values, (i, j), (0, 1), grid.hy());
        gx.push(-along_x);
        gy.push(-along_y);
    }

    Ok(VectorField::from_components(grid.clone(), gx, gy))
}

/// `deterministic − gradient`, node by node.
pub fn remainder_field(
    surface: &impl QuasiPotentialSurface,
    drift: &(impl DriftField + ?Sized),
    grid: &Grid,
) -> Result<VectorField> {
    Ok(decompose_all(surface, drift, grid)?.remainder)
}

/// Computes all three fields at once.
pub fn decompose_all(
    surface: &impl QuasiPotentialSurface,
    drift: &(impl DriftField + ?Sized),
    grid: &Grid,
) -> Result<VectorFieldSet> {
    let gradient = gradient_field(surface, grid)?;
    let deterministic = deterministic_field(drift, grid)?;

    let count = grid.node_count();
    let mut rx = Vec::with_capacity(count);
    let mut ry = Vec::with_capacity(count);
    for index in 0..count {
        let (dx, dy) = deterministic.get_index(index);
        let (gx, gy) = gradient.get_index(index);
        rx.push(dx - gx);
        ry.push(dy - gy);
    }
    let remainder = VectorField::from_components(grid.clone(), rx, ry);

    tracing::debug!(
        nodes = count,
        max_gradient = gradient.max_norm(),
        max_remainder = remainder.max_norm(),
        "Decomposed drift"
    );

    Ok(VectorFieldSet {
        deterministic,
        gradient,
        remainder,
    })
}

fn derivative(grid: &Grid, values: &[f64], node: (usize, usize), axis: (isize, isize), h: f64) -> f64 {
    let (i, j) = node;
    let here = values[grid.index(i, j)];
    if !here.is_finite() {
        return f64::NAN;
    }
    let sample = |di: isize, dj: isize| {
        grid.offset(i, j, di, dj)
            .map(|(a, b)| values[grid.index(a, b)])
            .filter(|v| v.is_finite())
    };
    match (sample(-axis.0, -axis.1), sample(axis.0, axis.1)) {
        (Some(back), Some(ahead)) => (ahead - back) / (2.0 * h),
        (None, Some(ahead)) => (ahead - here) / h,
        (Some(back), None) => (here - back) / h,
        (None, None) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::{decompose_all, deterministic_field, gradient_field, remainder_field};
    use crate::error::QpotError;
    use crate::grid::Grid;
    use crate::surface::GlobalSurface;
    use proptest::prelude::*;

    fn surface_from(grid: &Grid, potential: impl Fn(f64, f64) -> f64) -> GlobalSurface {
        let values = (0..grid.node_count())
            .map(|index| {
                let (x, y) = grid.coordinate_of_index(index);
                potential(x, y)
            })
            .collect();
        GlobalSurface {
            grid: grid.clone(),
            values,
            offsets: vec![0.0],
        }
    }

    #[test]
    fn quadratic_potential_has_a_vanishing_remainder_in_the_interior() {
        let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), 8, 8).unwrap();
        let surface = surface_from(&grid, |x, y| 0.5 * (x * x + y * y));
        let drift = |x: f64, y: f64| (-x, -y);
        let set = decompose_all(&surface, &drift, &grid).unwrap();
        for i in 1..8 {
            for j in 1..8 {
                let (rx, ry) = set.remainder.get(i, j);
                // Centred differences are exact for quadratics.
                assert!(rx.abs() < 1e-12 && ry.abs() < 1e-12, "({i}, {j}): ({rx}, {ry})");
            }
        }
        // One-sided differences at the edge are off by h/2.
        let (rx, _) = set.remainder.get(0, 4);
        assert!((rx.abs() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn rotational_drift_shows_up_in_the_remainder() {
        let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), 10, 10).unwrap();
        let surface = surface_from(&grid, |x, y| 0.5 * (x * x + y * y));
        let drift = |x: f64, y: f64| (-x - 2.0 * y, -y + 2.0 * x);
        let remainder = remainder_field(&surface, &drift, &grid).unwrap();
        let (x, y) = grid.coordinate(7, 4);
        let (rx, ry) = remainder.get(7, 4);
        assert!((rx + 2.0 * y).abs() < 1e-12);
        assert!((ry - 2.0 * x).abs() < 1e-12);
    }

    #[test]
    fn unreached_nodes_fall_back_to_one_sided_differences() {
        let grid = Grid::new((0.0, 4.0), (0.0, 1.0), 4, 1).unwrap();
        let mut surface = surface_from(&grid, |x, _| x);
        surface.values[grid.index(3, 0)] = f64::INFINITY;
        let gradient = gradient_field(&surface, &grid).unwrap();
        // Node 2 only sees node 1 to its left.
        assert!((gradient.get(2, 0).0 + 1.0).abs() < 1e-12);
        assert!(gradient.get(3, 0).0.is_nan());
        // Node 4 has no reached neighbour along x.
        assert!(gradient.get(4, 0).0.is_nan());
        assert!(gradient.get(4, 0).1.is_finite());
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let grid = Grid::new((0.0, 1.0), (0.0, 1.0), 4, 4).unwrap();
        let other = Grid::new((0.0, 1.0), (0.0, 1.0), 5, 4).unwrap();
        let surface = surface_from(&grid, |x, y| x + y);
        let err = decompose_all(&surface, &|x: f64, y: f64| (x, y), &other)
            .expect_err("grids differ");
        assert!(matches!(err, QpotError::ShapeMismatch(_)));
    }

    #[test]
    fn non_finite_drift_is_a_domain_error() {
        let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), 2, 2).unwrap();
        let err = deterministic_field(&|x: f64, _y: f64| (1.0 / x, 0.0), &grid)
            .expect_err("pole at x = 0");
        assert!(matches!(err, QpotError::Domain(_)));
    }

    proptest! {
        #[test]
        fn remainder_is_exactly_the_difference(
            a in -2.0f64..2.0,
            b in -2.0f64..2.0,
            c in -2.0f64..2.0,
            w in -3.0f64..3.0,
        ) {
            let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), 6, 6).unwrap();
            let surface = surface_from(&grid, |x, y| a * x * x + b * x * y + c * y.sin());
            let drift = move |x: f64, y: f64| (-x + w * y, x.cos() - y);
            let set = decompose_all(&surface, &drift, &grid).unwrap();
            for index in 0..grid.node_count() {
                let (dx, dy) = set.deterministic.get_index(index);
                let (gx, gy) = set.gradient.get_index(index);
                let (rx, ry) = set.remainder.get_index(index);
                prop_assert_eq!(rx, dx - gx);
                prop_assert_eq!(ry, dy - gy);
            }
        }
    }
}
