//! Stitching local surfaces into one global quasi-potential.
//!
//! Each local surface is only defined up to an additive constant. Across a
//! saddle separating two basins the action must not depend on the basin the
//! path started from, so the two surfaces are shifted until they agree at the
//! saddle. The global surface is the pointwise minimum of the shifted
//! surfaces.

use crate::error::{QpotError, Result};
use crate::grid::Grid;
use crate::surface::{GlobalSurface, LocalSurface, QuasiPotentialSurface};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Settings for stitching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Shift all offsets so the global minimum is zero. Without it the first
    /// surface keeps offset zero.
    pub normalize_minimum: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            normalize_minimum: true,
        }
    }
}

/// Which two surfaces an anchor aligns, and where.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AnchorLink {
    node: usize,
    lower: usize,
    upper: usize,
}

/// Merges `surfaces` into one global surface, using the unstable equilibria
/// in `anchors` to align neighbouring basins.
///
/// An anchor links the two surfaces with the smallest local values at its
/// nearest node, i.e. the two basins the saddle separates. Offsets are
/// propagated breadth-first from the first surface along these links.
pub fn stitch_surfaces(
    surfaces: &[LocalSurface],
    anchors: &[(f64, f64)],
    settings: GlobalSettings,
) -> Result<GlobalSurface> {
    let Some(first) = surfaces.first() else {
        return Err(QpotError::alignment("At least one local surface is required."));
    };
    let grid = first.grid().clone();
    for (k, surface) in surfaces.iter().enumerate().skip(1) {
        grid.ensure_compatible(surface.grid(), &format!("local surface {k}"))?;
    }

    let links = anchors
        .iter()
        .map(|&anchor| link_anchor(&grid, surfaces, anchor))
        .collect::<Result<Vec<_>>>()?;
    let mut offsets = propagate_offsets(surfaces, &links)?;

    let mut values = combine(&grid, surfaces, &offsets);
    if settings.normalize_minimum {
        let minimum = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .min_by(f64::total_cmp);
        if let Some(minimum) = minimum {
            for offset in &mut offsets {
                *offset -= minimum;
            }
            values = combine(&grid, surfaces, &offsets);
        }
    }

    tracing::info!(
        surfaces = surfaces.len(),
        anchors = anchors.len(),
        offsets = ?offsets,
        "Stitched global quasi-potential"
    );

    Ok(GlobalSurface {
        grid,
        values,
        offsets,
    })
}

fn link_anchor(grid: &Grid, surfaces: &[LocalSurface], anchor: (f64, f64)) -> Result<AnchorLink> {
    let (i, j) = grid.nearest_node(anchor.0, anchor.1).map_err(|_| {
        QpotError::alignment(format!(
            "Anchor ({}, {}) lies outside the grid.",
            anchor.0, anchor.1
        ))
    })?;
    let node = grid.index(i, j);

    let mut reached: Vec<(usize, f64)> = surfaces
        .iter()
        .enumerate()
        .map(|(k, surface)| (k, surface.values()[node]))
        .filter(|(_, value)| value.is_finite())
        .collect();
    if reached.len() < 2 {
        return Err(QpotError::alignment(format!(
            "Anchor ({}, {}) is reached by {} surface(s); at least two are required.",
            anchor.0,
            anchor.1,
            reached.len()
        )));
    }
    reached.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    let (p, q) = (reached[0].0, reached[1].0);

    Ok(AnchorLink {
        node,
        lower: p.min(q),
        upper: p.max(q),
    })
}

/// `offset_q = value_p(node) − value_q(node) + offset_p` along each link,
/// starting from `offset_0 = 0`.
fn propagate_offsets(surfaces: &[LocalSurface], links: &[AnchorLink]) -> Result<Vec<f64>> {
    let mut offsets: Vec<Option<f64>> = vec![None; surfaces.len()];
    offsets[0] = Some(0.0);
    let mut queue = VecDeque::from([0usize]);

    while let Some(p) = queue.pop_front() {
        let offset_p = offsets[p].unwrap_or(0.0);
        for link in links {
            let q = if link.lower == p {
                link.upper
            } else if link.upper == p {
                link.lower
            } else {
                continue;
            };
            if offsets[q].is_some() {
                continue;
            }
            let value_p = surfaces[p].values()[link.node];
            let value_q = surfaces[q].values()[link.node];
            offsets[q] = Some(value_p - value_q + offset_p);
            queue.push_back(q);
        }
    }

    offsets
        .into_iter()
        .enumerate()
        .map(|(k, offset)| {
            offset.ok_or_else(|| {
                QpotError::alignment(format!(
                    "Local surface {k} is not connected to the first surface by any anchor."
                ))
            })
        })
        .collect()
}

fn combine(grid: &Grid, surfaces: &[LocalSurface], offsets: &[f64]) -> Vec<f64> {
    (0..grid.node_count())
        .map(|node| {
            surfaces
                .iter()
                .zip(offsets)
                .map(|(surface, offset)| surface.values()[node] + offset)
                .filter(|value| value.is_finite())
                .fold(f64::INFINITY, f64::min)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{stitch_surfaces, GlobalSettings};
    use crate::error::QpotError;
    use crate::grid::Grid;
    use crate::local::NodeStatus;
    use crate::surface::{LocalSurface, QuasiPotentialSurface};

    fn grid() -> Grid {
        Grid::new((0.0, 4.0), (0.0, 1.0), 4, 1).unwrap()
    }

    fn surface(grid: &Grid, seed: (f64, f64), values: Vec<f64>) -> LocalSurface {
        let status = values
            .iter()
            .map(|v| {
                if v.is_finite() {
                    NodeStatus::Accepted
                } else {
                    NodeStatus::Far
                }
            })
            .collect();
        LocalSurface {
            grid: grid.clone(),
            seed,
            seed_node: grid.nearest_node(seed.0, seed.1).unwrap(),
            values,
            status,
            accepted_order: Vec::new(),
            linearization: None,
        }
    }

    // Row-major over 5 columns, two identical rows.
    fn row(values: [f64; 5]) -> Vec<f64> {
        values.iter().chain(values.iter()).copied().collect()
    }

    #[test]
    fn single_surface_passes_through() {
        let g = grid();
        let a = surface(&g, (0.0, 0.0), row([0.0, 1.0, 2.0, 3.0, 4.0]));
        let global = stitch_surfaces(&[a.clone()], &[], GlobalSettings::default()).unwrap();
        assert_eq!(global.offsets(), &[0.0]);
        assert_eq!(global.values(), a.values());
    }

    #[test]
    fn two_basins_agree_at_the_saddle() {
        let g = grid();
        let a = surface(&g, (0.0, 0.0), row([0.0, 0.5, 1.0, 1.5, 2.0]));
        let b = surface(&g, (4.0, 0.0), row([1.2, 0.9, 0.6, 0.3, 0.0]));
        let settings = GlobalSettings {
            normalize_minimum: false,
        };
        let global = stitch_surfaces(&[a.clone(), b.clone()], &[(2.0, 0.0)], settings).unwrap();
        assert_eq!(global.offsets()[0], 0.0);
        assert!((global.offsets()[1] - 0.4).abs() < 1e-12);

        let saddle = g.index(2, 0);
        let a_shifted = a.values()[saddle] + global.offsets()[0];
        let b_shifted = b.values()[saddle] + global.offsets()[1];
        assert!((a_shifted - b_shifted).abs() < 1e-12);

        for node in 0..g.node_count() {
            let expected = (a.values()[node] + global.offsets()[0])
                .min(b.values()[node] + global.offsets()[1]);
            assert_eq!(global.values()[node], expected);
        }
    }

    #[test]
    fn normalization_makes_the_deepest_basin_zero() {
        let g = grid();
        let a = surface(&g, (0.0, 0.0), row([0.0, 0.2, 0.4, 0.6, 0.8]));
        let b = surface(&g, (4.0, 0.0), row([2.0, 1.5, 1.0, 0.5, 0.0]));
        let global = stitch_surfaces(&[a, b], &[(2.0, 0.0)], GlobalSettings::default()).unwrap();
        // Offset of b before normalization: 0.4 - 1.0 = -0.6.
        assert_eq!(global.min_value(), Some(0.0));
        assert!((global.offsets()[0] - 0.6).abs() < 1e-12);
        assert!((global.offsets()[1]).abs() < 1e-12);
    }

    #[test]
    fn stitching_is_independent_of_surface_order() {
        let g = Grid::new((0.0, 6.0), (0.0, 1.0), 6, 1).unwrap();
        let a = surface(&g, (0.0, 0.0), {
            let r = [0.0, 0.3, 0.6, 1.1, 1.7, 2.4, 3.2];
            r.iter().chain(r.iter()).copied().collect()
        });
        let b = surface(&g, (3.0, 0.0), {
            let r = [1.4, 0.8, 0.3, 0.0, 0.3, 0.7, 1.3];
            r.iter().chain(r.iter()).copied().collect()
        });
        let c = surface(&g, (6.0, 0.0), {
            let r = [2.9, 2.2, 1.6, 1.0, 0.5, 0.2, 0.0];
            r.iter().chain(r.iter()).copied().collect()
        });
        let anchors = [(1.6, 0.0), (4.4, 0.0)];
        let settings = GlobalSettings::default();

        let abc = stitch_surfaces(&[a.clone(), b.clone(), c.clone()], &anchors, settings).unwrap();
        let cab = stitch_surfaces(&[c.clone(), a.clone(), b.clone()], &anchors, settings).unwrap();
        let reversed = [anchors[1], anchors[0]];
        let bca = stitch_surfaces(&[b, c, a], &reversed, settings).unwrap();
        for node in 0..g.node_count() {
            assert!((abc.values()[node] - cab.values()[node]).abs() < 1e-12);
            assert!((abc.values()[node] - bca.values()[node]).abs() < 1e-12);
        }
    }

    #[test]
    fn unreached_anchor_is_an_alignment_error() {
        let g = grid();
        let a = surface(&g, (0.0, 0.0), row([0.0, 0.5, 1.0, f64::INFINITY, f64::INFINITY]));
        let b = surface(&g, (4.0, 0.0), row([f64::INFINITY, f64::INFINITY, 0.6, 0.3, 0.0]));
        let err = stitch_surfaces(&[a.clone(), b.clone()], &[(3.0, 0.0)], GlobalSettings::default())
            .expect_err("anchor reached by one surface");
        assert!(matches!(err, QpotError::Alignment(_)));

        let err = stitch_surfaces(&[a.clone(), b.clone()], &[(7.0, 0.0)], GlobalSettings::default())
            .expect_err("anchor outside the grid");
        assert!(matches!(err, QpotError::Alignment(_)));

        let err = stitch_surfaces(&[a, b], &[], GlobalSettings::default())
            .expect_err("no anchor links the surfaces");
        assert!(matches!(err, QpotError::Alignment(_)));
    }

    #[test]
    fn unreached_nodes_stay_infinite() {
        let g = grid();
        let a = surface(&g, (0.0, 0.0), row([0.0, 0.5, 1.0, f64::INFINITY, f64::INFINITY]));
        let b = surface(&g, (2.0, 0.0), row([f64::INFINITY, 0.4, 0.0, 0.4, f64::INFINITY]));
        let global = stitch_surfaces(&[a, b], &[(1.0, 0.0)], GlobalSettings::default()).unwrap();
        assert_eq!(global.value(4, 0), f64::INFINITY);
        assert!(global.is_reached(3, 0));
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let g = grid();
        let other = Grid::new((0.0, 4.0), (0.0, 1.0), 2, 1).unwrap();
        let a = surface(&g, (0.0, 0.0), row([0.0, 0.5, 1.0, 1.5, 2.0]));
        let b = surface(&other, (4.0, 0.0), vec![1.0, 0.5, 0.0, 1.0, 0.5, 0.0]);
        let err = stitch_surfaces(&[a, b], &[(2.0, 0.0)], GlobalSettings::default())
            .expect_err("grids differ");
        assert!(matches!(err, QpotError::ShapeMismatch(_)));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            stitch_surfaces(&[], &[], GlobalSettings::default()),
            Err(QpotError::Alignment(_))
        ));
    }
}
