//! Local quasi-potential by ordered upwind marching.
//!
//! Starting from a stable equilibrium, nodes are accepted in increasing order
//! of tentative action. Each newly accepted node relaxes every unaccepted node
//! within the update radius with a one-point update and with triangle updates
//! built from the accepted node and its accepted 8-neighbours.

pub mod linearization;

mod frontier;
mod update;

use crate::error::{QpotError, Result};
use crate::field::VectorField;
use crate::grid::{Grid, NEIGHBOR_OFFSETS};
use crate::surface::LocalSurface;
use crate::traits::DriftField;
use frontier::Frontier;
use linearization::SeedLinearization;
use serde::{Deserialize, Serialize};
use update::{one_point_update, triangle_update, UpdateSource, UpdateTarget};

/// Lifecycle of a node during one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Not reached yet.
    Far,
    /// Holds a tentative value and sits in the frontier.
    Considered,
    /// Final value fixed.
    Accepted,
}

/// What happens when the march reaches the edge of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Keep marching until every reachable node is accepted.
    Continue,
    /// Stop as soon as a boundary node is accepted; the rest stays unreached.
    StopAtBoundary,
}

/// Settings for the local solver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocalSolverSettings {
    /// Update radius in cells. `1` restricts updates to the 8-neighbourhood,
    /// which only offers eight directions and does not converge under
    /// refinement for rotational drifts; use at least `3` there.
    pub update_radius: usize,
    /// Initialise the seed's neighbours from the linearized drift.
    pub linearized_start: bool,
    pub boundary: BoundaryPolicy,
    /// Stop once the smallest tentative value exceeds this cap.
    pub value_cap: Option<f64>,
    /// Width of the bracket at which the mixing-parameter search stops.
    pub minimizer_tolerance: f64,
    pub minimizer_max_iterations: usize,
}

impl Default for LocalSolverSettings {
    fn default() -> Self {
        Self {
            update_radius: 4,
            linearized_start: true,
            boundary: BoundaryPolicy::Continue,
            value_cap: None,
            minimizer_tolerance: 1e-8,
            minimizer_max_iterations: 64,
        }
    }
}

impl LocalSolverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.update_radius == 0 {
            return Err(QpotError::domain("update_radius must be at least 1."));
        }
        if let Some(cap) = self.value_cap {
            if cap.is_nan() || cap < 0.0 {
                return Err(QpotError::domain("value_cap must be non-negative."));
            }
        }
        if !(self.minimizer_tolerance > 0.0 && self.minimizer_tolerance < 1.0) {
            return Err(QpotError::domain("minimizer_tolerance must lie in (0, 1)."));
        }
        if self.minimizer_max_iterations == 0 {
            return Err(QpotError::domain(
                "minimizer_max_iterations must be greater than zero.",
            ));
        }
        Ok(())
    }
}

/// Computes the quasi-potential on `grid` anchored at the stable equilibrium
/// `seed`.
///
/// The seed is snapped to its nearest node, which gets the value `0`. Nodes
/// the march does not accept are reported as `+∞`.
pub fn solve_local_surface(
    grid: &Grid,
    drift: &(impl DriftField + ?Sized),
    seed: (f64, f64),
    settings: LocalSolverSettings,
) -> Result<LocalSurface> {
    settings.validate()?;
    let seed_node = grid.nearest_node(seed.0, seed.1)?;
    let node_drift = VectorField::sample(grid, drift)?;

    let linearization = if settings.linearized_start {
        match SeedLinearization::at(drift, seed.0, seed.1) {
            Ok(lin) => Some(lin),
            Err(err) => {
                tracing::warn!(
                    seed_x = seed.0,
                    seed_y = seed.1,
                    error = %err,
                    "Seed linearization unavailable; starting from the seed node only"
                );
                None
            }
        }
    } else {
        None
    };

    tracing::debug!(
        nx = grid.nx(),
        ny = grid.ny(),
        seed_x = seed.0,
        seed_y = seed.1,
        seed_i = seed_node.0,
        seed_j = seed_node.1,
        update_radius = settings.update_radius,
        "Starting local quasi-potential solve"
    );

    let mut marcher = Marcher::new(grid, &node_drift, settings);
    marcher.initialize(seed_node, linearization.as_ref());
    marcher.run()?;

    tracing::debug!(
        accepted = marcher.accepted_order.len(),
        nodes = grid.node_count(),
        "Finished local quasi-potential solve"
    );

    Ok(marcher.into_surface(seed, seed_node, linearization))
}

/// Solves one local surface per seed. Seeds are independent, so each runs on
/// its own scoped thread. Results keep the order of `seeds`.
pub fn solve_local_surfaces(
    grid: &Grid,
    drift: &(impl DriftField + ?Sized),
    seeds: &[(f64, f64)],
    settings: LocalSolverSettings,
) -> Result<Vec<LocalSurface>> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = seeds
            .iter()
            .map(|&seed| scope.spawn(move || solve_local_surface(grid, drift, seed, settings)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}

/// Per-solve marching state. Owned by one call and discarded with it.
struct Marcher<'a> {
    grid: &'a Grid,
    drift: &'a VectorField,
    settings: LocalSolverSettings,
    values: Vec<f64>,
    status: Vec<NodeStatus>,
    frontier: Frontier,
    accepted_order: Vec<usize>,
    stencil: Vec<(isize, isize)>,
}

impl<'a> Marcher<'a> {
    fn new(grid: &'a Grid, drift: &'a VectorField, settings: LocalSolverSettings) -> Self {
        let count = grid.node_count();
        Self {
            grid,
            drift,
            settings,
            values: vec![f64::INFINITY; count],
            status: vec![NodeStatus::Far; count],
            frontier: Frontier::with_capacity(count),
            accepted_order: Vec::with_capacity(count),
            stencil: radius_stencil(settings.update_radius),
        }
    }

    fn initialize(&mut self, seed_node: (usize, usize), linearization: Option<&SeedLinearization>) {
        let seed_index = self.grid.index(seed_node.0, seed_node.1);
        self.values[seed_index] = 0.0;
        self.status[seed_index] = NodeStatus::Considered;
        self.frontier.push(seed_index, 0.0);

        let Some(lin) = linearization else {
            return;
        };
        let (sx, sy) = self.grid.coordinate(seed_node.0, seed_node.1);
        let neighbors: Vec<(usize, usize)> =
            self.grid.neighbors(seed_node.0, seed_node.1).collect();
        for (i, j) in neighbors {
            let (x, y) = self.grid.coordinate(i, j);
            let value = lin.quadratic_potential(x - sx, y - sy);
            if value.is_finite() {
                let index = self.grid.index(i, j);
                self.offer(index, value);
            }
        }
    }

    fn run(&mut self) -> Result<()> {
        while let Some((index, value)) = self.frontier.pop() {
            if self.status[index] == NodeStatus::Accepted || value > self.values[index] {
                continue;
            }
            if let Some(cap) = self.settings.value_cap {
                if value > cap {
                    tracing::debug!(value, cap, "Frontier exceeded value cap");
                    break;
                }
            }
            if !value.is_finite() || value < 0.0 {
                let (x, y) = self.grid.coordinate_of_index(index);
                return Err(QpotError::numerical(format!(
                    "Accepted value {value} at ({x}, {y}) is not a valid action."
                )));
            }

            self.status[index] = NodeStatus::Accepted;
            self.accepted_order.push(index);

            let (i, j) = self.grid.node(index);
            if self.settings.boundary == BoundaryPolicy::StopAtBoundary
                && self.grid.is_boundary(i, j)
            {
                tracing::debug!(i, j, "March reached the boundary");
                break;
            }

            self.relax_around(index)?;
        }
        Ok(())
    }

    fn relax_around(&mut self, accepted: usize) -> Result<()> {
        let (ai, aj) = self.grid.node(accepted);
        let source = self.source(accepted);

        let partners: Vec<UpdateSource> = NEIGHBOR_OFFSETS
            .iter()
            .filter_map(|&(di, dj)| self.grid.offset(ai, aj, di, dj))
            .map(|(i, j)| self.grid.index(i, j))
            .filter(|&n| self.status[n] == NodeStatus::Accepted)
            .map(|n| self.source(n))
            .collect();

        for k in 0..self.stencil.len() {
            let (di, dj) = self.stencil[k];
            let Some((ti, tj)) = self.grid.offset(ai, aj, di, dj) else {
                continue;
            };
            let target_index = self.grid.index(ti, tj);
            if self.status[target_index] == NodeStatus::Accepted {
                continue;
            }
            let target = UpdateTarget {
                point: self.grid.coordinate(ti, tj),
                drift: self.drift.get_index(target_index),
            };

            let mut candidate = one_point_update(&source, &target);
            for partner in &partners {
                let update = triangle_update(
                    &source,
                    partner,
                    &target,
                    self.settings.minimizer_tolerance,
                    self.settings.minimizer_max_iterations,
                );
                // Must not undercut either accepted value it is built from.
                let floor = source.value.max(partner.value);
                if update.value < floor {
                    tracing::trace!(
                        ti,
                        tj,
                        value = update.value,
                        floor,
                        "Discarding non-causal triangle update"
                    );
                    continue;
                }
                if update.value < candidate {
                    candidate = update.value;
                }
            }

            if candidate.is_nan() {
                return Err(QpotError::numerical(format!(
                    "Update at ({}, {}) produced NaN.",
                    target.point.0, target.point.1
                )));
            }
            self.offer(target_index, candidate);
        }
        Ok(())
    }

    fn source(&self, index: usize) -> UpdateSource {
        UpdateSource {
            value: self.values[index],
            point: self.grid.coordinate_of_index(index),
            drift: self.drift.get_index(index),
        }
    }

    /// Records `value` for `index` if it strictly improves the tentative
    /// value.
    fn offer(&mut self, index: usize, value: f64) {
        if self.status[index] == NodeStatus::Accepted || value >= self.values[index] {
            return;
        }
        self.values[index] = value;
        self.status[index] = NodeStatus::Considered;
        self.frontier.push(index, value);
    }

    fn into_surface(
        self,
        seed: (f64, f64),
        seed_node: (usize, usize),
        linearization: Option<SeedLinearization>,
    ) -> LocalSurface {
        let mut values = self.values;
        for (value, status) in values.iter_mut().zip(&self.status) {
            if *status != NodeStatus::Accepted {
                *value = f64::INFINITY;
            }
        }
        if !self.frontier.is_empty() {
            tracing::debug!(
                pending = self.frontier.len(),
                "March stopped with a non-empty frontier"
            );
        }
        LocalSurface {
            grid: self.grid.clone(),
            values,
            seed,
            seed_node,
            status: self.status,
            accepted_order: self.accepted_order,
            linearization,
        }
    }
}

/// Index offsets within `radius` cells, nearest first.
fn radius_stencil(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    // Radius one still includes the diagonals.
    let limit = (r * r).max(2);
    let mut stencil: Vec<(isize, isize)> = (-r..=r)
        .flat_map(|di| (-r..=r).map(move |dj| (di, dj)))
        .filter(|&(di, dj)| (di, dj) != (0, 0) && di * di + dj * dj <= limit)
        .collect();
    stencil.sort_by_key(|&(di, dj)| (di * di + dj * dj, di, dj));
    stencil
}
