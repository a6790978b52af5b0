use qpot_core::decompose::decompose_all;
use qpot_core::equation_engine::ExpressionDrift;
use qpot_core::global::{stitch_surfaces, GlobalSettings};
use qpot_core::grid::Grid;
use qpot_core::local::{solve_local_surface, solve_local_surfaces, LocalSolverSettings};
use qpot_core::surface::QuasiPotentialSurface;

const ECOLOGY_FX: &str = "1.54*x*(1.0-(x/10.14)) - (y*x*x)/(1.0+x*x)";
const ECOLOGY_FY: &str = "((0.476*x*x*y)/(1+x*x)) - 0.112590*y*y";
const ECOLOGY_SEEDS: [(f64, f64); 2] = [(1.40491, 2.80808), (4.9040, 4.06187)];
const ECOLOGY_SADDLE: (f64, f64) = (4.2008, 4.0039);

#[test]
fn linear_sink_on_a_coarse_grid() {
    let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), 4, 4).unwrap();
    let drift = ExpressionDrift::new("-x", "-y").unwrap();
    let surface =
        solve_local_surface(&grid, &drift, (0.0, 0.0), LocalSolverSettings::default()).unwrap();

    assert_eq!(surface.value(2, 2), 0.0);
    // Nodes half a unit away on both axes.
    assert!((surface.value(1, 1) - 0.25).abs() < 1e-6);
    assert!((surface.value(3, 3) - 0.25).abs() < 1e-6);
    assert!((surface.value(4, 4) - 1.0).abs() < 1e-6);

    let fields = decompose_all(&surface, &drift, &grid).unwrap();
    for i in 1..4 {
        for j in 1..4 {
            let (rx, ry) = fields.remainder.get(i, j);
            assert!(rx.hypot(ry) < 1e-6, "remainder at ({i}, {j}) is ({rx}, {ry})");
        }
    }
}

#[test]
fn remainder_of_a_solved_gradient_surface_shrinks_under_refinement() {
    let drift = |x: f64, y: f64| (-x, -2.0 * y);
    let mut means = Vec::new();
    for n in [10, 20, 40] {
        let grid = Grid::new((-1.0, 1.0), (-1.0, 1.0), n, n).unwrap();
        let surface =
            solve_local_surface(&grid, &drift, (0.0, 0.0), LocalSolverSettings::default())
                .unwrap();
        let fields = decompose_all(&surface, &drift, &grid).unwrap();
        let mut total = 0.0;
        let mut count = 0;
        for i in 1..n {
            for j in 1..n {
                let (rx, ry) = fields.remainder.get(i, j);
                total += rx.hypot(ry);
                count += 1;
            }
        }
        means.push(total / count as f64);
    }
    // Roughly 0.0026, 0.0019 and 0.0017 over the interior nodes.
    assert!(means.windows(2).all(|w| w[1] < w[0]), "means {means:?}");
    assert!(means.iter().all(|&m| m < 0.0035), "means {means:?}");
}

#[test]
fn gradient_drift_from_an_expression() {
    // b = -∇V for V = (x² - 1)² / 4 + y² / 2, a double well.
    let drift = ExpressionDrift::new("x - x^3", "-y").unwrap();
    let grid = Grid::new((0.0, 2.0), (-1.0, 1.0), 40, 40).unwrap();
    let surface =
        solve_local_surface(&grid, &drift, (1.0, 0.0), LocalSolverSettings::default()).unwrap();
    let potential = |x: f64, y: f64| (x * x - 1.0).powi(2) / 4.0 + y * y / 2.0;

    for (x, y) in [(1.5, 0.0), (1.0, 0.5), (0.5, -0.5), (1.5, 0.75)] {
        let value = surface.interpolate(x, y).unwrap();
        let exact = potential(x, y);
        assert!(
            (value - exact).abs() < 0.05 * (1.0 + exact),
            "U({x}, {y}) = {value}, expected {exact}"
        );
    }
}

#[test]
fn two_basin_ecology_stitches_at_the_saddle() {
    let drift = ExpressionDrift::new(ECOLOGY_FX, ECOLOGY_FY).unwrap();
    let grid = Grid::new((-0.5, 10.0), (-0.5, 10.0), 70, 70).unwrap();
    let settings = LocalSolverSettings {
        update_radius: 3,
        ..LocalSolverSettings::default()
    };

    let surfaces = solve_local_surfaces(&grid, &drift, &ECOLOGY_SEEDS, settings).unwrap();
    assert_eq!(surfaces.len(), 2);
    for surface in &surfaces {
        let (i, j) = surface.seed_node();
        assert_eq!(surface.value(i, j), 0.0);
        assert_eq!(surface.reached_count(), grid.node_count());
        assert!(surface.linearization().is_some());
    }

    let global =
        stitch_surfaces(&surfaces, &[ECOLOGY_SADDLE], GlobalSettings::default()).unwrap();
    let (i, j) = grid.nearest_node(ECOLOGY_SADDLE.0, ECOLOGY_SADDLE.1).unwrap();
    let shifted: Vec<f64> = surfaces
        .iter()
        .zip(global.offsets())
        .map(|(surface, offset)| surface.value(i, j) + offset)
        .collect();
    assert!((shifted[0] - shifted[1]).abs() < 1e-9, "{shifted:?}");
    assert!((global.value(i, j) - shifted[0]).abs() < 1e-9);

    assert_eq!(global.min_value(), Some(0.0));
    // The saddle sits above both basin bottoms.
    for &(x, y) in &ECOLOGY_SEEDS {
        assert!(global.value_at_nearest(x, y).unwrap() < global.value(i, j));
    }

    let fields = decompose_all(&global, &drift, &grid).unwrap();
    assert!(fields.deterministic.max_norm().is_finite());
    assert!(fields.remainder.max_norm() > 0.0);
}

#[test]
fn stitching_does_not_depend_on_seed_order() {
    let drift = ExpressionDrift::new(ECOLOGY_FX, ECOLOGY_FY).unwrap();
    let grid = Grid::new((-0.5, 10.0), (-0.5, 10.0), 42, 42).unwrap();
    let settings = LocalSolverSettings {
        update_radius: 2,
        ..LocalSolverSettings::default()
    };
    let forward = solve_local_surfaces(&grid, &drift, &ECOLOGY_SEEDS, settings).unwrap();
    let backward: Vec<_> = forward.iter().rev().cloned().collect();

    let a = stitch_surfaces(&forward, &[ECOLOGY_SADDLE], GlobalSettings::default()).unwrap();
    let b = stitch_surfaces(&backward, &[ECOLOGY_SADDLE], GlobalSettings::default()).unwrap();
    for (u, v) in a.values().iter().zip(b.values()) {
        assert!((u - v).abs() < 1e-9);
    }
}
