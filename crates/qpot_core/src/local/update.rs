//! Local update stencils of the ordered upwind scheme.
//!
//! The action of a straight segment `p → x` is approximated with the midpoint
//! rule of the geometric action,
//! `S(p → x) = ½ (|b_m| |x - p| − b_m · (x - p))`, where `b_m` is the drift
//! at the midpoint, linearly interpolated from the drifts at the endpoints.
//! `S ≥ 0` by Cauchy–Schwarz, which makes every candidate at least as large as
//! the accepted values it is built from.

type Point = (f64, f64);

/// Endpoint of an update: an accepted node with its value and drift.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateSource {
    pub value: f64,
    pub point: Point,
    pub drift: Point,
}

/// Target of an update: the node being relaxed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateTarget {
    pub point: Point,
    pub drift: Point,
}

/// Result of a triangle update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TriangleUpdate {
    pub value: f64,
    /// Mixing parameter; `0` is the first source, `1` the second.
    pub s: f64,
}

pub(crate) fn segment_action(from: Point, to: Point, midpoint_drift: Point) -> f64 {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let (bx, by) = midpoint_drift;
    let action = 0.5 * (bx.hypot(by) * dx.hypot(dy) - (bx * dx + by * dy));
    // Round-off can leave a tiny negative value for segments aligned with b.
    action.max(0.0)
}

/// Value at `target` reached by a straight segment from one accepted node.
pub(crate) fn one_point_update(source: &UpdateSource, target: &UpdateTarget) -> f64 {
    let midpoint_drift = (
        0.5 * (source.drift.0 + target.drift.0),
        0.5 * (source.drift.1 + target.drift.1),
    );
    source.value + segment_action(source.point, target.point, midpoint_drift)
}

/// Minimises over `s ∈ [0, 1]` the value reached from the point
/// `a + s (a1 - a)` on the segment between two accepted nodes, with the value
/// there interpolated linearly.
///
/// Golden-section search on the interior, compared against both endpoints.
pub(crate) fn triangle_update(
    a: &UpdateSource,
    a1: &UpdateSource,
    target: &UpdateTarget,
    tolerance: f64,
    max_iterations: usize,
) -> TriangleUpdate {
    let objective = |s: f64| -> f64 {
        let point = (
            a.point.0 + s * (a1.point.0 - a.point.0),
            a.point.1 + s * (a1.point.1 - a.point.1),
        );
        let drift = (
            a.drift.0 + s * (a1.drift.0 - a.drift.0),
            a.drift.1 + s * (a1.drift.1 - a.drift.1),
        );
        let midpoint_drift = (0.5 * (drift.0 + target.drift.0), 0.5 * (drift.1 + target.drift.1));
        (1.0 - s) * a.value + s * a1.value + segment_action(point, target.point, midpoint_drift)
    };

    let inv_phi = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    let mut c = hi - inv_phi * (hi - lo);
    let mut d = lo + inv_phi * (hi - lo);
    let mut fc = objective(c);
    let mut fd = objective(d);

    for _ in 0..max_iterations {
        if hi - lo <= tolerance {
            break;
        }
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - inv_phi * (hi - lo);
            fc = objective(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + inv_phi * (hi - lo);
            fd = objective(d);
        }
    }

    let mut best = if fc < fd {
        TriangleUpdate { value: fc, s: c }
    } else {
        TriangleUpdate { value: fd, s: d }
    };
    for s in [0.0, 1.0] {
        let value = objective(s);
        if value < best.value {
            best = TriangleUpdate { value, s };
        }
    }
    best
}
