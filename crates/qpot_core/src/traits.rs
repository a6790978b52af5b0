/// The deterministic skeleton `b(x, y) = (fx, fy)` of a planar SDE.
///
/// Implementations must be pure: the same point always yields the same
/// vector. `Sync` lets independent solves share one field across threads.
pub trait DriftField: Sync {
    /// Evaluates the drift at `(x, y)`.
    fn drift(&self, x: f64, y: f64) -> (f64, f64);

    /// Jacobian `[[∂fx/∂x, ∂fx/∂y], [∂fy/∂x, ∂fy/∂y]]` at `(x, y)`.
    ///
    /// The default uses central differences with a step scaled to the
    /// magnitude of the point.
    fn jacobian(&self, x: f64, y: f64) -> [[f64; 2]; 2] {
        let step_x = 1e-6 * (1.0 + x.abs());
        let step_y = 1e-6 * (1.0 + y.abs());
        let (fx_xp, fy_xp) = self.drift(x + step_x, y);
        let (fx_xm, fy_xm) = self.drift(x - step_x, y);
        let (fx_yp, fy_yp) = self.drift(x, y + step_y);
        let (fx_ym, fy_ym) = self.drift(x, y - step_y);
        [
            [
                (fx_xp - fx_xm) / (2.0 * step_x),
                (fx_yp - fx_ym) / (2.0 * step_y),
            ],
            [
                (fy_xp - fy_xm) / (2.0 * step_x),
                (fy_yp - fy_ym) / (2.0 * step_y),
            ],
        ]
    }
}

impl<F> DriftField for F
where
    F: Fn(f64, f64) -> (f64, f64) + Sync + ?Sized,
{
    fn drift(&self, x: f64, y: f64) -> (f64, f64) {
        self(x, y)
    }
}
