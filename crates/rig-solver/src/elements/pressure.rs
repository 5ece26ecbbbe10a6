//! Follower pressure on the membrane surface.
//!
//! Each triangle receives `p * area / 3` per node along its *current* unit
//! normal; with `c = (p1 - p0) x (p2 - p0)` that is `(p/6) c` per node. The
//! tangent captures the change of `c` with position through skew blocks of
//! the triangle edges, which is what keeps Newton quadratic at moderate
//! pressures.

use nalgebra::Vector3;

use crate::assembly::SystemAccumulator;
use crate::elements::skew;

/// Signed effective pressure applied to every membrane triangle.
#[derive(Debug, Clone, Copy)]
pub struct FollowerPressure {
    pub pressure: f64,
}

impl FollowerPressure {
    /// Accumulate one triangle. Returns the nodal force (identical for all
    /// three nodes) for the equilibrium report.
    pub fn accumulate(
        &self,
        tri: [usize; 3],
        pos: &[Vector3<f64>],
        rest: &[Vector3<f64>],
        acc: &mut SystemAccumulator,
    ) -> Vector3<f64> {
        let [a, b, c] = tri;
        let (p0, p1, p2) = (pos[a], pos[b], pos[c]);
        let cvec = (p1 - p0).cross(&(p2 - p0));
        let nodal_force = cvec * (self.pressure / 6.0);

        // Work-style pseudo-potential so the line search sees the load;
        // the gradient and tangent below are the contractual quantities.
        let u_sum =
            (p0 - rest[a]) + (p1 - rest[b]) + (p2 - rest[c]);
        acc.add_energy(-(self.pressure / 6.0) * cvec.dot(&u_sum));

        for &n in &[a, b, c] {
            acc.add_gradient(n, -nodal_force);
        }

        if acc.wants_tangent() {
            let cols = [
                skew(&(p1 - p2)) * (self.pressure / 6.0),
                skew(&(p2 - p0)) * (self.pressure / 6.0),
                skew(&(p0 - p1)) * (self.pressure / 6.0),
            ];
            for &row in &[a, b, c] {
                for (k, &col) in [a, b, c].iter().enumerate() {
                    acc.add_tangent_block(row, col, &cols[k]);
                }
            }
        }
        nodal_force
    }
}
