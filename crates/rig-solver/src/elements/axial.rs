//! Axial members: bars, regularised tension-only cables, cable paths over a
//! spreader tip, and constant-force ties.
//!
//! The cable constitutive law is the smooth regularisation
//!
//! ```text
//! r      = sqrt(dl^2 + delta^2)
//! s      = (1 + dl/r) / 2
//! k_eff  = k * (eps + (1 - eps) * s)
//! N      = k_eff * dl
//! dN/ddl = k_eff + dl * k * (1 - eps) * (delta^2 / (2 r^3))
//! U      = k/4 * (1+eps) * dl^2 + k/4 * (1-eps) * (dl*r - delta^2 * asinh(dl/delta))
//! ```
//!
//! which is C1 at `dl = 0` for any `eps` in [0, 1] and any `delta > 0`, so
//! slack/taut transitions never branch.

use nalgebra::Vector3;

use crate::assembly::SystemAccumulator;
use crate::elements::axial_tangent_block;

/// Evaluated axial response, used for meta bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct AxialForce {
    pub force: f64,
    pub slack: bool,
}

/// Smooth tension-only constitutive law.
#[derive(Debug, Clone, Copy)]
pub struct CableLaw {
    /// Axial stiffness EA / L0.
    pub k: f64,
    /// Residual compressive stiffness fraction in [0, 1].
    pub eps: f64,
    /// Smoothing width of the slack/taut transition.
    pub delta: f64,
}

/// Force, exact tangent and stored energy at an elongation.
#[derive(Debug, Clone, Copy)]
pub struct LawResponse {
    pub force: f64,
    pub stiffness: f64,
    pub energy: f64,
}

impl CableLaw {
    pub fn new(k: f64, eps: f64, delta: f64) -> Self {
        Self {
            k,
            eps: eps.clamp(0.0, 1.0),
            delta: delta.max(1e-9),
        }
    }

    pub fn respond(&self, dl: f64) -> LawResponse {
        let (k, eps, delta) = (self.k, self.eps, self.delta);
        let r = (dl * dl + delta * delta).sqrt();
        let s = 0.5 * (1.0 + dl / r);
        let k_eff = k * (eps + (1.0 - eps) * s);
        let force = k_eff * dl;
        let stiffness = k_eff + dl * k * (1.0 - eps) * (0.5 * delta * delta / (r * r * r));
        let energy = 0.25 * k * (1.0 + eps) * dl * dl
            + 0.25 * k * (1.0 - eps) * (dl * r - delta * delta * (dl / delta).asinh());
        LawResponse {
            force,
            stiffness,
            energy,
        }
    }
}

/// Linear two-force bar.
#[derive(Debug, Clone)]
pub struct Bar {
    pub name: String,
    pub i: usize,
    pub j: usize,
    pub ea: f64,
    pub l0: f64,
}

impl Bar {
    pub fn accumulate(&self, pos: &[Vector3<f64>], acc: &mut SystemAccumulator) -> AxialForce {
        let d = pos[self.j] - pos[self.i];
        let length = d.norm();
        if length < 1e-12 {
            return AxialForce {
                force: 0.0,
                slack: false,
            };
        }
        let n_unit = d / length;
        let dl = length - self.l0;
        let k = self.ea / self.l0;
        let force = k * dl;

        acc.add_energy(0.5 * k * dl * dl);
        acc.add_gradient(self.i, -n_unit * force);
        acc.add_gradient(self.j, n_unit * force);
        if acc.wants_tangent() {
            let block = axial_tangent_block(&n_unit, length, force, k, true);
            acc.add_tangent_block(self.i, self.i, &block);
            acc.add_tangent_block(self.j, self.j, &block);
            acc.add_tangent_block(self.i, self.j, &(-block));
            acc.add_tangent_block(self.j, self.i, &(-block));
        }
        AxialForce {
            force,
            slack: false,
        }
    }
}

/// Tension-only cable with the smooth regularised law.
#[derive(Debug, Clone)]
pub struct Cable {
    pub name: String,
    pub i: usize,
    pub j: usize,
    pub ea: f64,
    pub l0: f64,
    pub compression_eps: f64,
    pub smooth_delta: f64,
}

impl Cable {
    fn law(&self) -> CableLaw {
        CableLaw::new(self.ea / self.l0, self.compression_eps, self.smooth_delta)
    }

    pub fn accumulate(&self, pos: &[Vector3<f64>], acc: &mut SystemAccumulator) -> AxialForce {
        let d = pos[self.j] - pos[self.i];
        let length = d.norm();
        if length < 1e-12 {
            return AxialForce {
                force: 0.0,
                slack: true,
            };
        }
        let n_unit = d / length;
        let dl = length - self.l0;
        let resp = self.law().respond(dl);

        acc.add_energy(resp.energy);
        acc.add_gradient(self.i, -n_unit * resp.force);
        acc.add_gradient(self.j, n_unit * resp.force);
        if acc.wants_tangent() {
            let block = axial_tangent_block(&n_unit, length, resp.force, resp.stiffness, true);
            acc.add_tangent_block(self.i, self.i, &block);
            acc.add_tangent_block(self.j, self.j, &block);
            acc.add_tangent_block(self.i, self.j, &(-block));
            acc.add_tangent_block(self.j, self.i, &(-block));
        }
        AxialForce {
            force: resp.force,
            slack: dl < 0.0,
        }
    }
}

/// Shroud running continuously from the attachment over the spreader tip to
/// the chainplate. One elongation over the whole path; the tip can slide.
#[derive(Debug, Clone)]
pub struct CablePath {
    pub name: String,
    /// Upper attachment on the mast.
    pub i: usize,
    /// Spreader tip (midpoint).
    pub k: usize,
    /// Chainplate.
    pub j: usize,
    pub ea: f64,
    pub l0: f64,
    pub compression_eps: f64,
    pub smooth_delta: f64,
}

impl CablePath {
    pub fn accumulate(&self, pos: &[Vector3<f64>], acc: &mut SystemAccumulator) -> AxialForce {
        let d1 = pos[self.k] - pos[self.i];
        let d2 = pos[self.j] - pos[self.k];
        let (l1, l2) = (d1.norm(), d2.norm());
        if l1 < 1e-12 || l2 < 1e-12 {
            return AxialForce {
                force: 0.0,
                slack: true,
            };
        }
        let n1 = d1 / l1;
        let n2 = d2 / l2;
        let dl = l1 + l2 - self.l0;
        let law = CableLaw::new(self.ea / self.l0, self.compression_eps, self.smooth_delta);
        let resp = law.respond(dl);
        let n_force = resp.force;

        acc.add_energy(resp.energy);
        acc.add_gradient(self.i, -n1 * n_force);
        acc.add_gradient(self.k, (n1 - n2) * n_force);
        acc.add_gradient(self.j, n2 * n_force);

        if acc.wants_tangent() {
            // Material coupling over the full path.
            let taut = dl > 0.0;
            let gi = -n1;
            let gk = n1 - n2;
            let gj = n2;
            let grads = [(self.i, gi), (self.k, gk), (self.j, gj)];
            for &(na, ga) in &grads {
                for &(nb, gb) in &grads {
                    let block = (ga * gb.transpose()) * resp.stiffness;
                    acc.add_tangent_block(na, nb, &block);
                }
            }
            // Geometric stiffness per segment, only when the path is taut.
            if taut {
                let g1 = axial_tangent_block(&n1, l1, n_force, 0.0, true);
                acc.add_tangent_block(self.i, self.i, &g1);
                acc.add_tangent_block(self.k, self.k, &g1);
                acc.add_tangent_block(self.i, self.k, &(-g1));
                acc.add_tangent_block(self.k, self.i, &(-g1));

                let g2 = axial_tangent_block(&n2, l2, n_force, 0.0, true);
                acc.add_tangent_block(self.k, self.k, &g2);
                acc.add_tangent_block(self.j, self.j, &g2);
                acc.add_tangent_block(self.k, self.j, &(-g2));
                acc.add_tangent_block(self.j, self.k, &(-g2));
            }
        }
        AxialForce {
            force: n_force,
            slack: dl < 0.0,
        }
    }

    /// Undeformed path length through the tip.
    pub fn path_length(p_i: &Vector3<f64>, p_k: &Vector3<f64>, p_j: &Vector3<f64>) -> f64 {
        (p_k - p_i).norm() + (p_j - p_k).norm()
    }
}

/// Constant axial force between two nodes: potential `N * |p_j - p_i|`.
#[derive(Debug, Clone)]
pub struct TensionTie {
    pub name: String,
    pub i: usize,
    pub j: usize,
    pub force: f64,
}

impl TensionTie {
    pub fn accumulate(&self, pos: &[Vector3<f64>], acc: &mut SystemAccumulator) -> AxialForce {
        let d = pos[self.j] - pos[self.i];
        let length = d.norm();
        if length < 1e-12 {
            return AxialForce {
                force: self.force,
                slack: false,
            };
        }
        let n_unit = d / length;

        acc.add_energy(self.force * length);
        acc.add_gradient(self.i, -n_unit * self.force);
        acc.add_gradient(self.j, n_unit * self.force);
        if acc.wants_tangent() {
            let block = axial_tangent_block(&n_unit, length, self.force, 0.0, true);
            acc.add_tangent_block(self.i, self.i, &block);
            acc.add_tangent_block(self.j, self.j, &block);
            acc.add_tangent_block(self.i, self.j, &(-block));
            acc.add_tangent_block(self.j, self.i, &(-block));
        }
        AxialForce {
            force: self.force,
            slack: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn law_is_continuous_at_zero_elongation() {
        for &eps in &[0.0, 1e-4, 0.05, 1.0] {
            let law = CableLaw::new(1e5, eps, 1e-4);
            let a = law.respond(-1e-9);
            let b = law.respond(1e-9);
            assert!((a.force - b.force).abs() < 1e-3, "eps={eps}");
            assert!((a.stiffness - b.stiffness).abs() < 1.0, "eps={eps}");
            assert!((a.energy - b.energy).abs() < 1e-9, "eps={eps}");
        }
    }

    #[test]
    fn law_tangent_matches_finite_difference() {
        let law = CableLaw::new(2e5, 1e-3, 1e-4);
        for &dl in &[-0.01, -1e-5, 0.0, 1e-5, 0.004] {
            let h = 1e-8;
            let fd = (law.respond(dl + h).force - law.respond(dl - h).force) / (2.0 * h);
            let an = law.respond(dl).stiffness;
            let scale = an.abs().max(1.0);
            assert!(
                (fd - an).abs() / scale < 1e-4,
                "dl={dl}: fd={fd:.6e} analytic={an:.6e}"
            );
        }
    }

    #[test]
    fn law_energy_derivative_is_force() {
        let law = CableLaw::new(3e5, 0.01, 1e-4);
        for &dl in &[-0.02, -1e-4, 1e-4, 0.01] {
            let h = 1e-7;
            let fd = (law.respond(dl + h).energy - law.respond(dl - h).energy) / (2.0 * h);
            let force = law.respond(dl).force;
            assert!(
                (fd - force).abs() < 1e-2 * force.abs().max(1.0),
                "dl={dl}: dU/ddl={fd:.6e} N={force:.6e}"
            );
        }
    }

    #[test]
    fn slack_cable_carries_almost_nothing() {
        let law = CableLaw::new(1e6, 1e-4, 1e-4);
        let resp = law.respond(-0.01);
        // Residual compressive force is eps * k * dl at most.
        assert!(resp.force.abs() < 1e-4 * 1e6 * 0.01 * 2.0);
        let taut = law.respond(0.01);
        assert!((taut.force - 1e6 * 0.01).abs() / (1e6 * 0.01) < 1e-2);
    }

    #[test]
    fn path_length_is_sum_of_segments() {
        let a = Vector3::new(0.0, 0.0, 4.0);
        let k = Vector3::new(0.5, 0.0, 2.5);
        let b = Vector3::new(0.7, 0.0, 0.0);
        let l = CablePath::path_length(&a, &k, &b);
        assert!((l - ((k - a).norm() + (b - k).norm())).abs() < 1e-14);
    }
}
