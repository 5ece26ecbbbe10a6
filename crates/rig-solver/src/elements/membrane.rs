//! Constant-strain membrane triangle with a Tension Field wrinkling model.
//!
//! Kinematics are corotational: the reference triangle defines a local 2D
//! frame and `D_m`; each evaluation rebuilds the local frame of the deformed
//! triangle, so `F = D_s * D_m^-1` is invariant under rigid rotations.
//! Strain is Green-Lagrange, stress is PK2 through a plane-stress isotropic
//! law plus an additive prestress, and wrinkling rescales the compressive
//! principal stress by `wrinkling_eps` (both principals when fully slack).
//!
//! The 9x9 tangent is the material block `B^T C B * t * A` (scaled by the
//! average principal wrinkling factor and rotated through the current frame)
//! plus the geometric block `(g_a^T S g_b) I3` built from the modified
//! stress.

use nalgebra::{Matrix2, Matrix3x2, Vector2, Vector3};

use crate::assembly::SystemAccumulator;
use crate::error::{Result, SolveError};

/// Membrane material and stabilisation parameters.
#[derive(Debug, Clone, Copy)]
pub struct MembraneMaterial {
    pub e: f64,
    pub nu: f64,
    pub thickness: f64,
    /// Isotropic prestress added to the PK2 stress; a numerical stabiliser,
    /// never ramped with the load continuation parameter.
    pub prestress: f64,
    pub wrinkling_eps: f64,
    /// Principal Green strain above which the element counts as unhealthy.
    pub max_strain: f64,
}

/// Wrinkling regime of the evaluated stress state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrinkleState {
    Taut,
    Wrinkled,
    Slack,
}

/// Full kernel response, also used directly by the kernel tests.
#[derive(Debug, Clone)]
pub struct MembraneResponse {
    pub energy: f64,
    /// Gradient of the energy w.r.t. each node position.
    pub gradient: [Vector3<f64>; 3],
    pub state: WrinkleState,
    /// Principal PK2 stresses after wrinkling modification.
    pub sigma1: f64,
    pub sigma2: f64,
    /// Largest principal Green-Lagrange strain.
    pub max_strain: f64,
    pub degenerate: bool,
}

/// CST triangle. Reference quantities are precomputed from the rest
/// configuration at build time.
#[derive(Debug, Clone)]
pub struct CstTriangle {
    pub name: String,
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub material: MembraneMaterial,
    dm_inv: Matrix2<f64>,
    area0: f64,
    degenerate: bool,
    /// Reference shape-function gradients `dN_a/dX` in the local frame.
    shape_grads: [Vector2<f64>; 3],
}

fn local_frame(
    p0: &Vector3<f64>,
    p1: &Vector3<f64>,
    p2: &Vector3<f64>,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let d1 = p1 - p0;
    let normal = d1.cross(&(p2 - p0));
    let l1 = d1.norm();
    let ln = normal.norm();
    if l1 < 1e-12 || ln < 1e-15 {
        return None;
    }
    let e1 = d1 / l1;
    let e2 = (normal / ln).cross(&e1);
    Some((e1, e2))
}

fn project(
    p: &Vector3<f64>,
    origin: &Vector3<f64>,
    e1: &Vector3<f64>,
    e2: &Vector3<f64>,
) -> Vector2<f64> {
    let d = p - origin;
    Vector2::new(d.dot(e1), d.dot(e2))
}

impl CstTriangle {
    pub fn new(
        name: impl Into<String>,
        a: usize,
        b: usize,
        c: usize,
        material: MembraneMaterial,
        rest: &[Vector3<f64>],
    ) -> Self {
        let name = name.into();
        let (pa, pb, pc) = (rest[a], rest[b], rest[c]);

        let (dm_inv, area0, degenerate, shape_grads) = match local_frame(&pa, &pb, &pc) {
            Some((e1, e2)) => {
                let q1 = project(&pb, &pa, &e1, &e2);
                let q2 = project(&pc, &pa, &e1, &e2);
                let dm = Matrix2::new(q1.x, q2.x, q1.y, q2.y);
                let det = dm.determinant();
                if det.abs() < 1e-12 {
                    (Matrix2::identity(), 0.0, true, [Vector2::zeros(); 3])
                } else {
                    let dm_inv = dm.try_inverse().unwrap_or_else(Matrix2::identity);
                    // dN_a/dX = Dm^-T * parent gradient rows [-1,-1; 1,0; 0,1].
                    let dm_inv_t = dm_inv.transpose();
                    let grads = [
                        dm_inv_t * Vector2::new(-1.0, -1.0),
                        dm_inv_t * Vector2::new(1.0, 0.0),
                        dm_inv_t * Vector2::new(0.0, 1.0),
                    ];
                    (dm_inv, 0.5 * det.abs(), false, grads)
                }
            }
            None => (Matrix2::identity(), 0.0, true, [Vector2::zeros(); 3]),
        };

        Self {
            name,
            a,
            b,
            c,
            material,
            dm_inv,
            area0,
            degenerate,
            shape_grads,
        }
    }

    pub fn area0(&self) -> f64 {
        self.area0
    }

    fn plane_stress_c(&self) -> nalgebra::Matrix3<f64> {
        let m = &self.material;
        let f = m.e / (1.0 - m.nu * m.nu);
        nalgebra::Matrix3::new(
            f,
            f * m.nu,
            0.0,
            f * m.nu,
            f,
            0.0,
            0.0,
            0.0,
            f * (1.0 - m.nu) / 2.0,
        )
    }

    /// Evaluate energy, gradient and stress state at the current positions.
    pub fn evaluate(&self, pos: &[Vector3<f64>]) -> MembraneResponse {
        let zero = MembraneResponse {
            energy: 0.0,
            gradient: [Vector3::zeros(); 3],
            state: WrinkleState::Taut,
            sigma1: 0.0,
            sigma2: 0.0,
            max_strain: 0.0,
            degenerate: true,
        };
        if self.degenerate {
            return zero;
        }
        let (p0, p1, p2) = (pos[self.a], pos[self.b], pos[self.c]);
        let Some((e1, e2)) = local_frame(&p0, &p1, &p2) else {
            return zero;
        };

        let q1 = project(&p1, &p0, &e1, &e2);
        let q2 = project(&p2, &p0, &e1, &e2);
        let ds = Matrix2::new(q1.x, q2.x, q1.y, q2.y);
        let f = ds * self.dm_inv;

        // Green-Lagrange strain in Voigt order [E11, E22, 2 E12].
        let cgt = f.transpose() * f;
        let e11 = 0.5 * (cgt[(0, 0)] - 1.0);
        let e22 = 0.5 * (cgt[(1, 1)] - 1.0);
        let e12 = 0.5 * cgt[(0, 1)];
        let strain = nalgebra::Vector3::new(e11, e22, 2.0 * e12);

        let c_mat = self.plane_stress_c();
        let mut s_voigt = c_mat * strain;
        s_voigt.x += self.material.prestress;
        s_voigt.y += self.material.prestress;

        // Principal decomposition of the 2x2 PK2.
        let (s11, s22, s12) = (s_voigt.x, s_voigt.y, s_voigt.z);
        let mean = 0.5 * (s11 + s22);
        let rad = (0.25 * (s11 - s22) * (s11 - s22) + s12 * s12).sqrt();
        let (mut sig1, mut sig2) = (mean + rad, mean - rad);
        let theta = 0.5 * (2.0 * s12).atan2(s11 - s22);
        let (sin_t, cos_t) = theta.sin_cos();
        let v1 = Vector2::new(cos_t, sin_t);
        let v2 = Vector2::new(-sin_t, cos_t);

        let eps_w = self.material.wrinkling_eps;
        let state = if sig2 >= 0.0 {
            WrinkleState::Taut
        } else if sig1 > 0.0 {
            sig2 *= eps_w;
            WrinkleState::Wrinkled
        } else {
            sig1 *= eps_w;
            sig2 *= eps_w;
            WrinkleState::Slack
        };
        let s_mod = v1 * v1.transpose() * sig1 + v2 * v2.transpose() * sig2;

        let ta = self.material.thickness * self.area0;
        let energy = 0.5
            * ta
            * (strain.x * s_mod[(0, 0)] + strain.y * s_mod[(1, 1)] + strain.z * s_mod[(0, 1)]);

        // First PK stress and nodal gradient, rotated back to 3D.
        let pk1 = f * s_mod;
        let mut gradient = [Vector3::zeros(); 3];
        for (idx, g) in self.shape_grads.iter().enumerate() {
            let f2 = pk1 * g * ta;
            gradient[idx] = e1 * f2.x + e2 * f2.y;
        }

        // Strain principals for the health monitor.
        let emean = 0.5 * (e11 + e22);
        let erad = (0.25 * (e11 - e22) * (e11 - e22) + e12 * e12).sqrt();

        MembraneResponse {
            energy,
            gradient,
            state,
            sigma1: sig1,
            sigma2: sig2,
            max_strain: emean + erad,
            degenerate: false,
        }
    }

    /// Accumulate into the global system. Errors when the element force is
    /// explosive (infinite or beyond 1e12 N); NaN flows to the drivers,
    /// which know how to retry.
    pub fn accumulate(
        &self,
        pos: &[Vector3<f64>],
        acc: &mut SystemAccumulator,
    ) -> Result<MembraneResponse> {
        let resp = self.evaluate(pos);
        if resp.degenerate {
            return Ok(resp);
        }

        let max_force = resp
            .gradient
            .iter()
            .map(|g| g.norm())
            .fold(0.0f64, f64::max);
        if max_force > 1e12 {
            return Err(SolveError::NumericalExplosion {
                element: self.name.clone(),
                magnitude: max_force,
            });
        }

        acc.add_energy(resp.energy);
        let nodes = [self.a, self.b, self.c];
        for (idx, &n) in nodes.iter().enumerate() {
            acc.add_gradient(n, resp.gradient[idx]);
        }

        if acc.wants_tangent() {
            self.accumulate_tangent(pos, &resp, acc);
        }
        Ok(resp)
    }

    fn accumulate_tangent(
        &self,
        pos: &[Vector3<f64>],
        resp: &MembraneResponse,
        acc: &mut SystemAccumulator,
    ) {
        let (p0, p1, p2) = (pos[self.a], pos[self.b], pos[self.c]);
        let Some((e1, e2)) = local_frame(&p0, &p1, &p2) else {
            return;
        };
        let q1 = project(&p1, &p0, &e1, &e2);
        let q2 = project(&p2, &p0, &e1, &e2);
        let f = Matrix2::new(q1.x, q2.x, q1.y, q2.y) * self.dm_inv;

        let ta = self.material.thickness * self.area0;
        let c_mat = self.plane_stress_c();
        let eps_w = self.material.wrinkling_eps;
        let stiffness_scale = match resp.state {
            WrinkleState::Taut => 1.0,
            WrinkleState::Wrinkled => 0.5 * (1.0 + eps_w),
            WrinkleState::Slack => eps_w,
        };

        // Rebuild the modified 2x2 stress from the principals.
        let theta = {
            let cgt = f.transpose() * f;
            let strain = nalgebra::Vector3::new(
                0.5 * (cgt[(0, 0)] - 1.0),
                0.5 * (cgt[(1, 1)] - 1.0),
                cgt[(0, 1)],
            );
            let s = c_mat * strain;
            // Prestress shifts both diagonal terms, so it drops out of the
            // principal angle.
            0.5 * (2.0 * s.z).atan2(s.x - s.y)
        };
        let (sin_t, cos_t) = theta.sin_cos();
        let v1 = Vector2::new(cos_t, sin_t);
        let v2 = Vector2::new(-sin_t, cos_t);
        let s_mod = v1 * v1.transpose() * resp.sigma1 + v2 * v2.transpose() * resp.sigma2;

        let f_col1 = Vector2::new(f[(0, 0)], f[(1, 0)]);
        let f_col2 = Vector2::new(f[(0, 1)], f[(1, 1)]);

        // Strain-displacement rows per node, in the local 2D frame.
        let b_of = |g: &Vector2<f64>| -> nalgebra::Matrix3x2<f64> {
            nalgebra::Matrix3x2::new(
                g.x * f_col1.x,
                g.x * f_col1.y,
                g.y * f_col2.x,
                g.y * f_col2.y,
                g.y * f_col1.x + g.x * f_col2.x,
                g.y * f_col1.y + g.x * f_col2.y,
            )
        };

        let rot = Matrix3x2::from_columns(&[e1, e2]);
        let nodes = [self.a, self.b, self.c];
        for (ia, &na) in nodes.iter().enumerate() {
            let ba = b_of(&self.shape_grads[ia]);
            for (ib, &nb) in nodes.iter().enumerate() {
                let bb = b_of(&self.shape_grads[ib]);
                let k2 = ba.transpose() * c_mat * bb * (ta * stiffness_scale);
                let mut block = rot * k2 * rot.transpose();
                let geo =
                    ta * (self.shape_grads[ia].transpose() * s_mod * self.shape_grads[ib])[(0, 0)];
                block[(0, 0)] += geo;
                block[(1, 1)] += geo;
                block[(2, 2)] += geo;
                acc.add_tangent_block(na, nb, &block);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn material() -> MembraneMaterial {
        MembraneMaterial {
            e: 2.5e9,
            nu: 0.3,
            thickness: 0.25e-3,
            prestress: 0.0,
            wrinkling_eps: 0.01,
            max_strain: 0.15,
        }
    }

    fn unit_triangle() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn undeformed_triangle_is_force_free() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        let resp = tri.evaluate(&rest);
        assert!(!resp.degenerate);
        assert!(resp.energy.abs() < 1e-12);
        for g in &resp.gradient {
            assert!(g.norm() < 1e-9, "gradient {g:?}");
        }
    }

    #[test]
    fn rigid_rotation_produces_no_force() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);

        // Rotate 40 degrees about x then 25 about z.
        let rot = nalgebra::Rotation3::from_euler_angles(0.7, 0.0, 0.44);
        let moved: Vec<Vector3<f64>> = rest.iter().map(|p| rot * p).collect();
        let resp = tri.evaluate(&moved);
        assert!(resp.energy.abs() < 1e-8);
        for g in &resp.gradient {
            assert!(g.norm() < 1e-6, "rotation must be strain free, got {g:?}");
        }
    }

    #[test]
    fn prestress_survives_rigid_rotation() {
        let rest = unit_triangle();
        let mut m = material();
        m.prestress = 2.4e4;
        let tri = CstTriangle::new("t", 0, 1, 2, m, &rest);
        let f0: f64 = tri.evaluate(&rest).gradient[0].norm();

        let rot = nalgebra::Rotation3::from_euler_angles(0.3, 0.9, -0.2);
        let moved: Vec<Vector3<f64>> = rest.iter().map(|p| rot * p).collect();
        let f1 = tri.evaluate(&moved).gradient[0].norm();
        assert!(
            (f0 - f1).abs() < 1e-6 * f0.max(1.0),
            "prestress resultant changed under rotation: {f0} vs {f1}"
        );
    }

    #[test]
    fn uniaxial_stretch_is_taut_with_positive_stress() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        let pos = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.01, 0.0, 0.0),
            Vector3::new(0.0, 1.004, 0.0),
        ];
        let resp = tri.evaluate(&pos);
        assert_eq!(resp.state, WrinkleState::Taut);
        assert!(resp.sigma1 > 0.0 && resp.sigma2 > 0.0);
    }

    #[test]
    fn lateral_compression_wrinkles_and_reduces_minor_stress() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        // Stretch x, compress y.
        let pos = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.01, 0.0, 0.0),
            Vector3::new(0.0, 0.99, 0.0),
        ];
        let resp = tri.evaluate(&pos);
        assert_eq!(resp.state, WrinkleState::Wrinkled);
        assert!(resp.sigma1 > 0.0);
        assert!(resp.sigma2 < 0.0);

        // The kept compressive stress is the wrinkling fraction of the raw one.
        let raw = {
            let mut m = material();
            m.wrinkling_eps = 1.0;
            CstTriangle::new("raw", 0, 1, 2, m, &rest).evaluate(&pos)
        };
        let ratio = resp.sigma2 / raw.sigma2;
        assert!(
            (ratio - 0.01).abs() < 1e-6,
            "minor stress reduced by eps, got ratio {ratio}"
        );
    }

    #[test]
    fn biaxial_compression_is_slack() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        let pos = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.99, 0.0, 0.0),
            Vector3::new(0.0, 0.99, 0.0),
        ];
        let resp = tri.evaluate(&pos);
        assert_eq!(resp.state, WrinkleState::Slack);
        assert!(resp.sigma1 <= 0.0);
    }

    #[test]
    fn degenerate_triangle_contributes_nothing() {
        let rest = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
        ];
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        let resp = tri.evaluate(&rest);
        assert!(resp.degenerate);
        assert_eq!(resp.energy, 0.0);
    }

    #[test]
    fn gradient_matches_finite_difference_energy() {
        let rest = unit_triangle();
        let tri = CstTriangle::new("t", 0, 1, 2, material(), &rest);
        let mut pos = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.006, 0.001, 0.002),
            Vector3::new(-0.002, 1.003, 0.001),
        ];
        let resp = tri.evaluate(&pos);

        let h = 1e-7;
        for node in 0..3 {
            for comp in 0..3 {
                pos[node][comp] += h;
                let ep = tri.evaluate(&pos).energy;
                pos[node][comp] -= 2.0 * h;
                let em = tri.evaluate(&pos).energy;
                pos[node][comp] += h;
                let fd = (ep - em) / (2.0 * h);
                let an = resp.gradient[node][comp];
                let scale = an.abs().max(1.0);
                assert!(
                    (fd - an).abs() / scale < 2e-3,
                    "node {node} comp {comp}: fd={fd:.5e} analytic={an:.5e}"
                );
            }
        }
    }
}
