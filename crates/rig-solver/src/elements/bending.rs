//! Discrete beam bending over node triplets.
//!
//! Mast (and boom) bending uses the second-difference stencil `[1, -2, 1]`
//! on the lateral displacement components. For spacing `ds` and bending
//! stiffness EI the triplet energy is
//!
//! ```text
//! U = 1/2 * (EI / ds^3) * (d_x^2 + d_y^2),   d = u_a - 2 u_b + u_c
//! ```
//!
//! Only X and Y enter; Z is axial and carried by the segment bars.

use nalgebra::{Matrix3, Vector3};

use crate::assembly::SystemAccumulator;

#[derive(Debug, Clone)]
pub struct BendingTriplet {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub ds: f64,
    pub ei: f64,
}

const STENCIL: [f64; 3] = [1.0, -2.0, 1.0];

impl BendingTriplet {
    pub fn accumulate(
        &self,
        pos: &[Vector3<f64>],
        rest: &[Vector3<f64>],
        acc: &mut SystemAccumulator,
    ) {
        let kb = self.ei / (self.ds * self.ds * self.ds);
        let nodes = [self.a, self.b, self.c];

        let u: Vec<Vector3<f64>> = nodes.iter().map(|&n| pos[n] - rest[n]).collect();
        let dx = u[0].x - 2.0 * u[1].x + u[2].x;
        let dy = u[0].y - 2.0 * u[1].y + u[2].y;

        acc.add_energy(0.5 * kb * (dx * dx + dy * dy));
        for (idx, &n) in nodes.iter().enumerate() {
            let w = STENCIL[idx];
            acc.add_gradient(n, Vector3::new(kb * dx * w, kb * dy * w, 0.0));
        }

        if acc.wants_tangent() {
            for (ia, &na) in nodes.iter().enumerate() {
                for (ib, &nb) in nodes.iter().enumerate() {
                    let w = kb * STENCIL[ia] * STENCIL[ib];
                    let mut block = Matrix3::zeros();
                    block[(0, 0)] = w;
                    block[(1, 1)] = w;
                    acc.add_tangent_block(na, nb, &block);
                }
            }
        }
    }
}
