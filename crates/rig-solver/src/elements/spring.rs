//! Support springs: to-ground with an optional prescribed target, and
//! relative springs penalising the differential displacement of two nodes.

use nalgebra::{Matrix3, Vector3};

use crate::assembly::SystemAccumulator;

/// Diagonal spring tying one free node toward a displacement target.
/// Models the deck partners: `U = 1/2 * sum_c k_c (u_c - t_c)^2`.
#[derive(Debug, Clone)]
pub struct GroundSpring {
    pub name: String,
    pub node: usize,
    pub stiffness: Vector3<f64>,
    pub target: Vector3<f64>,
}

impl GroundSpring {
    /// Returns the force the spring applies to the node.
    pub fn accumulate(
        &self,
        pos: &[Vector3<f64>],
        rest: &[Vector3<f64>],
        acc: &mut SystemAccumulator,
    ) -> Vector3<f64> {
        let u = pos[self.node] - rest[self.node];
        let e = u - self.target;
        let g = Vector3::new(
            self.stiffness.x * e.x,
            self.stiffness.y * e.y,
            self.stiffness.z * e.z,
        );

        acc.add_energy(
            0.5 * (self.stiffness.x * e.x * e.x
                + self.stiffness.y * e.y * e.y
                + self.stiffness.z * e.z * e.z),
        );
        acc.add_gradient(self.node, g);
        if acc.wants_tangent() {
            let block = Matrix3::from_diagonal(&self.stiffness);
            acc.add_tangent_block(self.node, self.node, &block);
        }
        -g
    }
}

/// Diagonal spring penalising `u_a - u_b`.
#[derive(Debug, Clone)]
pub struct LinkSpring {
    pub name: String,
    pub a: usize,
    pub b: usize,
    pub stiffness: Vector3<f64>,
}

impl LinkSpring {
    pub fn accumulate(
        &self,
        pos: &[Vector3<f64>],
        rest: &[Vector3<f64>],
        acc: &mut SystemAccumulator,
    ) -> Vector3<f64> {
        let ua = pos[self.a] - rest[self.a];
        let ub = pos[self.b] - rest[self.b];
        let e = ua - ub;
        let g = Vector3::new(
            self.stiffness.x * e.x,
            self.stiffness.y * e.y,
            self.stiffness.z * e.z,
        );

        acc.add_energy(
            0.5 * (self.stiffness.x * e.x * e.x
                + self.stiffness.y * e.y * e.y
                + self.stiffness.z * e.z * e.z),
        );
        acc.add_gradient(self.a, g);
        acc.add_gradient(self.b, -g);
        if acc.wants_tangent() {
            let block = Matrix3::from_diagonal(&self.stiffness);
            acc.add_tangent_block(self.a, self.a, &block);
            acc.add_tangent_block(self.b, self.b, &block);
            acc.add_tangent_block(self.a, self.b, &(-block));
            acc.add_tangent_block(self.b, self.a, &(-block));
        }
        -g
    }
}
