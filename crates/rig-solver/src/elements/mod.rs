//! Element kernels: per-element energy, gradient and tangent stiffness.

pub mod axial;
pub mod bending;
pub mod membrane;
pub mod pressure;
pub mod spring;

pub use axial::{Bar, Cable, CableLaw, CablePath, TensionTie};
pub use bending::BendingTriplet;
pub use membrane::{CstTriangle, MembraneMaterial, WrinkleState};
pub use pressure::FollowerPressure;
pub use spring::{GroundSpring, LinkSpring};

use nalgebra::{Matrix3, Vector3};

/// Skew-symmetric cross-product operator: `skew(a) * b == a x b`.
pub(crate) fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Tangent block of a two-node axial member: material part along the axis
/// plus the geometric (string) part transverse to it.
pub(crate) fn axial_tangent_block(
    n_unit: &Vector3<f64>,
    length: f64,
    force: f64,
    dforce_dl: f64,
    with_geometric: bool,
) -> Matrix3<f64> {
    let nnt = n_unit * n_unit.transpose();
    let mut k = nnt * dforce_dl;
    if with_geometric && length > 1e-12 {
        k += (Matrix3::identity() - nnt) * (force / length);
    }
    k
}
