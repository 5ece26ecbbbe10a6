//! Model data structures: nodes, DOF map, element containers.
//!
//! A model is built once per continuation target and is immutable during a
//! solve. Free nodes carry three consecutive scalar DOFs; fixed nodes carry
//! none and accumulate reactions instead.

use std::collections::HashMap;

use nalgebra::{DVector, Vector3};

use crate::elements::axial::{Bar, Cable, CablePath, TensionTie};
use crate::elements::bending::BendingTriplet;
use crate::elements::membrane::CstTriangle;
use crate::elements::pressure::FollowerPressure;
use crate::elements::spring::{GroundSpring, LinkSpring};

/// A node in the rig model.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub label: String,
    /// Rest position.
    pub p0: Vector3<f64>,
    pub fixed: bool,
}

/// Complete model for one solve. Element kinds live in separate containers
/// so assembly order (bars, beams, springs, cables, membranes, pressure) is
/// deterministic by construction.
#[derive(Debug, Clone, Default)]
pub struct RigModel {
    pub nodes: Vec<Node>,
    pub bars: Vec<Bar>,
    pub bending: Vec<BendingTriplet>,
    pub ground_springs: Vec<GroundSpring>,
    pub link_springs: Vec<LinkSpring>,
    pub cables: Vec<Cable>,
    pub cable_paths: Vec<CablePath>,
    pub ties: Vec<TensionTie>,
    pub membranes: Vec<CstTriangle>,
    pub pressure: Option<FollowerPressure>,
    /// Externally applied nodal forces (node id, force).
    pub applied_forces: Vec<(usize, Vector3<f64>)>,
    labels: HashMap<String, usize>,
}

impl RigModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id. Labels must be unique.
    pub fn add_node(&mut self, label: impl Into<String>, p0: Vector3<f64>, fixed: bool) -> usize {
        let id = self.nodes.len();
        let label = label.into();
        self.labels.insert(label.clone(), id);
        self.nodes.push(Node {
            id,
            label,
            p0,
            fixed,
        });
        id
    }

    pub fn node_by_label(&self, label: &str) -> Option<usize> {
        self.labels.get(label).copied()
    }

    pub fn num_free_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| !n.fixed).count()
    }

    /// Rest positions of all nodes (the `u = 0` configuration).
    pub fn rest_positions(&self) -> Vec<Vector3<f64>> {
        self.nodes.iter().map(|n| n.p0).collect()
    }

    pub fn add_applied_force(&mut self, node: usize, force: Vector3<f64>) {
        self.applied_forces.push((node, force));
    }
}

/// Mapping from free nodes to contiguous DOF base indices.
#[derive(Debug, Clone)]
pub struct DofMap {
    base: Vec<Option<usize>>,
    pub num_dofs: usize,
}

impl DofMap {
    /// Build the map; indices are contiguous and stable for a given model.
    pub fn build(model: &RigModel) -> Self {
        let mut base = Vec::with_capacity(model.nodes.len());
        let mut next = 0usize;
        for node in &model.nodes {
            if node.fixed {
                base.push(None);
            } else {
                base.push(Some(next));
                next += 3;
            }
        }
        Self {
            base,
            num_dofs: next,
        }
    }

    /// DOF base index for a node, or `None` if the node is fixed.
    pub fn base(&self, node: usize) -> Option<usize> {
        self.base[node]
    }

    /// Absolute positions `p0 + u` for all nodes; fixed nodes stay at rest.
    pub fn positions(&self, model: &RigModel, u: &DVector<f64>) -> Vec<Vector3<f64>> {
        model
            .nodes
            .iter()
            .map(|n| match self.base[n.id] {
                Some(b) => n.p0 + Vector3::new(u[b], u[b + 1], u[b + 2]),
                None => n.p0,
            })
            .collect()
    }

    /// Pack per-node displacements into a DOF vector.
    pub fn pack(&self, disp: &[Vector3<f64>]) -> DVector<f64> {
        let mut u = DVector::zeros(self.num_dofs);
        for (id, b) in self.base.iter().enumerate() {
            if let Some(b) = b {
                u[*b] = disp[id].x;
                u[b + 1] = disp[id].y;
                u[b + 2] = disp[id].z;
            }
        }
        u
    }

    /// Unpack a DOF vector into per-node displacements (fixed nodes zero).
    pub fn unpack(&self, u: &DVector<f64>, num_nodes: usize) -> Vec<Vector3<f64>> {
        let mut disp = vec![Vector3::zeros(); num_nodes];
        for (id, b) in self.base.iter().enumerate() {
            if let Some(b) = b {
                disp[id] = Vector3::new(u[*b], u[b + 1], u[b + 2]);
            }
        }
        disp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dof_indices_skip_fixed_nodes() {
        let mut model = RigModel::new();
        model.add_node("a", Vector3::zeros(), true);
        model.add_node("b", Vector3::new(1.0, 0.0, 0.0), false);
        model.add_node("c", Vector3::new(2.0, 0.0, 0.0), false);

        let dofs = DofMap::build(&model);
        assert_eq!(dofs.num_dofs, 6);
        assert_eq!(dofs.base(0), None);
        assert_eq!(dofs.base(1), Some(0));
        assert_eq!(dofs.base(2), Some(3));
    }

    #[test]
    fn positions_add_displacement_to_free_nodes_only() {
        let mut model = RigModel::new();
        model.add_node("a", Vector3::zeros(), true);
        model.add_node("b", Vector3::new(1.0, 0.0, 0.0), false);
        let dofs = DofMap::build(&model);

        let mut u = DVector::zeros(3);
        u[0] = 0.5;
        let pos = dofs.positions(&model, &u);
        assert_eq!(pos[0], Vector3::zeros());
        assert_eq!(pos[1], Vector3::new(1.5, 0.0, 0.0));
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut model = RigModel::new();
        model.add_node("a", Vector3::zeros(), true);
        model.add_node("b", Vector3::zeros(), false);
        model.add_node("c", Vector3::zeros(), false);
        let dofs = DofMap::build(&model);

        let disp = vec![
            Vector3::zeros(),
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-1.0, 0.5, 0.0),
        ];
        let u = dofs.pack(&disp);
        let back = dofs.unpack(&u, 3);
        assert_eq!(back, disp);
    }

    #[test]
    fn labels_resolve_to_ids() {
        let mut model = RigModel::new();
        let a = model.add_node("mast_step", Vector3::zeros(), true);
        let b = model.add_node("masthead", Vector3::new(0.0, 0.0, 6.0), false);
        assert_eq!(model.node_by_label("mast_step"), Some(a));
        assert_eq!(model.node_by_label("masthead"), Some(b));
        assert_eq!(model.node_by_label("boom_3"), None);
    }
}
