//! Global assembly: energy, gradient, optional dense tangent, bookkeeping.
//!
//! Contributions accumulate in a fixed order (bars, bending triplets,
//! springs, cables, cable paths, ties, membranes, follower pressure,
//! external forces) so floating-point results are reproducible for a
//! given model.
//! Reactions at fixed nodes collect the force each element applies *to*
//! the node.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::error::Result;
use crate::model::{DofMap, RigModel};

/// Force magnitude above which an element no longer counts as healthy.
const HEALTH_FORCE_LIMIT: f64 = 1e9;

/// Scatter target shared by every element kernel. Gradient entries for
/// fixed nodes are routed into per-node reactions instead of the DOF vector.
pub struct SystemAccumulator<'a> {
    dofs: &'a DofMap,
    pub energy: f64,
    pub gradient: DVector<f64>,
    pub tangent: Option<DMatrix<f64>>,
    pub node_reactions: Vec<Vector3<f64>>,
}

impl<'a> SystemAccumulator<'a> {
    fn new(dofs: &'a DofMap, num_nodes: usize, with_tangent: bool) -> Self {
        let n = dofs.num_dofs;
        Self {
            dofs,
            energy: 0.0,
            gradient: DVector::zeros(n),
            tangent: with_tangent.then(|| DMatrix::zeros(n, n)),
            node_reactions: vec![Vector3::zeros(); num_nodes],
        }
    }

    pub fn wants_tangent(&self) -> bool {
        self.tangent.is_some()
    }

    pub fn add_energy(&mut self, e: f64) {
        self.energy += e;
    }

    /// Add an energy-gradient contribution for one node. The force the
    /// element applies to the node is the negative of this.
    pub fn add_gradient(&mut self, node: usize, g: Vector3<f64>) {
        match self.dofs.base(node) {
            Some(b) => {
                self.gradient[b] += g.x;
                self.gradient[b + 1] += g.y;
                self.gradient[b + 2] += g.z;
            }
            None => self.node_reactions[node] -= g,
        }
    }

    /// Add a 3x3 tangent block coupling two nodes; fixed pairs are dropped.
    pub fn add_tangent_block(&mut self, ni: usize, nj: usize, block: &Matrix3<f64>) {
        let (Some(bi), Some(bj)) = (self.dofs.base(ni), self.dofs.base(nj)) else {
            return;
        };
        if let Some(k) = self.tangent.as_mut() {
            for r in 0..3 {
                for c in 0..3 {
                    k[(bi + r, bj + c)] += block[(r, c)];
                }
            }
        }
    }
}

/// Bookkeeping gathered during one assembly pass.
#[derive(Debug, Clone, Default)]
pub struct AssemblyMeta {
    /// Axial force per named 1D element.
    pub axial_forces: BTreeMap<String, f64>,
    /// Cables whose elongation is negative.
    pub slack_cables: Vec<String>,
    /// Absolute node positions at this state.
    pub positions: Vec<Vector3<f64>>,
    /// Reaction per fixed-node label.
    pub reactions: BTreeMap<String, Vector3<f64>>,
    /// Force applied by each named support spring.
    pub spring_forces: BTreeMap<String, Vector3<f64>>,
    /// Follower-pressure force accumulated per node id.
    pub pressure_forces: BTreeMap<usize, Vector3<f64>>,
    /// Largest element force seen this pass.
    pub max_element_force: f64,
    /// Fraction of elements with finite, moderate forces.
    pub health_ratio: f64,
}

/// One assembled state of the system.
#[derive(Debug, Clone)]
pub struct AssembledState {
    pub energy: f64,
    pub gradient: DVector<f64>,
    pub tangent: Option<DMatrix<f64>>,
    pub meta: AssemblyMeta,
}

impl AssembledState {
    pub fn grad_inf(&self) -> f64 {
        self.gradient.amax()
    }
}

/// Assemble energy, gradient and (unless `skip_tangent`) the dense tangent
/// at displacement `u`.
pub fn assemble(
    model: &RigModel,
    dofs: &DofMap,
    u: &DVector<f64>,
    skip_tangent: bool,
) -> Result<AssembledState> {
    let pos = dofs.positions(model, u);
    let rest = model.rest_positions();
    let mut acc = SystemAccumulator::new(dofs, model.nodes.len(), !skip_tangent);
    let mut meta = AssemblyMeta::default();

    let mut total_elements = 0usize;
    let mut healthy_elements = 0usize;
    let mut note_force = |meta: &mut AssemblyMeta, magnitude: f64, strained_ok: bool| {
        total_elements += 1;
        if magnitude.is_finite() {
            meta.max_element_force = meta.max_element_force.max(magnitude.abs());
            if magnitude.abs() < HEALTH_FORCE_LIMIT && strained_ok {
                healthy_elements += 1;
            }
        }
    };

    for bar in &model.bars {
        let r = bar.accumulate(&pos, &mut acc);
        note_force(&mut meta, r.force, true);
        meta.axial_forces.insert(bar.name.clone(), r.force);
    }

    for triplet in &model.bending {
        triplet.accumulate(&pos, &rest, &mut acc);
    }

    for spring in &model.ground_springs {
        let f = spring.accumulate(&pos, &rest, &mut acc);
        note_force(&mut meta, f.norm(), true);
        meta.spring_forces.insert(spring.name.clone(), f);
    }
    for spring in &model.link_springs {
        let f = spring.accumulate(&pos, &rest, &mut acc);
        note_force(&mut meta, f.norm(), true);
        meta.spring_forces.insert(spring.name.clone(), f);
    }

    for cable in &model.cables {
        let r = cable.accumulate(&pos, &mut acc);
        note_force(&mut meta, r.force, true);
        meta.axial_forces.insert(cable.name.clone(), r.force);
        if r.slack {
            meta.slack_cables.push(cable.name.clone());
        }
    }
    for path in &model.cable_paths {
        let r = path.accumulate(&pos, &mut acc);
        note_force(&mut meta, r.force, true);
        meta.axial_forces.insert(path.name.clone(), r.force);
        if r.slack {
            meta.slack_cables.push(path.name.clone());
        }
    }
    for tie in &model.ties {
        let r = tie.accumulate(&pos, &mut acc);
        note_force(&mut meta, r.force, true);
        meta.axial_forces.insert(tie.name.clone(), r.force);
    }

    for membrane in &model.membranes {
        let resp = membrane.accumulate(&pos, &mut acc)?;
        let f = resp
            .gradient
            .iter()
            .map(|g| g.norm())
            .fold(0.0f64, f64::max);
        note_force(&mut meta, f, resp.max_strain < membrane.material.max_strain);
    }

    if let Some(pressure) = &model.pressure {
        for membrane in &model.membranes {
            let tri = [membrane.a, membrane.b, membrane.c];
            let f = pressure.accumulate(tri, &pos, &rest, &mut acc);
            for &n in &tri {
                *meta.pressure_forces.entry(n).or_insert_with(Vector3::zeros) += f;
            }
        }
    }

    // External work: U -= F . u.
    for &(node, force) in &model.applied_forces {
        if let Some(b) = dofs.base(node) {
            let u_node = Vector3::new(u[b], u[b + 1], u[b + 2]);
            acc.add_energy(-force.dot(&u_node));
            acc.add_gradient(node, -force);
        }
    }

    meta.positions = pos;
    meta.health_ratio = if total_elements == 0 {
        1.0
    } else {
        healthy_elements as f64 / total_elements as f64
    };
    for node in &model.nodes {
        if node.fixed {
            meta.reactions
                .insert(node.label.clone(), acc.node_reactions[node.id]);
        }
    }

    Ok(AssembledState {
        energy: acc.energy,
        gradient: acc.gradient,
        tangent: acc.tangent,
        meta,
    })
}

/// Energy-only evaluation for line searches.
pub fn energy_at(model: &RigModel, dofs: &DofMap, u: &DVector<f64>) -> Result<f64> {
    Ok(assemble(model, dofs, u, true)?.energy)
}
