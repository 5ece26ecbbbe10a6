//! Result tree returned by the solver.
//!
//! Everything here serializes in camelCase; curves are polylines of
//! `{x, y, z}` points, sail surfaces are row-major grids of `[x, y, z]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::payload::SimulationPayload;

/// A point on a reported curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointXyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PointXyz {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One solver iteration, for convergence plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iter: usize,
    /// Infinity norm of the gradient, in Newtons.
    pub residual: f64,
    pub energy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damping: Option<f64>,
    /// Largest displacement DOF magnitude at this iteration.
    pub max_dof: f64,
}

/// One continuation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub phase: String,
    pub lambda: f64,
    pub converged: bool,
    pub iterations: usize,
    pub grad_inf: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub convergence_history: Vec<IterationRecord>,
}

/// Deformed cable polylines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CableCurves {
    pub shroud_port: Vec<PointXyz>,
    pub shroud_stbd: Vec<PointXyz>,
    pub stay_jib: Vec<PointXyz>,
}

/// Headline cable tensions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tensions {
    pub shroud_port_n: f64,
    pub shroud_stbd_n: f64,
    pub forestay_n: f64,
    pub halyard_n: f64,
}

/// Spreader loads and tip positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spreaders {
    pub port_axial_n: f64,
    pub stbd_axial_n: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_port: Option<PointXyz>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip_stbd: Option<PointXyz>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PointXyz>,
}

/// Force carried by a named support spring.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpringForce {
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
}

/// Global force balance, open (solver reactions as-is) and closed (mast-step
/// reaction chosen so the sum vanishes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquilibriumReport {
    pub external_fx: f64,
    pub external_fy: f64,
    pub external_fz: f64,
    pub reactions_rx: f64,
    pub reactions_ry: f64,
    pub reactions_rz: f64,
    pub partners_rx: f64,
    pub partners_ry: f64,
    pub partners_rz: f64,
    pub mast_step_rx: f64,
    pub mast_step_ry: f64,
    pub mast_step_rz: f64,
    pub sum_fx: f64,
    pub sum_fy: f64,
    pub sum_fz: f64,
    pub magnitude: f64,
    pub is_balanced: bool,
    pub open_sum_fx: f64,
    pub open_sum_fy: f64,
    pub open_sum_fz: f64,
    pub open_magnitude: f64,
    pub open_is_balanced: bool,
}

/// Sail grids for one captured state; row-major `[row][col][xyz]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SailGrids {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<Vec<Vec<[f64; 3]>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jib: Option<Vec<Vec<[f64; 3]>>>,
}

/// Sail surfaces at the three reference states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SailSurfaces {
    pub relaxed: SailGrids,
    pub prebend: SailGrids,
    pub loaded: SailGrids,
}

/// Physical outputs of the solve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outputs {
    pub mast_curve_relaxed: Vec<PointXyz>,
    pub mast_curve_prebend: Vec<PointXyz>,
    pub mast_curve_loaded: Vec<PointXyz>,
    pub cable_curves: CableCurves,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sails: Option<SailSurfaces>,
    pub tensions: Tensions,
    pub spreaders: Spreaders,
    pub reactions: BTreeMap<String, [f64; 3]>,
    pub springs_forces: BTreeMap<String, SpringForce>,
    pub equilibrium: EquilibriumReport,
}

/// Convergence and bookkeeping diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub slack_cables: Vec<String>,
    pub history: Vec<StepRecord>,
    /// Numeric knobs in effect for this run.
    pub constants: BTreeMap<String, f64>,
    /// Iteration trace of the final solve.
    pub convergence_history: Vec<IterationRecord>,
}

/// Complete simulation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub ok: bool,
    pub converged: bool,
    pub iterations: usize,
    pub iterations_last: usize,
    pub energy: f64,
    pub grad_inf: f64,
    /// Which driver produced the final state.
    pub solver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub outputs: Outputs,
    pub diagnostics: Diagnostics,
    pub inputs: SimulationPayload,
}
