//! Load continuation and fluid-structure segregation.
//!
//! Three phases ramp prestress, halyard and wind in order, each through a
//! sequence of intermediate targets. A step that fails to converge is
//! halved until it underflows; a step that converges instantly after a
//! halving is polished at a stricter tolerance. Each phase ends with an
//! exact-target solve whose state is the handoff to the next phase.
//!
//! With sails present and real load applied, the solve alternates between
//! a rig pass (Newton, sail interior frozen) and a membrane pass (Dynamic
//! Relaxation, rig frozen), exchanging positions through the jib luff and
//! stay interface.

use std::collections::HashSet;

use nalgebra::Vector3;
use tracing::{debug, warn};

use rig_model::{IterationRecord, SimulationPayload, StepRecord};

use crate::assembly::assemble;
use crate::error::Result;
use crate::model::{DofMap, RigModel};
use crate::newton::{solve_newton, NewtonConfig};
use crate::relaxation::{solve_relaxation, RelaxationConfig};
use crate::rig_builder::{build_rig, LoadScales, RigLayout};
use crate::sail_builder::add_sails;

/// Which driver produced a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    Newton,
    DynamicRelaxation,
}

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Newton => "newton",
            SolverKind::DynamicRelaxation => "dynamic_relaxation",
        }
    }
}

/// Outcome of one continuation target.
#[derive(Debug, Clone)]
pub struct StateOutcome {
    /// Displacement per node of the (scale-independent) node layout.
    pub node_disp: Vec<Vector3<f64>>,
    pub converged: bool,
    /// Whether continuation may advance on this state. Matches `converged`
    /// for Newton; membrane solves additionally accept the 50 N band.
    pub accepted: bool,
    pub iterations: usize,
    pub grad_inf: f64,
    pub energy: f64,
    pub reason: Option<String>,
    pub history: Vec<IterationRecord>,
    pub solver: SolverKind,
}

impl StateOutcome {
    fn is_finite(&self) -> bool {
        self.node_disp
            .iter()
            .all(|v| v.x.is_finite() && v.y.is_finite() && v.z.is_finite())
    }
}

/// Per-solve overrides used by the polish pass.
#[derive(Debug, Clone, Copy, Default)]
struct SolveOptions {
    tolerance_factor: f64,
    max_iterations: Option<usize>,
}

impl SolveOptions {
    fn normal() -> Self {
        Self {
            tolerance_factor: 1.0,
            max_iterations: None,
        }
    }

    fn polish() -> Self {
        Self {
            tolerance_factor: 0.25,
            max_iterations: Some(600),
        }
    }
}

/// Full continuation result handed to the result extractor.
pub struct ContinuationResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub disp: Vec<Vector3<f64>>,
    pub prebend_disp: Option<Vec<Vector3<f64>>>,
    pub history: Vec<StepRecord>,
    pub final_outcome: Option<StateOutcome>,
    pub total_iterations: usize,
    /// Model and layout built at the final scales, for extraction.
    pub model: RigModel,
    pub layout: RigLayout,
}

fn newton_config(payload: &SimulationPayload, with_sails: bool, opts: &SolveOptions) -> NewtonConfig {
    let s = &payload.solver;
    let mut config = if with_sails {
        NewtonConfig::for_sail_problems(s.max_iterations as usize, s.tolerance_n)
    } else {
        NewtonConfig {
            max_iterations: s.max_iterations as usize,
            tolerance: s.tolerance_n,
            ..Default::default()
        }
    };
    config.tolerance *= opts.tolerance_factor;
    if let Some(m) = opts.max_iterations {
        config.max_iterations = m;
    }
    config
}

fn relaxation_config(payload: &SimulationPayload, opts: &SolveOptions) -> RelaxationConfig {
    let s = &payload.solver;
    let mut config = RelaxationConfig {
        tolerance: s.tolerance_n * opts.tolerance_factor,
        ..Default::default()
    };
    if let Some(dt) = s.dr_time_step {
        config.time_step = dt;
    }
    if let Some(m) = s.dr_max_step_m {
        config.max_step = m;
    }
    if let Some(f) = s.dr_stability_factor {
        config.stability_factor = f;
    }
    if let Some(w) = s.dr_warmup_iters {
        config.warmup_iters = w as usize;
    }
    if let Some(m) = s.dr_max_iterations {
        config.max_iterations = m as usize;
    }
    if let Some(v) = s.dr_viscous_damping {
        config.viscous_damping = v;
    }
    if let Some(k) = s.dr_kinetic_backtrack {
        config.kinetic_backtrack = k;
    }
    if let Some(m) = opts.max_iterations {
        config.max_iterations = m;
    }
    config
}

/// Whether the payload carries any explicit DR configuration, making DR a
/// legitimate fallback after a singular tangent.
fn dr_configured(payload: &SimulationPayload) -> bool {
    let s = &payload.solver;
    s.use_dynamic_relaxation.is_some()
        || s.dr_time_step.is_some()
        || s.dr_max_iterations.is_some()
        || s.dr_max_step_m.is_some()
}

/// Build the model at the given scales.
fn build_model(
    payload: &SimulationPayload,
    scales: &LoadScales,
) -> Result<(RigModel, RigLayout)> {
    let (mut model, mut layout) = build_rig(payload, scales)?;
    add_sails(&mut model, &mut layout, payload, scales)?;
    Ok((model, layout))
}

/// Clone the model with the given nodes frozen at their current deformed
/// positions.
fn with_frozen(model: &RigModel, freeze: &HashSet<usize>, disp: &[Vector3<f64>]) -> RigModel {
    let mut frozen = model.clone();
    for node in &mut frozen.nodes {
        if !node.fixed && freeze.contains(&node.id) {
            node.p0 += disp[node.id];
            node.fixed = true;
        }
    }
    frozen
}

/// Merge a sub-solve displacement back into the full per-node field,
/// touching only the nodes that were free in the sub-solve.
fn merge_disp(disp: &mut [Vector3<f64>], sub_model: &RigModel, dofs: &DofMap, u: &nalgebra::DVector<f64>) {
    for node in &sub_model.nodes {
        if let Some(b) = dofs.base(node.id) {
            disp[node.id] = Vector3::new(u[b], u[b + 1], u[b + 2]);
        }
    }
}

fn run_newton_on(
    model: &RigModel,
    disp: &[Vector3<f64>],
    config: &NewtonConfig,
) -> Result<StateOutcome> {
    let dofs = DofMap::build(model);
    let u0 = dofs.pack(disp);
    let out = solve_newton(model, &dofs, u0, config)?;
    let mut node_disp = disp.to_vec();
    merge_disp(&mut node_disp, model, &dofs, &out.displacement);
    Ok(StateOutcome {
        node_disp,
        converged: out.converged,
        accepted: out.converged,
        iterations: out.iterations,
        grad_inf: out.grad_inf,
        energy: out.energy,
        reason: out.reason,
        history: out.history,
        solver: SolverKind::Newton,
    })
}

fn run_relaxation_on(
    model: &RigModel,
    disp: &[Vector3<f64>],
    config: &RelaxationConfig,
) -> Result<StateOutcome> {
    let dofs = DofMap::build(model);
    let u0 = dofs.pack(disp);
    let out = solve_relaxation(model, &dofs, u0, config)?;
    let accepted =
        out.converged || (!model.membranes.is_empty() && out.grad_inf < MEMBRANE_ACCEPT_N);
    let mut node_disp = disp.to_vec();
    merge_disp(&mut node_disp, model, &dofs, &out.displacement);
    Ok(StateOutcome {
        node_disp,
        converged: out.converged,
        accepted,
        iterations: out.iterations,
        grad_inf: out.grad_inf,
        energy: out.energy,
        reason: out.reason,
        history: out.history,
        solver: SolverKind::DynamicRelaxation,
    })
}

/// Segregated rig/sail alternation.
fn solve_segregated(
    payload: &SimulationPayload,
    model: &RigModel,
    layout: &RigLayout,
    disp: Vec<Vector3<f64>>,
    opts: &SolveOptions,
) -> Result<StateOutcome> {
    let Some(sails) = layout.sails.as_ref() else {
        return run_relaxation_on(model, &disp, &relaxation_config(payload, opts));
    };

    let internal: HashSet<usize> = sails.internal_nodes.iter().copied().collect();
    let interface: HashSet<usize> = sails.interface_nodes.iter().copied().collect();
    let rig_free: HashSet<usize> = model
        .nodes
        .iter()
        .filter(|n| !n.fixed && !internal.contains(&n.id) && !interface.contains(&n.id))
        .map(|n| n.id)
        .collect();

    let pressure = model.pressure.map(|p| p.pressure.abs()).unwrap_or(0.0);
    let rounds = if pressure < 1.0 {
        1
    } else {
        payload.solver.fsi_iterations.unwrap_or(3) as usize
    };

    let mut disp = disp;
    let mut iterations = 0usize;
    let mut history = Vec::new();

    let rig_newton = {
        let mut c = newton_config(payload, true, opts);
        c.max_iterations = c.max_iterations.min(300);
        c
    };
    let dr_config = relaxation_config(payload, opts);

    for round in 0..rounds {
        // Phase A: freeze the sail interior, solve the rig with Newton.
        let model_a = with_frozen(model, &internal, &disp);
        let out_a = run_newton_on(&model_a, &disp, &rig_newton)?;
        iterations += out_a.iterations;
        if out_a.is_finite() {
            disp = out_a.node_disp;
        } else {
            warn!(round, "rig pass went non-finite; keeping previous state");
        }
        history.extend(out_a.history);

        // Phase B: freeze the originally-free rig nodes, relax the sails.
        let model_b = with_frozen(model, &rig_free, &disp);
        let out_b = run_relaxation_on(&model_b, &disp, &dr_config)?;
        iterations += out_b.iterations;
        if out_b.is_finite() {
            disp = out_b.node_disp;
        } else {
            warn!(round, "sail pass went non-finite; keeping previous state");
        }
        history.extend(out_b.history);
        debug!(round, grad_inf = out_b.grad_inf, "segregation round done");
    }

    // Residual of the coupled system at the merged state.
    let dofs = DofMap::build(model);
    let u = dofs.pack(&disp);
    let state = assemble(model, &dofs, &u, true)?;
    let grad_inf = state.grad_inf();
    let tolerance = payload.solver.tolerance_n * opts.tolerance_factor;

    Ok(StateOutcome {
        node_disp: disp,
        converged: grad_inf < tolerance,
        accepted: grad_inf < tolerance.max(MEMBRANE_ACCEPT_N),
        iterations,
        grad_inf,
        energy: state.energy,
        reason: None,
        history,
        solver: SolverKind::DynamicRelaxation,
    })
}

/// Build the model at the target scales and solve a single state.
pub fn solve_one_state(
    payload: &SimulationPayload,
    scales: &LoadScales,
    disp: &[Vector3<f64>],
) -> Result<(StateOutcome, RigModel, RigLayout)> {
    solve_one_state_with(payload, scales, disp, &SolveOptions::normal())
}

fn solve_one_state_with(
    payload: &SimulationPayload,
    scales: &LoadScales,
    disp: &[Vector3<f64>],
    opts: &SolveOptions,
) -> Result<(StateOutcome, RigModel, RigLayout)> {
    let (model, layout) = build_model(payload, scales)?;
    let disp_vec = if disp.len() == model.nodes.len() {
        disp.to_vec()
    } else {
        vec![Vector3::zeros(); model.nodes.len()]
    };

    let has_membranes = !model.membranes.is_empty();
    let use_fsi = payload.solver.use_segregated_fsi.unwrap_or(true);

    let outcome = if has_membranes && scales.load > 0.05 && use_fsi {
        solve_segregated(payload, &model, &layout, disp_vec, opts)?
    } else if has_membranes || payload.solver.use_dynamic_relaxation.unwrap_or(false) {
        run_relaxation_on(&model, &disp_vec, &relaxation_config(payload, opts))?
    } else {
        let out = run_newton_on(&model, &disp_vec, &newton_config(payload, false, opts))?;
        if out.reason.as_deref() == Some("singular_tangent") && dr_configured(payload) {
            warn!("tangent singular, falling back to dynamic relaxation");
            run_relaxation_on(&model, &disp_vec, &relaxation_config(payload, opts))?
        } else {
            out
        }
    };
    Ok((outcome, model, layout))
}

const MIN_STEP: f64 = 1.0 / 512.0;

/// Residual band accepted for membrane-coupled states even short of the
/// nominal tolerance.
const MEMBRANE_ACCEPT_N: f64 = 50.0;

/// The three-phase continuation schedule.
fn phases(payload: &SimulationPayload) -> [(&'static str, usize, fn(f64) -> LoadScales); 3] {
    let pre = payload.solver.pretension_steps as usize;
    let load = payload.solver.load_steps as usize;
    [
        ("standing_pretension", pre, |l| LoadScales::new(l, 0.0, 0.0)),
        ("jib_halyard", pre, |l| LoadScales::new(1.0, l, 0.0)),
        ("sailing_load", load, |l| LoadScales::new(1.0, 1.0, l)),
    ]
}

/// Run the full three-phase continuation.
pub fn run_continuation(
    payload: &SimulationPayload,
    should_cancel: &dyn Fn() -> bool,
) -> Result<ContinuationResult> {
    // Probe build fixes the node layout (it never depends on the scales).
    let (probe_model, probe_layout) = build_model(payload, &LoadScales::ZERO)?;
    let mut disp = vec![Vector3::zeros(); probe_model.nodes.len()];
    let mut prebend_disp = None;
    let mut history = Vec::new();
    let mut total_iterations = 0usize;
    let mut final_outcome: Option<StateOutcome> = None;
    let mut final_build = (probe_model, probe_layout);

    for (phase_name, steps, to_scales) in phases(payload) {
        let mut lambda = 0.0f64;
        let mut step = 1.0 / steps.max(1) as f64;
        let mut halved = false;

        while lambda < 1.0 - 1e-12 {
            if should_cancel() {
                return Ok(ContinuationResult {
                    ok: false,
                    reason: Some("cancelled".to_string()),
                    disp,
                    prebend_disp,
                    history,
                    final_outcome,
                    total_iterations,
                    model: final_build.0,
                    layout: final_build.1,
                });
            }
            let target = (lambda + step).min(1.0);
            let scales = to_scales(target);
            let (outcome, _, _) = solve_one_state(payload, &scales, &disp)?;
            total_iterations += outcome.iterations;
            let usable = outcome.accepted && outcome.is_finite();

            history.push(StepRecord {
                phase: phase_name.to_string(),
                lambda: target,
                converged: outcome.converged,
                iterations: outcome.iterations,
                grad_inf: outcome.grad_inf,
                reason: if outcome.is_finite() {
                    outcome.reason.clone()
                } else {
                    Some("numerical_instability_nan".to_string())
                },
                convergence_history: outcome.history.clone(),
            });

            if usable {
                let mut accepted = outcome;
                if halved && accepted.iterations == 0 {
                    // A zero-iteration accept right after halving smells
                    // like a stale warm start: polish at 1/4 tolerance.
                    let (polish, _, _) =
                        solve_one_state_with(payload, &scales, &disp, &SolveOptions::polish())?;
                    total_iterations += polish.iterations;
                    if polish.is_finite() && polish.grad_inf < accepted.grad_inf {
                        debug!(phase = phase_name, lambda = target, "polish improved residual");
                        accepted = polish;
                    }
                }
                disp = accepted.node_disp.clone();
                lambda = target;
            } else {
                step *= 0.5;
                halved = true;
                debug!(
                    phase = phase_name,
                    lambda = target,
                    step,
                    "step rejected, halving"
                );
                if step < MIN_STEP {
                    return Ok(ContinuationResult {
                        ok: false,
                        reason: Some(format!("step_underflow_in_{phase_name}")),
                        disp,
                        prebend_disp,
                        history,
                        final_outcome,
                        total_iterations,
                        model: final_build.0,
                        layout: final_build.1,
                    });
                }
            }
        }

        // Exact-target handoff solve.
        let scales = to_scales(1.0);
        let (outcome, model, layout) = solve_one_state(payload, &scales, &disp)?;
        total_iterations += outcome.iterations;
        history.push(StepRecord {
            phase: phase_name.to_string(),
            lambda: 1.0,
            converged: outcome.converged,
            iterations: outcome.iterations,
            grad_inf: outcome.grad_inf,
            reason: outcome.reason.clone(),
            convergence_history: outcome.history.clone(),
        });
        if outcome.is_finite() {
            disp = outcome.node_disp.clone();
        }
        if phase_name == "jib_halyard" {
            prebend_disp = Some(disp.clone());
        }
        final_outcome = Some(outcome);
        final_build = (model, layout);
    }

    Ok(ContinuationResult {
        ok: true,
        reason: None,
        disp,
        prebend_disp,
        history,
        final_outcome,
        total_iterations,
        model: final_build.0,
        layout: final_build.1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig_builder::baseline_payload;

    #[test]
    fn rig_only_continuation_reaches_full_load() {
        let payload = baseline_payload();
        let result = run_continuation(&payload, &|| false).unwrap();
        assert!(result.ok, "continuation failed: {:?}", result.reason);
        let last = result.final_outcome.as_ref().unwrap();
        assert!(last.converged, "final residual {}", last.grad_inf);
        // All three phases plus handoffs recorded.
        let phases_seen: Vec<&str> = result
            .history
            .iter()
            .map(|h| h.phase.as_str())
            .collect();
        assert!(phases_seen.contains(&"standing_pretension"));
        assert!(phases_seen.contains(&"jib_halyard"));
        assert!(phases_seen.contains(&"sailing_load"));
        assert!(result.prebend_disp.is_some());
    }

    #[test]
    fn cancellation_stops_between_steps() {
        let payload = baseline_payload();
        let result = run_continuation(&payload, &|| true).unwrap();
        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("cancelled"));
    }

    #[test]
    fn single_state_solve_is_reusable() {
        let payload = baseline_payload();
        let scales = LoadScales::new(1.0, 0.0, 0.0);
        let (out, model, _) = solve_one_state(&payload, &scales, &[]).unwrap();
        assert_eq!(out.node_disp.len(), model.nodes.len());
        assert!(out.converged);
        assert_eq!(out.solver, SolverKind::Newton);
    }
}
