//! Dynamic Relaxation with kinetic damping.
//!
//! Explicit symplectic Euler on a fictitious uniformly-massed system,
//! driven toward the static minimum by viscous damping plus velocity
//! resets at kinetic-energy peaks. The running time step is capped every
//! iteration by stability bounds (gradient magnitude, displacement-
//! implied stiffness), cut whenever the iteration misbehaves (residual
//! growth, force spikes, health drops, NaNs) and allowed to creep back
//! toward the caps while iterations stay clean.
//!
//! O(n) per step; no tangent is ever assembled, which is what makes it
//! the driver of choice once membrane DOFs dominate.

use nalgebra::DVector;
use serde::Serialize;
use tracing::{debug, warn};

use rig_model::IterationRecord;

use crate::assembly::assemble;
use crate::constants;
use crate::error::Result;
use crate::model::{DofMap, RigModel};

/// Dynamic Relaxation settings.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RelaxationConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the gradient infinity norm [N].
    pub tolerance: f64,
    /// Base (and ceiling) time step.
    pub time_step: f64,
    /// Per-DOF displacement cap per step [m].
    pub max_step: f64,
    /// Scales every stability bound; smaller is safer.
    pub stability_factor: f64,
    pub warmup_iters: usize,
    /// Viscous damping fraction removed from the velocity each step.
    pub viscous_damping: f64,
    /// Fraction of the last step rolled back at a kinetic-energy peak.
    pub kinetic_backtrack: f64,
    /// Fictitious nodal mass.
    pub fixed_mass: f64,
    pub nan_shrink: f64,
    pub nan_max_retries: usize,
    /// Relative growth that counts as a residual increase.
    pub residual_increase_tol: f64,
    /// Consecutive increases tolerated before backing off.
    pub residual_increase_max: usize,
    /// Single-step growth factor treated as a spike.
    pub residual_spike_factor: f64,
    /// Absolute displacement bound; DOFs beyond it are rolled back.
    pub position_clamp: f64,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 4000,
            tolerance: 1.0,
            time_step: constants::DR_TIME_STEP,
            max_step: constants::DR_MAX_STEP_M,
            stability_factor: constants::DR_STABILITY_FACTOR,
            warmup_iters: constants::DR_WARMUP_ITERS,
            viscous_damping: constants::DR_VISCOUS_DAMPING,
            kinetic_backtrack: constants::DR_KINETIC_BACKTRACK,
            fixed_mass: constants::DR_FIXED_MASS,
            nan_shrink: 0.25,
            nan_max_retries: 8,
            residual_increase_tol: 0.05,
            residual_increase_max: 3,
            residual_spike_factor: 3.0,
            position_clamp: constants::DR_POSITION_CLAMP_M,
        }
    }
}

/// Health and trouble counters reported alongside the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelaxationDiagnostics {
    pub kinetic_peaks: usize,
    pub nan_retries: usize,
    pub force_spikes: usize,
    pub final_health: f64,
}

/// Result of one Dynamic Relaxation run.
#[derive(Debug, Clone)]
pub struct RelaxationOutcome {
    pub displacement: DVector<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub grad_inf: f64,
    pub energy: f64,
    pub reason: Option<String>,
    pub history: Vec<IterationRecord>,
    pub diagnostics: RelaxationDiagnostics,
}

const FORCE_SPIKE_RATIO: f64 = 100.0;
const HEALTH_AGGRESSIVE: f64 = 0.7;
const HEALTH_GENTLE: f64 = 0.9;
const HEALTH_DROPS_MAX: usize = 3;

/// Run Dynamic Relaxation from `u0`.
pub fn solve_relaxation(
    model: &RigModel,
    dofs: &DofMap,
    u0: DVector<f64>,
    config: &RelaxationConfig,
) -> Result<RelaxationOutcome> {
    let n = dofs.num_dofs;
    let mut u = u0;
    let mut v = DVector::zeros(n);
    let mut u_prev = u.clone();
    let mut g_prev: Option<DVector<f64>> = None;

    // Running time step: cut by trouble events, creeping back toward the
    // stability caps when iterations stay clean.
    let mut dt = config.time_step;
    let dt_floor = config.time_step * 1e-6;
    let mut first_step = true;

    let mut best_u = u.clone();
    let mut best_grad = f64::INFINITY;
    let mut best_energy = 0.0;

    let mut prev_residual = f64::INFINITY;
    let mut prev_max_force = 0.0f64;
    let mut residual_grow_count = 0usize;
    let mut smoothed_health = 1.0f64;
    let mut prev_health = 1.0f64;
    let mut health_drop_count = 0usize;
    let mut nan_round = 0usize;

    let mut diag = RelaxationDiagnostics {
        final_health: 1.0,
        ..Default::default()
    };
    let mut history = Vec::new();
    let mut reason: Option<String> = None;

    let back_off = |u: &mut DVector<f64>,
                    v: &mut DVector<f64>,
                    u_prev: &DVector<f64>,
                    dt: &mut f64| {
        u.copy_from(u_prev);
        v.fill(0.0);
        *dt *= 0.5;
    };

    let mut iter = 0usize;
    while iter < config.max_iterations {
        let state = assemble(model, dofs, &u, true)?;

        // NaN recovery: rewind, shrink, retry.
        let finite = state.energy.is_finite() && state.gradient.iter().all(|x| x.is_finite());
        if !finite {
            diag.nan_retries += 1;
            nan_round += 1;
            warn!(iter, nan_round, "non-finite state, rewinding");
            if nan_round > config.nan_max_retries {
                reason = Some("numerical_instability_nan".to_string());
                break;
            }
            u.copy_from(&u_prev);
            v.fill(0.0);
            dt = (dt * config.nan_shrink).max(dt_floor);
            iter += 1;
            continue;
        }
        nan_round = 0;

        let grad_inf = state.grad_inf();
        history.push(IterationRecord {
            iter,
            residual: grad_inf,
            energy: state.energy,
            damping: None,
            max_dof: u.amax(),
        });
        if grad_inf < best_grad {
            best_grad = grad_inf;
            best_energy = state.energy;
            best_u.copy_from(&u);
        }
        if grad_inf < config.tolerance {
            diag.final_health = smoothed_health;
            return Ok(RelaxationOutcome {
                displacement: u,
                converged: true,
                iterations: iter,
                grad_inf,
                energy: state.energy,
                reason: None,
                history,
                diagnostics: diag,
            });
        }

        // Residual spike / sustained growth monitors.
        if iter > 0 && grad_inf > prev_residual * config.residual_spike_factor {
            debug!(iter, grad_inf, prev_residual, "residual spike, backing off");
            back_off(&mut u, &mut v, &u_prev, &mut dt);
            prev_residual = grad_inf;
            residual_grow_count = 0;
            iter += 1;
            continue;
        }
        if grad_inf > prev_residual * (1.0 + config.residual_increase_tol) {
            residual_grow_count += 1;
        } else {
            residual_grow_count = 0;
        }
        if residual_grow_count >= config.residual_increase_max {
            back_off(&mut u, &mut v, &u_prev, &mut dt);
            prev_residual = grad_inf;
            residual_grow_count = 0;
            iter += 1;
            continue;
        }
        prev_residual = grad_inf;

        // Element force spikes shrink the step without rewinding.
        let max_force = state.meta.max_element_force;
        if prev_max_force > 0.0 && max_force / prev_max_force >= FORCE_SPIKE_RATIO {
            diag.force_spikes += 1;
            dt *= 0.5;
        }
        prev_max_force = max_force;

        // Smoothed health from the force evaluator.
        smoothed_health = 0.5 * smoothed_health + 0.5 * state.meta.health_ratio;
        if smoothed_health < HEALTH_AGGRESSIVE {
            dt *= 0.25;
        } else if smoothed_health < HEALTH_GENTLE && iter > config.warmup_iters {
            dt *= 0.75;
        }
        if state.meta.health_ratio < prev_health - 1e-12 {
            health_drop_count += 1;
        } else {
            health_drop_count = 0;
        }
        prev_health = state.meta.health_ratio;
        if health_drop_count >= HEALTH_DROPS_MAX {
            back_off(&mut u, &mut v, &u_prev, &mut dt);
            health_drop_count = 0;
            iter += 1;
            continue;
        }

        // Stability caps; the running step creeps back toward them after
        // trouble-driven cuts.
        let mut dt_cap = config.time_step;
        if grad_inf > 0.0 {
            let dt_safe = (config.max_step * config.fixed_mass / grad_inf).sqrt();
            if first_step {
                dt_cap = dt_cap.min(0.5 * dt_safe);
            }
            let dt_acc = (config.stability_factor * config.max_step * config.fixed_mass
                / grad_inf)
                .sqrt();
            dt_cap = dt_cap.min(dt_acc);
        }
        if let Some(gp) = &g_prev {
            // Displacement-implied stiffness |dg| / |du| per DOF.
            let mut k_est = 0.0f64;
            for i in 0..n {
                let du_i = (u[i] - u_prev[i]).abs();
                if du_i > 1e-12 {
                    k_est = k_est.max((state.gradient[i] - gp[i]).abs() / du_i);
                }
            }
            if k_est > 0.0 {
                let dt_stiff =
                    config.stability_factor * 2.0 * (config.fixed_mass / k_est).sqrt();
                dt_cap = dt_cap.min(dt_stiff);
            }
        }
        dt = (dt * 1.05).min(dt_cap).max(dt_floor);
        first_step = false;
        g_prev = Some(state.gradient.clone());
        u_prev.copy_from(&u);

        // Symplectic Euler with viscous damping; heavier during warmup.
        let visc = if iter < config.warmup_iters {
            (4.0 * config.viscous_damping).min(0.3)
        } else {
            config.viscous_damping
        };
        v *= 1.0 - visc;
        v -= &state.gradient * (dt / config.fixed_mass);

        let v_cap = config.max_step / dt;
        for i in 0..n {
            v[i] = v[i].clamp(-v_cap, v_cap);
        }
        let mut clamped = 0usize;
        for i in 0..n {
            let mut du_i = v[i] * dt;
            if du_i.abs() > config.max_step {
                du_i = config.max_step.copysign(du_i);
                v[i] = du_i / dt;
            }
            let next = u[i] + du_i;
            if !next.is_finite() || next.abs() > config.position_clamp {
                v[i] = 0.0;
                clamped += 1;
                continue;
            }
            u[i] = next;
        }
        if clamped > 0 {
            warn!(iter, clamped, "DOFs hit the position clamp and were rolled back");
        }

        // Kinetic damping: a power sign flip marks a kinetic-energy peak.
        let power = -state.gradient.dot(&v);
        if power < 0.0 && iter > 5 {
            let kb = config.kinetic_backtrack;
            u.zip_apply(&u_prev, |ui, upi| *ui += kb * (upi - *ui));
            v.fill(0.0);
            dt *= 0.5;
            diag.kinetic_peaks += 1;
        }

        iter += 1;
    }

    diag.final_health = smoothed_health;
    Ok(RelaxationOutcome {
        displacement: best_u,
        converged: false,
        iterations: iter,
        grad_inf: best_grad,
        energy: best_energy,
        reason: reason.or_else(|| Some("max_iterations".to_string())),
        history,
        diagnostics: diag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::axial::Bar;
    use crate::model::RigModel;
    use nalgebra::Vector3;

    fn loaded_bar() -> (RigModel, DofMap) {
        let mut model = RigModel::new();
        let a = model.add_node("ground", Vector3::zeros(), true);
        let b = model.add_node("tip", Vector3::new(1.0, 0.0, 0.0), false);
        model.bars.push(Bar {
            name: "bar".to_string(),
            i: a,
            j: b,
            ea: 1.0e4,
            l0: 1.0,
        });
        model.add_applied_force(b, Vector3::new(20.0, 0.0, 0.0));
        let dofs = DofMap::build(&model);
        (model, dofs)
    }

    #[test]
    fn relaxes_a_loaded_bar_to_equilibrium() {
        let (model, dofs) = loaded_bar();
        let config = RelaxationConfig {
            tolerance: 1e-3,
            max_iterations: 20_000,
            ..Default::default()
        };
        let out = solve_relaxation(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        assert!(out.converged, "DR should settle, residual {}", out.grad_inf);
        // u = F/k = 20 / 1e4 = 2e-3.
        assert!((out.displacement[0] - 2e-3).abs() < 1e-4);
    }

    #[test]
    fn converged_state_is_recognised_immediately() {
        let (model, dofs) = loaded_bar();
        let config = RelaxationConfig {
            tolerance: 1e-3,
            max_iterations: 20_000,
            ..Default::default()
        };
        let first =
            solve_relaxation(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        let again = solve_relaxation(&model, &dofs, first.displacement, &config).unwrap();
        assert!(again.converged);
        assert_eq!(again.iterations, 0);
    }

    #[test]
    fn reports_best_residual_when_budget_runs_out() {
        let (model, dofs) = loaded_bar();
        let config = RelaxationConfig {
            tolerance: 1e-12,
            max_iterations: 40,
            ..Default::default()
        };
        let out = solve_relaxation(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        assert!(!out.converged);
        assert_eq!(out.reason.as_deref(), Some("max_iterations"));
        assert!(out.grad_inf.is_finite());
        assert!(!out.history.is_empty());
    }
}
