//! Damped Newton driver with an energy-monotone line search.
//!
//! Solves `(K + lambda I) du = -g` with a Levenberg-style diagonal shift,
//! escalating `lambda` tenfold on singular factorisations. Accepted steps
//! relax the damping toward a slowly decaying floor; rejected steps inflate
//! it and fall back to a Cauchy (steepest descent) step.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use tracing::debug;

use rig_model::IterationRecord;

use crate::assembly::{assemble, energy_at};
use crate::error::Result;
use crate::model::{DofMap, RigModel};

/// Newton driver settings.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the gradient infinity norm [N].
    pub tolerance: f64,
    pub initial_damping: f64,
    /// Floor the damping decays toward as steps are accepted.
    pub damping_floor: f64,
    pub damping_decay: f64,
    /// Optional trust-region cap on the step infinity norm [m].
    pub step_cap: Option<f64>,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            tolerance: 1.0,
            initial_damping: 1e-3,
            damping_floor: 1e-9,
            damping_decay: 0.9,
            step_cap: None,
        }
    }
}

impl NewtonConfig {
    /// Settings tuned for membrane-coupled problems: heavy initial damping
    /// with a slowly decaying floor.
    pub fn for_sail_problems(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            initial_damping: 10.0,
            damping_floor: 10.0,
            damping_decay: 0.98,
            step_cap: Some(0.05),
        }
    }
}

/// Result of one Newton run.
#[derive(Debug, Clone)]
pub struct NewtonOutcome {
    pub displacement: DVector<f64>,
    pub converged: bool,
    /// Iterations performed before convergence or exhaustion.
    pub iterations: usize,
    pub grad_inf: f64,
    pub energy: f64,
    pub reason: Option<String>,
    pub history: Vec<IterationRecord>,
}

const LAMBDA_MAX: f64 = 1e8;
const LINE_SEARCH_HALVINGS: usize = 10;
const CAUCHY_HALVINGS: usize = 18;
const ENERGY_SLACK: f64 = 1e-6;

/// Factor `(K + lambda I)` and solve; escalates lambda on singularity.
/// Returns the step and the lambda that worked, or `None` past the cap.
fn damped_solve(
    k: &DMatrix<f64>,
    g: &DVector<f64>,
    mut lambda: f64,
) -> Option<(DVector<f64>, f64)> {
    let n = k.nrows();
    let rhs = -g.clone();
    loop {
        let mut kd = k.clone();
        for i in 0..n {
            kd[(i, i)] += lambda;
        }
        if let Some(du) = kd.lu().solve(&rhs) {
            if du.iter().all(|x| x.is_finite()) {
                return Some((du, lambda));
            }
        }
        lambda *= 10.0;
        if lambda > LAMBDA_MAX {
            return None;
        }
    }
}

/// Run damped Newton from `u0`.
pub fn solve_newton(
    model: &RigModel,
    dofs: &DofMap,
    u0: DVector<f64>,
    config: &NewtonConfig,
) -> Result<NewtonOutcome> {
    let mut u = u0;
    let mut lambda = config.initial_damping;
    let mut accepted = 0usize;
    let mut best_u = u.clone();
    let mut best_grad = f64::INFINITY;
    let mut history = Vec::new();
    let mut last_grad = f64::INFINITY;
    let mut last_energy = 0.0;

    for iter in 0..config.max_iterations {
        let state = assemble(model, dofs, &u, false)?;
        let grad_inf = state.grad_inf();
        last_grad = grad_inf;
        last_energy = state.energy;
        history.push(IterationRecord {
            iter,
            residual: grad_inf,
            energy: state.energy,
            damping: Some(lambda),
            max_dof: u.amax(),
        });

        if grad_inf < best_grad {
            best_grad = grad_inf;
            best_u.copy_from(&u);
        }
        if grad_inf < config.tolerance {
            return Ok(NewtonOutcome {
                displacement: u,
                converged: true,
                iterations: iter,
                grad_inf,
                energy: state.energy,
                reason: None,
                history,
            });
        }

        let Some(k) = state.tangent.as_ref() else {
            return Ok(NewtonOutcome {
                displacement: best_u,
                converged: false,
                iterations: iter,
                grad_inf: best_grad,
                energy: state.energy,
                reason: Some("tangent_unavailable".to_string()),
                history,
            });
        };

        let Some((mut du, lam)) = damped_solve(k, &state.gradient, lambda) else {
            debug!(iter, "tangent singular beyond damping cap");
            return Ok(NewtonOutcome {
                displacement: best_u,
                converged: false,
                iterations: iter,
                grad_inf: best_grad,
                energy: state.energy,
                reason: Some("singular_tangent".to_string()),
                history,
            });
        };
        lambda = lam;

        if let Some(cap) = config.step_cap {
            let m = du.amax();
            if m > cap {
                du *= cap / m;
            }
        }

        // Energy-monotone line search on the Newton direction.
        let mut alpha = 1.0;
        let mut took_step = false;
        for _ in 0..=LINE_SEARCH_HALVINGS {
            let trial = &u + &du * alpha;
            let e = energy_at(model, dofs, &trial)?;
            if e.is_finite() && e <= state.energy + ENERGY_SLACK {
                u = trial;
                took_step = true;
                break;
            }
            alpha *= 0.5;
        }

        if took_step {
            accepted += 1;
            let floor = config.damping_floor * config.damping_decay.powi(accepted as i32);
            lambda = (lambda * 0.5).max(floor);
            continue;
        }

        // Newton direction rejected: inflate damping and try a Cauchy step.
        lambda *= 4.0;
        let g = &state.gradient;
        let denom = (g.transpose() * k * g)[(0, 0)];
        let mut alpha_sd = if denom > 0.0 {
            g.norm_squared() / denom
        } else {
            1e-2 / g.norm().max(1e-12)
        };
        for _ in 0..CAUCHY_HALVINGS {
            let trial = &u - g * alpha_sd;
            let e = energy_at(model, dofs, &trial)?;
            if e.is_finite() && e <= state.energy + ENERGY_SLACK {
                u = trial;
                break;
            }
            alpha_sd *= 0.5;
        }
    }

    // Budget exhausted: hand back the better of current and best-so-far.
    let (displacement, grad_inf) = if best_grad < last_grad {
        (best_u, best_grad)
    } else {
        (u, last_grad)
    };
    Ok(NewtonOutcome {
        displacement,
        converged: false,
        iterations: config.max_iterations,
        grad_inf,
        energy: last_energy,
        reason: Some("max_iterations".to_string()),
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::axial::{Bar, Cable};
    use crate::model::RigModel;
    use nalgebra::Vector3;

    fn loaded_bar_model() -> (RigModel, DofMap) {
        let mut model = RigModel::new();
        let a = model.add_node("ground", Vector3::zeros(), true);
        let b = model.add_node("tip", Vector3::new(1.0, 0.0, 0.0), false);
        model.bars.push(Bar {
            name: "bar".to_string(),
            i: a,
            j: b,
            ea: 1.0e5,
            l0: 1.0,
        });
        model.add_applied_force(b, Vector3::new(100.0, 0.0, 0.0));
        let dofs = DofMap::build(&model);
        (model, dofs)
    }

    #[test]
    fn converges_on_a_linear_bar() {
        let (model, dofs) = loaded_bar_model();
        let config = NewtonConfig {
            tolerance: 1e-6,
            ..Default::default()
        };
        let out = solve_newton(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        assert!(out.converged);
        // u = F/k = 100 / 1e5 = 1e-3 m.
        assert!((out.displacement[0] - 1e-3).abs() < 1e-8);
    }

    #[test]
    fn zero_iterations_when_already_at_equilibrium() {
        let (model, dofs) = loaded_bar_model();
        let config = NewtonConfig {
            tolerance: 1e-6,
            ..Default::default()
        };
        let first = solve_newton(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        let again = solve_newton(&model, &dofs, first.displacement, &config).unwrap();
        assert!(again.converged);
        assert_eq!(again.iterations, 0);
    }

    #[test]
    fn pretensioned_cable_pair_balances() {
        // Two opposing cables pulling a node toward the middle.
        let mut model = RigModel::new();
        let a = model.add_node("left", Vector3::new(-1.0, 0.0, 0.0), true);
        let m = model.add_node("mid", Vector3::zeros(), false);
        let b = model.add_node("right", Vector3::new(1.0, 0.0, 0.0), true);
        for (name, i, j) in [("ca", a, m), ("cb", m, b)] {
            model.cables.push(Cable {
                name: name.to_string(),
                i,
                j,
                ea: 2.0e5,
                l0: 0.995, // both shortened: symmetric pretension
                compression_eps: 1e-4,
                smooth_delta: 1e-4,
            });
        }
        let dofs = DofMap::build(&model);
        let config = NewtonConfig {
            tolerance: 1e-8,
            ..Default::default()
        };
        let out = solve_newton(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        assert!(out.converged);
        assert!(out.displacement.amax() < 1e-10, "symmetric node must stay put");
    }

    #[test]
    fn reports_iteration_history() {
        let (model, dofs) = loaded_bar_model();
        let config = NewtonConfig::default();
        let out = solve_newton(&model, &dofs, DVector::zeros(dofs.num_dofs), &config).unwrap();
        assert!(!out.history.is_empty());
        assert!(out.history[0].residual >= out.grad_inf);
    }
}
