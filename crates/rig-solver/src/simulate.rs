//! Single entry point: validate, run the continuation, extract results.

use std::collections::BTreeMap;

use tracing::{info, warn};

use rig_model::{validate, Diagnostics, Outputs, SimulationPayload, SimulationResult};

use crate::constants;
use crate::continuation::{run_continuation, ContinuationResult, SolverKind};
use crate::error::SolveError;
use crate::results::{build_outputs, final_state};

fn constants_map(cont: Option<&ContinuationResult>) -> BTreeMap<String, f64> {
    let mut map = BTreeMap::new();
    map.insert("mastEA".to_string(), constants::MAST_EA);
    map.insert("spreaderEA".to_string(), constants::SPREADER_EA);
    map.insert("wireEA".to_string(), constants::WIRE_EA);
    map.insert("boomEA".to_string(), constants::BOOM_EA);
    map.insert("boomEI".to_string(), constants::BOOM_EI);
    map.insert("stayMinTensionN".to_string(), constants::STAY_MIN_TENSION_N);
    map.insert(
        "partnersRampTensionN".to_string(),
        constants::PARTNERS_RAMP_TENSION_N,
    );
    map.insert("downwindFactor".to_string(), constants::DOWNWIND_FACTOR);
    map.insert(
        "drPositionClampM".to_string(),
        constants::DR_POSITION_CLAMP_M,
    );
    if let Some(cont) = cont {
        map.insert("stayTargetN".to_string(), cont.layout.stay_target_n);
        if let Some(first) = cont.model.membranes.first() {
            map.insert("membranePrestressPa".to_string(), first.material.prestress);
            map.insert(
                "membraneWrinklingEps".to_string(),
                first.material.wrinkling_eps,
            );
        }
        if let Some(p) = cont.model.pressure {
            map.insert("effectivePressurePa".to_string(), p.pressure);
        }
    }
    map
}

fn failure_result(
    payload: &SimulationPayload,
    reason: String,
    outputs: Outputs,
    diagnostics: Diagnostics,
) -> SimulationResult {
    SimulationResult {
        ok: false,
        converged: false,
        iterations: 0,
        iterations_last: 0,
        energy: 0.0,
        grad_inf: f64::INFINITY,
        solver: SolverKind::Newton.as_str().to_string(),
        reason: Some(reason),
        outputs,
        diagnostics,
        inputs: payload.clone(),
    }
}

/// Run a simulation with a cooperative cancellation hook, polled between
/// continuation steps.
pub fn simulate_with_options(
    payload: &SimulationPayload,
    should_cancel: &dyn Fn() -> bool,
) -> SimulationResult {
    if let Err(err) = validate(payload) {
        return failure_result(
            payload,
            err.to_string(),
            Outputs::default(),
            Diagnostics {
                constants: constants_map(None),
                ..Default::default()
            },
        );
    }

    let cont = match run_continuation(payload, should_cancel) {
        Ok(cont) => cont,
        Err(err) => {
            warn!(error = %err, "continuation aborted");
            return failure_result(
                payload,
                err.to_string(),
                Outputs::default(),
                Diagnostics {
                    constants: constants_map(None),
                    ..Default::default()
                },
            );
        }
    };

    // One more assembly at the final state for tensions, reactions and the
    // slack set. An explosion here still surfaces the curves we have.
    let state = match final_state(&cont) {
        Ok(state) => state,
        Err(err) => {
            let reason = match &err {
                SolveError::NumericalExplosion { element, magnitude } => {
                    format!("numerical explosion in `{element}` ({magnitude:.3e} N)")
                }
                other => other.to_string(),
            };
            return failure_result(
                payload,
                reason,
                Outputs::default(),
                Diagnostics {
                    history: cont.history.clone(),
                    constants: constants_map(Some(&cont)),
                    ..Default::default()
                },
            );
        }
    };

    let outputs = build_outputs(&cont, &state);
    let (converged, iterations_last, energy, grad_inf, solver, mut reason) =
        match cont.final_outcome.as_ref() {
            Some(out) => (
                out.converged,
                out.iterations,
                out.energy,
                out.grad_inf,
                out.solver,
                out.reason.clone(),
            ),
            // No phase finished; report the state we actually stopped in.
            None => (
                false,
                0,
                state.energy,
                state.grad_inf(),
                SolverKind::Newton,
                None,
            ),
        };
    if !cont.ok {
        reason = cont.reason.clone().or(reason);
    }

    let diagnostics = Diagnostics {
        slack_cables: state.meta.slack_cables.clone(),
        history: cont.history.clone(),
        constants: constants_map(Some(&cont)),
        convergence_history: cont
            .final_outcome
            .as_ref()
            .map(|o| o.history.clone())
            .unwrap_or_default(),
    };

    info!(
        converged,
        grad_inf,
        iterations = cont.total_iterations,
        solver = solver.as_str(),
        "simulation finished"
    );

    SimulationResult {
        ok: cont.ok,
        converged,
        iterations: cont.total_iterations,
        iterations_last,
        energy,
        grad_inf,
        solver: solver.as_str().to_string(),
        reason,
        outputs,
        diagnostics,
        inputs: payload.clone(),
    }
}

/// Run a simulation to completion.
pub fn simulate(payload: &SimulationPayload) -> SimulationResult {
    simulate_with_options(payload, &|| false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig_builder::baseline_payload;

    #[test]
    fn baseline_simulation_succeeds() {
        let payload = baseline_payload();
        let result = simulate(&payload);
        assert!(result.ok, "reason: {:?}", result.reason);
        assert!(result.converged);
        assert_eq!(result.solver, "newton");
        assert!(result.grad_inf < payload.solver.tolerance_n);
        assert!(!result.diagnostics.history.is_empty());
        assert!(result.diagnostics.constants.contains_key("mastEA"));
    }

    #[test]
    fn invalid_payload_fails_before_computation() {
        let mut payload = baseline_payload();
        payload.solver.tolerance_n = -1.0;
        let result = simulate(&payload);
        assert!(!result.ok);
        assert!(result.reason.is_some());
        assert!(result.outputs.mast_curve_loaded.is_empty());
    }

    #[test]
    fn result_serializes_with_camel_case_keys() {
        let payload = baseline_payload();
        let result = simulate(&payload);
        let text = serde_json::to_string(&result).unwrap();
        assert!(text.contains("mastCurveLoaded"));
        assert!(text.contains("gradInf"));
        assert!(text.contains("shroudPortN"));
        assert!(text.contains("openMagnitude"));
    }
}
