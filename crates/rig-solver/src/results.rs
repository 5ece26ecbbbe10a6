//! Result extraction: curves, tensions, reactions and the global force
//! balance.

use nalgebra::Vector3;

use rig_model::{
    CableCurves, EquilibriumReport, Outputs, PointXyz, SailGrids, SailSurfaces, Spreaders,
    SpringForce, Tensions,
};

use crate::assembly::{assemble, AssembledState};
use crate::constants;
use crate::continuation::ContinuationResult;
use crate::error::Result;
use crate::model::{DofMap, RigModel};

fn point(p: &Vector3<f64>) -> PointXyz {
    PointXyz::new(p.x, p.y, p.z)
}

fn curve(model: &RigModel, nodes: &[usize], disp: &[Vector3<f64>]) -> Vec<PointXyz> {
    nodes
        .iter()
        .map(|&n| point(&(model.nodes[n].p0 + disp[n])))
        .collect()
}

fn grid_positions(
    model: &RigModel,
    grid: &[Vec<usize>],
    disp: &[Vector3<f64>],
) -> Vec<Vec<[f64; 3]>> {
    grid.iter()
        .map(|row| {
            row.iter()
                .map(|&n| {
                    let p = model.nodes[n].p0 + disp[n];
                    [p.x, p.y, p.z]
                })
                .collect()
        })
        .collect()
}

fn sail_grids(cont: &ContinuationResult, disp: &[Vector3<f64>]) -> SailGrids {
    let mut grids = SailGrids::default();
    if let Some(sails) = cont.layout.sails.as_ref() {
        if let Some(main) = sails.main_grid.as_ref() {
            grids.main = Some(grid_positions(&cont.model, main, disp));
        }
        if let Some(jib) = sails.jib_grid.as_ref() {
            grids.jib = Some(grid_positions(&cont.model, jib, disp));
        }
    }
    grids
}

/// Assemble the final state once more for bookkeeping (tensions, reactions,
/// slack set, pressure forces).
pub fn final_state(cont: &ContinuationResult) -> Result<AssembledState> {
    let dofs = DofMap::build(&cont.model);
    let u = dofs.pack(&cont.disp);
    assemble(&cont.model, &dofs, &u, true)
}

fn axial(state: &AssembledState, name: &str) -> f64 {
    state.meta.axial_forces.get(name).copied().unwrap_or(0.0)
}

/// Global balance, open (solver mast-step reaction) and closed (mast-step
/// reaction chosen so the sum vanishes).
fn equilibrium_report(cont: &ContinuationResult, state: &AssembledState) -> EquilibriumReport {
    let model = &cont.model;

    let mut external = Vector3::zeros();
    for &(_, f) in &model.applied_forces {
        external += f;
    }
    for f in state.meta.pressure_forces.values() {
        external += *f;
    }

    let partners = state
        .meta
        .spring_forces
        .get("partners")
        .copied()
        .unwrap_or_else(Vector3::zeros);

    let mast_step_open = state
        .meta
        .reactions
        .get("mast_step")
        .copied()
        .unwrap_or_else(Vector3::zeros);
    let mut other_reactions = Vector3::zeros();
    for (label, r) in &state.meta.reactions {
        if label != "mast_step" {
            other_reactions += *r;
        }
    }

    let open_sum = external + other_reactions + partners + mast_step_open;
    let mast_step_closed = -(external + other_reactions + partners);
    let closed_sum = external + other_reactions + partners + mast_step_closed;

    let tol = constants::EQUILIBRIUM_TOLERANCE_N;
    EquilibriumReport {
        external_fx: external.x,
        external_fy: external.y,
        external_fz: external.z,
        reactions_rx: other_reactions.x,
        reactions_ry: other_reactions.y,
        reactions_rz: other_reactions.z,
        partners_rx: partners.x,
        partners_ry: partners.y,
        partners_rz: partners.z,
        mast_step_rx: mast_step_closed.x,
        mast_step_ry: mast_step_closed.y,
        mast_step_rz: mast_step_closed.z,
        sum_fx: closed_sum.x,
        sum_fy: closed_sum.y,
        sum_fz: closed_sum.z,
        magnitude: closed_sum.norm(),
        is_balanced: closed_sum.norm() < tol,
        open_sum_fx: open_sum.x,
        open_sum_fy: open_sum.y,
        open_sum_fz: open_sum.z,
        open_magnitude: open_sum.norm(),
        open_is_balanced: open_sum.norm() < tol,
    }
}

/// Build the physical outputs from a finished (or partially finished)
/// continuation.
pub fn build_outputs(cont: &ContinuationResult, state: &AssembledState) -> Outputs {
    let model = &cont.model;
    let layout = &cont.layout;
    let zero = vec![Vector3::zeros(); model.nodes.len()];
    let prebend = cont.prebend_disp.as_deref().unwrap_or(&zero);

    let tensions = {
        let measured_stay = layout
            .stay_elems
            .first()
            .map(|n| axial(state, n))
            .unwrap_or(0.0);
        let forestay_n = if layout.stay_locked {
            layout.stay_target_n
        } else {
            measured_stay
        };
        Tensions {
            shroud_port_n: layout
                .shroud_port_elems
                .first()
                .map(|n| axial(state, n))
                .unwrap_or(0.0),
            shroud_stbd_n: layout
                .shroud_stbd_elems
                .first()
                .map(|n| axial(state, n))
                .unwrap_or(0.0),
            forestay_n,
            halyard_n: measured_stay,
        }
    };

    let spreaders = Spreaders {
        port_axial_n: axial(state, "spreader_port"),
        stbd_axial_n: axial(state, "spreader_stbd"),
        tip_port: Some(point(
            &(model.nodes[layout.tip_port].p0 + cont.disp[layout.tip_port]),
        )),
        tip_stbd: Some(point(
            &(model.nodes[layout.tip_stbd].p0 + cont.disp[layout.tip_stbd]),
        )),
        root: Some(point(
            &(model.nodes[layout.spreader_root].p0 + cont.disp[layout.spreader_root]),
        )),
    };

    let reactions = state
        .meta
        .reactions
        .iter()
        .map(|(label, r)| (label.clone(), [r.x, r.y, r.z]))
        .collect();
    let springs_forces = state
        .meta
        .spring_forces
        .iter()
        .map(|(name, f)| {
            (
                name.clone(),
                SpringForce {
                    fx: f.x,
                    fy: f.y,
                    fz: f.z,
                },
            )
        })
        .collect();

    let sails = layout.sails.as_ref().map(|_| SailSurfaces {
        relaxed: sail_grids(cont, &zero),
        prebend: sail_grids(cont, prebend),
        loaded: sail_grids(cont, &cont.disp),
    });

    Outputs {
        mast_curve_relaxed: curve(model, &layout.mast_nodes, &zero),
        mast_curve_prebend: curve(model, &layout.mast_nodes, prebend),
        mast_curve_loaded: curve(model, &layout.mast_nodes, &cont.disp),
        cable_curves: CableCurves {
            shroud_port: curve(model, &layout.shroud_port_nodes, &cont.disp),
            shroud_stbd: curve(model, &layout.shroud_stbd_nodes, &cont.disp),
            stay_jib: curve(model, &layout.stay_nodes, &cont.disp),
        },
        sails,
        tensions,
        spreaders,
        reactions,
        springs_forces,
        equilibrium: equilibrium_report(cont, state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::run_continuation;
    use crate::rig_builder::baseline_payload;

    #[test]
    fn outputs_cover_the_mast_and_cables() {
        let payload = baseline_payload();
        let cont = run_continuation(&payload, &|| false).unwrap();
        let state = final_state(&cont).unwrap();
        let outputs = build_outputs(&cont, &state);

        assert_eq!(outputs.mast_curve_relaxed.len(), 21);
        assert_eq!(outputs.mast_curve_loaded.len(), 21);
        assert_eq!(outputs.cable_curves.shroud_port.len(), 3);
        assert!(outputs.tensions.shroud_port_n > 0.0);
        assert!(outputs.reactions.contains_key("chainplate_port"));
        assert!(outputs.springs_forces.contains_key("partners"));
    }

    #[test]
    fn closed_balance_vanishes_and_open_is_small_when_converged() {
        let payload = baseline_payload();
        let cont = run_continuation(&payload, &|| false).unwrap();
        let state = final_state(&cont).unwrap();
        let eq = build_outputs(&cont, &state).equilibrium;

        assert!(eq.magnitude < 1e-9, "closed sum must vanish by construction");
        assert!(eq.is_balanced);
        assert!(
            eq.open_magnitude < constants::EQUILIBRIUM_TOLERANCE_N,
            "open residual {} exceeds threshold",
            eq.open_magnitude
        );
    }

    #[test]
    fn relaxed_curve_is_straight() {
        let payload = baseline_payload();
        let cont = run_continuation(&payload, &|| false).unwrap();
        let state = final_state(&cont).unwrap();
        let outputs = build_outputs(&cont, &state);
        for p in &outputs.mast_curve_relaxed {
            assert!(p.x.abs() < 1e-12 && p.y.abs() < 1e-12);
        }
    }
}
