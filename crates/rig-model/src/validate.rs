//! Payload validation.
//!
//! Runs before any model is built: required scalars must be finite, integer
//! counts must be in range, and optional sail fields are checked when the
//! block is present. Enum membership is enforced by deserialization.

use thiserror::Error;

use crate::payload::{JibSail, MainSail, SailMesh, SimulationPayload};

/// Validation failure, surfaced to the caller before any computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("field `{0}` must be a finite number, got {1}")]
    NonFinite(&'static str, f64),

    #[error("field `{0}` must be positive, got {1}")]
    NonPositive(&'static str, f64),

    #[error("field `{0}` out of range: {1}")]
    OutOfRange(&'static str, String),

    #[error("sail `{0}`: {1}")]
    Sail(&'static str, String),
}

fn finite(name: &'static str, value: f64) -> Result<f64, PayloadError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PayloadError::NonFinite(name, value))
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64, PayloadError> {
    finite(name, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(PayloadError::NonPositive(name, value))
    }
}

fn finite_opt(name: &'static str, value: Option<f64>) -> Result<(), PayloadError> {
    if let Some(v) = value {
        finite(name, v)?;
    }
    Ok(())
}

fn mesh(name: &'static str, mesh: &SailMesh) -> Result<(), PayloadError> {
    if mesh.luff_segments < 1 || mesh.chord_segments < 1 {
        return Err(PayloadError::OutOfRange(
            name,
            format!(
                "mesh must have at least 1 luff and 1 chord segment, got {}x{}",
                mesh.luff_segments, mesh.chord_segments
            ),
        ));
    }
    Ok(())
}

fn check_main(main: &MainSail) -> Result<(), PayloadError> {
    finite("sails.main.draftDepth", main.draft_depth)?;
    finite("sails.main.draftPos", main.draft_pos)?;
    positive("sails.main.luffLengthM", main.luff_length_m)?;
    positive("sails.main.footLengthM", main.foot_length_m)?;
    finite("sails.main.cunninghamMm", main.cunningham_mm)?;
    finite("sails.main.boomAngleDeg", main.boom_angle_deg)?;
    finite("sails.main.boomTiltDeg", main.boom_tilt_deg)?;
    finite("sails.main.outhaulMm", main.outhaul_mm)?;
    finite("sails.main.sheetLeadYM", main.sheet_lead_y_m)?;
    finite_opt("sails.main.tackZM", main.tack_z_m)?;
    for &v in &main.draft_depth_sections {
        finite("sails.main.draftDepthSections[]", v)?;
    }
    for &v in &main.draft_pos_sections {
        finite("sails.main.draftPosSections[]", v)?;
    }
    mesh("sails.main.mesh", &main.mesh)
}

fn check_jib(jib: &JibSail) -> Result<(), PayloadError> {
    finite("sails.jib.draftDepth", jib.draft_depth)?;
    finite("sails.jib.draftPos", jib.draft_pos)?;
    positive("sails.jib.luffLengthM", jib.luff_length_m)?;
    positive("sails.jib.footLengthM", jib.foot_length_m)?;
    finite("sails.jib.clewDisplaceMm", jib.clew_displace_mm)?;
    finite("sails.jib.sheetLeadXMm", jib.sheet_lead_x_mm)?;
    finite("sails.jib.sheetLeadYMm", jib.sheet_lead_y_mm)?;
    if !matches!(jib.sheet_side_sign, -1 | 0 | 1) {
        return Err(PayloadError::OutOfRange(
            "sails.jib.sheetSideSign",
            format!("must be -1, 0 or +1, got {}", jib.sheet_side_sign),
        ));
    }
    for &v in &jib.draft_depth_sections {
        finite("sails.jib.draftDepthSections[]", v)?;
    }
    for &v in &jib.draft_pos_sections {
        finite("sails.jib.draftPosSections[]", v)?;
    }
    mesh("sails.jib.mesh", &jib.mesh)
}

/// Validate a payload. Returns the first violation found.
pub fn validate(payload: &SimulationPayload) -> Result<(), PayloadError> {
    let g = &payload.geometry;
    positive("geometry.mastLengthM", g.mast_length_m)?;
    finite("geometry.partnersZM", g.partners_z_m)?;
    finite("geometry.spreaderZM", g.spreader_z_m)?;
    finite("geometry.houndsZM", g.hounds_z_m)?;
    finite_opt("geometry.shroudAttachZM", g.shroud_attach_z_m)?;
    finite("geometry.chainplateXM", g.chainplate_x_m)?;
    finite("geometry.chainplateYM", g.chainplate_y_m)?;
    finite("geometry.bowYM", g.bow_y_m)?;

    let c = &payload.controls;
    positive("controls.spreaderLengthM", c.spreader_length_m)?;
    finite("controls.spreaderSweepAftM", c.spreader_sweep_aft_m)?;
    if c.spreader_sweep_aft_m.abs() >= c.spreader_length_m {
        return Err(PayloadError::OutOfRange(
            "controls.spreaderSweepAftM",
            format!(
                "sweep {} exceeds spreader length {}",
                c.spreader_sweep_aft_m, c.spreader_length_m
            ),
        ));
    }
    finite_opt("controls.shroudBaseDeltaM", c.shroud_base_delta_m)?;
    finite("controls.shroudDeltaL0PortM", c.shroud_delta_l0_port_m)?;
    finite("controls.shroudDeltaL0StbdM", c.shroud_delta_l0_stbd_m)?;
    finite("controls.jibHalyardTensionN", c.jib_halyard_tension_n)?;
    finite("controls.partnersKx", c.partners_kx)?;
    finite("controls.partnersKy", c.partners_ky)?;
    finite_opt("controls.partnersOffsetXM", c.partners_offset_x_m)?;
    finite_opt("controls.partnersOffsetYM", c.partners_offset_y_m)?;

    finite("load.qLateralNpm", payload.load.q_lateral_npm)?;

    let s = &payload.solver;
    if s.mast_segments < 2 {
        return Err(PayloadError::OutOfRange(
            "solver.mastSegments",
            format!("need at least 2 mast segments, got {}", s.mast_segments),
        ));
    }
    if let Some(n) = s.cable_segments {
        if n < 1 {
            return Err(PayloadError::OutOfRange(
                "solver.cableSegments",
                "must be >= 1".to_string(),
            ));
        }
    }
    if s.pretension_steps < 1 || s.load_steps < 1 {
        return Err(PayloadError::OutOfRange(
            "solver.pretensionSteps/loadSteps",
            "step counts must be >= 1".to_string(),
        ));
    }
    if s.max_iterations < 1 {
        return Err(PayloadError::OutOfRange(
            "solver.maxIterations",
            "must be >= 1".to_string(),
        ));
    }
    positive("solver.toleranceN", s.tolerance_n)?;
    finite("solver.cableCompressionEps", s.cable_compression_eps)?;
    if !(0.0..=1.0).contains(&s.cable_compression_eps) {
        return Err(PayloadError::OutOfRange(
            "solver.cableCompressionEps",
            format!("must lie in [0, 1], got {}", s.cable_compression_eps),
        ));
    }
    finite_opt("solver.drTimeStep", s.dr_time_step)?;
    finite_opt("solver.drMaxStepM", s.dr_max_step_m)?;
    finite_opt("solver.drStabilityFactor", s.dr_stability_factor)?;
    finite_opt("solver.drViscousDamping", s.dr_viscous_damping)?;
    finite_opt("solver.drKineticBacktrack", s.dr_kinetic_backtrack)?;
    finite_opt("solver.membranePrestress", s.membrane_prestress)?;
    finite_opt(
        "solver.membranePretensionFraction",
        s.membrane_pretension_fraction,
    )?;
    finite_opt(
        "solver.membraneCurvatureRadius",
        s.membrane_curvature_radius,
    )?;
    finite_opt("solver.membraneWrinklingEps", s.membrane_wrinkling_eps)?;
    finite_opt("solver.membraneMaxStrain", s.membrane_max_strain)?;

    let st = &payload.stiffness;
    positive("stiffness.mastEIBase", st.mast_ei_base)?;
    positive("stiffness.mastEITop", st.mast_ei_top)?;
    finite("stiffness.taperStartZM", st.taper_start_z_m)?;

    if let Some(sails) = &payload.sails {
        finite("sails.windPressurePa", sails.wind_pressure_pa)?;
        if !matches!(sails.wind_sign, -1 | 1) {
            return Err(PayloadError::OutOfRange(
                "sails.windSign",
                format!("must be +1 or -1, got {}", sails.wind_sign),
            ));
        }
        if let Some(main) = &sails.main {
            if main.enabled {
                check_main(main).map_err(|e| PayloadError::Sail("main", e.to_string()))?;
            }
        }
        if let Some(jib) = &sails.jib {
            if jib.enabled {
                check_jib(jib).map_err(|e| PayloadError::Sail("jib", e.to_string()))?;
            }
        }
    }

    Ok(())
}
