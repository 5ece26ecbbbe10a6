//! Simulation payload: geometry, trim controls, loading, solver settings.
//!
//! All lengths are in metres, angles in degrees where the field name says so
//! (boom angle/tilt) and radians otherwise, forces in Newtons. Field names
//! serialize in camelCase to match the wire contract.

use serde::{Deserialize, Serialize};

/// Top-level simulation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationPayload {
    pub geometry: Geometry,
    pub controls: Controls,
    pub load: Load,
    pub solver: SolverSettings,
    pub stiffness: Stiffness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sails: Option<Sails>,
}

/// Fixed rig geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    /// Mast length from step to head.
    pub mast_length_m: f64,
    /// Height of the deck partners above the mast step.
    pub partners_z_m: f64,
    /// Height of the spreader root.
    pub spreader_z_m: f64,
    /// Height of the hounds (forestay attachment).
    pub hounds_z_m: f64,
    /// Height of the shroud attachment; defaults to the hounds height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shroud_attach_z_m: Option<f64>,
    /// Athwartships chainplate offset (port is -x, starboard +x).
    pub chainplate_x_m: f64,
    /// Fore/aft chainplate offset (+y is toward the bow).
    pub chainplate_y_m: f64,
    /// Bow fitting position on the centreline.
    pub bow_y_m: f64,
}

/// Trim controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controls {
    pub spreader_length_m: f64,
    pub spreader_sweep_aft_m: f64,
    /// Rest-length shortening applied to both shrouds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shroud_base_delta_m: Option<f64>,
    pub shroud_delta_l0_port_m: f64,
    pub shroud_delta_l0_stbd_m: f64,
    /// Target forestay tension set with the jib halyard.
    pub jib_halyard_tension_n: f64,
    pub partners_kx: f64,
    pub partners_ky: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partners_offset_x_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partners_offset_y_m: Option<f64>,
    /// Convert the stay target tension into a locked rest length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_stay_length: Option<bool>,
}

/// Wind loading mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    None,
    Upwind,
    Downwind,
}

/// Lateral load profile along the mast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QProfile {
    Uniform,
    Triangular,
}

/// Distributed wind load on the bare mast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    pub mode: LoadMode,
    /// Lateral line load in N/m at full scale.
    pub q_lateral_npm: f64,
    pub q_profile: QProfile,
}

/// Solver settings. Optional fields fall back to engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSettings {
    pub mast_segments: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cable_segments: Option<u32>,
    pub pretension_steps: u32,
    pub load_steps: u32,
    pub max_iterations: u32,
    pub tolerance_n: f64,
    pub cable_compression_eps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_dynamic_relaxation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_time_step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_max_step_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_stability_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_warmup_iters: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_viscous_damping: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_kinetic_backtrack: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membrane_prestress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membrane_pretension_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membrane_curvature_radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membrane_wrinkling_eps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membrane_max_strain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_segregated_fsi: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fsi_iterations: Option<u32>,
}

/// Mast bending stiffness with a linear taper above `taperStartZM`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stiffness {
    #[serde(rename = "mastEIBase")]
    pub mast_ei_base: f64,
    #[serde(rename = "mastEITop")]
    pub mast_ei_top: f64,
    pub taper_start_z_m: f64,
}

/// Sail configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sails {
    pub enabled: bool,
    pub wind_pressure_pa: f64,
    /// +1 or -1; the side the wind pushes toward.
    pub wind_sign: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<MainSail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jib: Option<JibSail>,
}

/// Sail discretisation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SailMesh {
    pub luff_segments: u32,
    pub chord_segments: u32,
}

/// Mainsail definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSail {
    pub enabled: bool,
    /// Default draft depth as a fraction of chord.
    pub draft_depth: f64,
    /// Default chord-wise draft position in [0, 1].
    pub draft_pos: f64,
    pub shape_sections: u32,
    pub draft_depth_sections: Vec<f64>,
    pub draft_pos_sections: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tack_z_m: Option<f64>,
    pub luff_length_m: f64,
    pub foot_length_m: f64,
    pub cunningham_mm: f64,
    pub boom_angle_deg: f64,
    pub boom_tilt_deg: f64,
    pub outhaul_mm: f64,
    pub sheet_lead_y_m: f64,
    pub mesh: SailMesh,
}

/// Jib definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JibSail {
    pub enabled: bool,
    pub draft_depth: f64,
    pub draft_pos: f64,
    pub shape_sections: u32,
    pub draft_depth_sections: Vec<f64>,
    pub draft_pos_sections: Vec<f64>,
    pub luff_length_m: f64,
    pub foot_length_m: f64,
    /// Dirichlet clew displacement toward the sheet lead, in millimetres.
    pub clew_displace_mm: f64,
    /// -1, 0 or +1; which side the sheet lead sits on.
    pub sheet_side_sign: i32,
    pub sheet_lead_x_mm: f64,
    pub sheet_lead_y_mm: f64,
    pub mesh: SailMesh,
    /// Number of stay segments between the jib head and the hounds.
    pub stay_top_segments: u32,
}

impl SimulationPayload {
    /// Whether any sail surface is active in this payload.
    pub fn sails_active(&self) -> bool {
        self.sails.as_ref().is_some_and(|s| {
            s.enabled
                && (s.main.as_ref().is_some_and(|m| m.enabled)
                    || s.jib.as_ref().is_some_and(|j| j.enabled))
        })
    }
}
