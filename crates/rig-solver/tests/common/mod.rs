//! Shared payload fixtures for the integration suites.

use rig_model::{
    Controls, Geometry, JibSail, Load, LoadMode, MainSail, QProfile, SailMesh, Sails,
    SimulationPayload, SolverSettings, Stiffness,
};

/// Standard club-dinghy rig, upwind, triangular wind profile.
pub fn baseline_payload() -> SimulationPayload {
    SimulationPayload {
        geometry: Geometry {
            mast_length_m: 6.1,
            partners_z_m: 0.7,
            spreader_z_m: 2.8,
            hounds_z_m: 4.6,
            shroud_attach_z_m: None,
            chainplate_x_m: 0.6,
            chainplate_y_m: 0.1,
            bow_y_m: 1.9,
        },
        controls: Controls {
            spreader_length_m: 0.45,
            spreader_sweep_aft_m: 0.1,
            shroud_base_delta_m: Some(0.004),
            shroud_delta_l0_port_m: 0.0,
            shroud_delta_l0_stbd_m: 0.0,
            jib_halyard_tension_n: 900.0,
            partners_kx: 2.0e5,
            partners_ky: 2.0e5,
            partners_offset_x_m: None,
            partners_offset_y_m: None,
            lock_stay_length: None,
        },
        load: Load {
            mode: LoadMode::Upwind,
            q_lateral_npm: 60.0,
            q_profile: QProfile::Triangular,
        },
        solver: SolverSettings {
            mast_segments: 20,
            cable_segments: None,
            pretension_steps: 4,
            load_steps: 4,
            max_iterations: 300,
            tolerance_n: 0.1,
            cable_compression_eps: 1e-4,
            use_dynamic_relaxation: None,
            dr_time_step: None,
            dr_max_step_m: None,
            dr_stability_factor: None,
            dr_warmup_iters: None,
            dr_max_iterations: None,
            dr_viscous_damping: None,
            dr_kinetic_backtrack: None,
            membrane_prestress: None,
            membrane_pretension_fraction: None,
            membrane_curvature_radius: None,
            membrane_wrinkling_eps: None,
            membrane_max_strain: None,
            use_segregated_fsi: None,
            fsi_iterations: None,
        },
        stiffness: Stiffness {
            mast_ei_base: 6000.0,
            mast_ei_top: 2500.0,
            taper_start_z_m: 3.5,
        },
        sails: None,
    }
}

/// Baseline rig with an 8x4 main and a 6x3 jib at 80 Pa.
pub fn sail_payload() -> SimulationPayload {
    let mut p = baseline_payload();
    p.solver.tolerance_n = 2.0;
    p.solver.pretension_steps = 2;
    p.solver.load_steps = 4;
    p.solver.dr_max_iterations = Some(6000);
    p.sails = Some(Sails {
        enabled: true,
        wind_pressure_pa: 80.0,
        wind_sign: 1,
        main: Some(MainSail {
            enabled: true,
            draft_depth: 0.08,
            draft_pos: 0.40,
            shape_sections: 3,
            draft_depth_sections: vec![0.09, 0.08, 0.06],
            draft_pos_sections: vec![0.42, 0.40, 0.38],
            tack_z_m: Some(0.8),
            luff_length_m: 4.8,
            foot_length_m: 2.2,
            cunningham_mm: 0.0,
            boom_angle_deg: 8.0,
            boom_tilt_deg: 4.0,
            outhaul_mm: 20.0,
            sheet_lead_y_m: 0.4,
            mesh: SailMesh {
                luff_segments: 8,
                chord_segments: 4,
            },
        }),
        jib: Some(JibSail {
            enabled: true,
            draft_depth: 0.10,
            draft_pos: 0.38,
            shape_sections: 3,
            draft_depth_sections: vec![],
            draft_pos_sections: vec![],
            luff_length_m: 4.2,
            foot_length_m: 1.6,
            clew_displace_mm: 15.0,
            sheet_side_sign: 1,
            sheet_lead_x_mm: 250.0,
            sheet_lead_y_mm: 900.0,
            mesh: SailMesh {
                luff_segments: 6,
                chord_segments: 3,
            },
            stay_top_segments: 2,
        }),
    });
    p
}
