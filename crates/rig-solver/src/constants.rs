//! Numeric knobs of the engine, echoed into `diagnostics.constants`.

/// Mast segment axial stiffness [N]. Intentionally reduced by more than an
/// order of magnitude from the physical extrusion so the tangent stays well
/// conditioned while still carrying the P-delta effect.
pub const MAST_EA: f64 = 5.0e5;

/// Spreader bar axial stiffness [N].
pub const SPREADER_EA: f64 = 5.0e6;

/// Standing rigging wire stiffness EA [N] (2.5 mm 1x19 wire).
pub const WIRE_EA: f64 = 5.0e5;

/// Relative-spring stiffness [N/m] keeping each spreader tip at its
/// commanded sweep and height relative to the root; the bar alone only
/// fixes the tip distance.
pub const SPREADER_GUIDE_K: f64 = 5.0e6;

/// Boom link bar stiffness [N] and boom bending stiffness [N m^2].
/// Independent knobs; the boom is Dirichlet so both act only through the
/// sail foot attachment.
pub const BOOM_EA: f64 = 1.0e2;
pub const BOOM_EI: f64 = 5.0e3;

/// Minimum effective stay target tension [N], applied at nonzero halyard
/// scale so the stay stays elastically engaged.
pub const STAY_MIN_TENSION_N: f64 = 50.0;

/// Stay tension (N) at which the partners offset ramp saturates.
pub const PARTNERS_RAMP_TENSION_N: f64 = 500.0;

/// Downwind pressure/load reduction factor.
pub const DOWNWIND_FACTOR: f64 = 0.3;

/// Cable smoothing width [m] used for built cables unless overridden.
pub const CABLE_SMOOTH_DELTA: f64 = 1.0e-4;

/// Compression regularisation for sail-stay segments.
pub const STAY_COMPRESSION_EPS: f64 = 0.01;

/// Membrane defaults (sailcloth).
pub const MEMBRANE_E: f64 = 2.5e9;
pub const MEMBRANE_NU: f64 = 0.3;
pub const MEMBRANE_THICKNESS: f64 = 0.25e-3;
pub const MEMBRANE_PRETENSION_FRACTION: f64 = 0.1;
pub const MEMBRANE_CURVATURE_RADIUS: f64 = 1.5;
pub const MEMBRANE_WRINKLING_EPS: f64 = 0.01;
pub const MEMBRANE_MAX_STRAIN: f64 = 0.15;

/// Dynamic relaxation defaults.
pub const DR_FIXED_MASS: f64 = 10.0;
pub const DR_TIME_STEP: f64 = 5.0e-3;
pub const DR_MAX_STEP_M: f64 = 2.0e-3;
pub const DR_STABILITY_FACTOR: f64 = 0.25;
pub const DR_WARMUP_ITERS: usize = 50;
pub const DR_VISCOUS_DAMPING: f64 = 0.02;
pub const DR_KINETIC_BACKTRACK: f64 = 0.5;
pub const DR_POSITION_CLAMP_M: f64 = 50.0;

/// Balance threshold for the equilibrium report [N].
pub const EQUILIBRIUM_TOLERANCE_N: f64 = 10.0;
